//! Health Hub tables.
//!
//! Sixteen tables: the shared lab-test master list, users with their auth
//! accounts and sessions, personal health data, inspection items with their
//! aliases and edit history, and the Fitbit sync tables.

use crate::error::SchemaError;
use crate::value::StoreValue;

use super::{ColumnSpec, ForeignKey, SchemaRegistry, TableDescriptor};

/// Name of the application, used in backup file names.
pub const APP_NAME: &str = "health-hub";

/// Build the Health Hub registry.
pub fn registry() -> Result<SchemaRegistry, SchemaError> {
    let mut builder = SchemaRegistry::builder();
    for table in tables() {
        builder = builder.table(table);
    }
    builder.build()
}

/// Table descriptors in registration order.
pub fn tables() -> Vec<TableDescriptor> {
    vec![
        master_item(),
        user(),
        account(),
        session(),
        fitbit_account(),
        fit_data(),
        health_record(),
        user_health_item_setting(),
        lifestyle_habit(),
        supplement(),
        inspection_item(),
        inspection_item_alias(),
        inspection_item_history(),
        hrv_data(),
        detailed_sleep(),
        intraday_heart_rate(),
    ]
}

fn empty_list() -> StoreValue {
    StoreValue::TextList(Vec::new())
}

fn created_at() -> ColumnSpec {
    ColumnSpec::timestamp("createdAt").default_now()
}

fn updated_at() -> ColumnSpec {
    ColumnSpec::timestamp("updatedAt").default_now()
}

/// `id` plus `userId` referencing `User`, owned by that user.
fn user_table(name: &str) -> TableDescriptor {
    TableDescriptor::new(name)
        .column(ColumnSpec::text("id"))
        .column(ColumnSpec::text("userId"))
        .foreign_key(ForeignKey::required("userId", "User"))
        .owned_by("userId")
}

fn master_item() -> TableDescriptor {
    TableDescriptor::new("MasterItem")
        .key_field("code")
        .column(ColumnSpec::text("code"))
        .column(ColumnSpec::text("standardName"))
        .column(ColumnSpec::text("jlac10").nullable())
        .column(ColumnSpec::text_list("synonyms").default_value(empty_list()))
        .required(&["code", "standardName"])
}

fn user() -> TableDescriptor {
    TableDescriptor::new("User")
        .column(ColumnSpec::text("id"))
        .column(ColumnSpec::text("name").nullable())
        .column(ColumnSpec::text("email").nullable())
        .column(ColumnSpec::timestamp("emailVerified").nullable())
        .column(ColumnSpec::text("image").nullable())
        .column(ColumnSpec::timestamp("birthDate").nullable())
        .column(created_at())
        .column(updated_at())
        .required(&["id"])
        .owned_by("id")
}

fn account() -> TableDescriptor {
    user_table("Account")
        .column(ColumnSpec::text("type"))
        .column(ColumnSpec::text("provider"))
        .column(ColumnSpec::text("providerAccountId"))
        .column(ColumnSpec::text("refresh_token").nullable())
        .column(ColumnSpec::text("access_token").nullable())
        .column(ColumnSpec::integer("expires_at").nullable())
        .column(ColumnSpec::text("token_type").nullable())
        .column(ColumnSpec::text("scope").nullable())
        .column(ColumnSpec::text("id_token").nullable())
        .column(ColumnSpec::text("session_state").nullable())
        .required(&["id", "userId", "type", "provider", "providerAccountId"])
        .conflict_key(&["provider", "providerAccountId"])
}

fn session() -> TableDescriptor {
    user_table("Session")
        .column(ColumnSpec::text("sessionToken"))
        .column(ColumnSpec::timestamp("expires"))
        .required(&["id", "sessionToken", "userId", "expires"])
}

fn fitbit_account() -> TableDescriptor {
    user_table("FitbitAccount")
        .column(ColumnSpec::text("fitbitUserId"))
        .column(ColumnSpec::text("accessToken"))
        .column(ColumnSpec::text("refreshToken"))
        .column(ColumnSpec::timestamp("expiresAt"))
        .column(ColumnSpec::text("scope"))
        .column(ColumnSpec::text("tokenType").default_value("Bearer"))
        .column(ColumnSpec::text("codeVerifier").nullable())
        .column(created_at())
        .column(updated_at())
        .required(&["id"])
        .conflict_key(&["userId"])
}

fn fit_data() -> TableDescriptor {
    user_table("FitData")
        .column(ColumnSpec::timestamp("date"))
        .column(ColumnSpec::integer("heartRate").nullable())
        .column(ColumnSpec::integer("steps").nullable())
        .column(ColumnSpec::real("weight").nullable())
        .column(ColumnSpec::json("raw").nullable())
        .column(ColumnSpec::real("distance").nullable())
        .column(ColumnSpec::real("calories").nullable())
        .column(ColumnSpec::integer("sleepMinutes").nullable())
        .column(ColumnSpec::json("sleepData").nullable())
        .column(ColumnSpec::json("vitals").nullable())
        .column(ColumnSpec::json("workouts").nullable())
        .column(ColumnSpec::text("source").nullable())
        .column(ColumnSpec::text("fitbitSyncId").nullable())
        .column(ColumnSpec::real("respiratoryRate").nullable())
        .column(ColumnSpec::real("skinTemperature").nullable())
        .column(ColumnSpec::timestamp("syncedAt").default_now())
        .required(&["id", "userId", "date"])
        .conflict_key(&["userId", "date"])
}

fn health_record() -> TableDescriptor {
    user_table("HealthRecord")
        .column(ColumnSpec::timestamp("date").default_now())
        .column(ColumnSpec::text("status").default_value("completed"))
        .column(ColumnSpec::text("title").nullable())
        .column(ColumnSpec::text("summary").nullable())
        .column(ColumnSpec::json("data"))
        .column(ColumnSpec::json("additional_data").nullable())
        .column(ColumnSpec::text_list("images").default_value(empty_list()))
        .column(created_at())
        .column(updated_at())
        .required(&["id", "userId", "data"])
}

fn user_health_item_setting() -> TableDescriptor {
    user_table("UserHealthItemSetting")
        .column(ColumnSpec::text("itemName"))
        .column(ColumnSpec::real("minVal").default_value(StoreValue::Real(0.0)))
        .column(ColumnSpec::real("maxVal").default_value(StoreValue::Real(0.0)))
        .column(ColumnSpec::real("safeMin").nullable())
        .column(ColumnSpec::real("safeMax").nullable())
        .column(ColumnSpec::text_list("tags").default_value(empty_list()))
        .column(updated_at())
        .required(&["id", "userId", "itemName"])
        .conflict_key(&["userId", "itemName"])
}

fn lifestyle_habit() -> TableDescriptor {
    user_table("LifestyleHabit")
        .column(ColumnSpec::text("category"))
        .column(ColumnSpec::text("name"))
        .column(ColumnSpec::json("value"))
        .column(created_at())
        .column(updated_at())
        .required(&["id", "userId", "category", "name", "value"])
        .conflict_key(&["userId", "category", "name"])
}

fn supplement() -> TableDescriptor {
    user_table("Supplement")
        .column(ColumnSpec::text("name"))
        .column(ColumnSpec::text_list("timing"))
        .column(ColumnSpec::integer("order").default_value(StoreValue::Integer(0)))
        .column(ColumnSpec::text("amount"))
        .column(ColumnSpec::text("unit"))
        .column(ColumnSpec::text("manufacturer").nullable())
        .column(ColumnSpec::text("note").nullable())
        .column(ColumnSpec::timestamp("startDate").nullable())
        .column(ColumnSpec::json("pausedPeriods").nullable())
        .column(created_at())
        .column(updated_at())
        .required(&["id", "userId", "name", "timing", "amount", "unit"])
}

fn inspection_item() -> TableDescriptor {
    user_table("InspectionItem")
        .column(ColumnSpec::text("name"))
        .column(ColumnSpec::text("masterItemCode").nullable())
        .column(created_at())
        .column(updated_at())
        .foreign_key(ForeignKey::optional("masterItemCode", "MasterItem").to_field("code"))
        .required(&["id", "userId", "name"])
        .conflict_key(&["userId", "name"])
}

fn inspection_item_alias() -> TableDescriptor {
    TableDescriptor::new("InspectionItemAlias")
        .column(ColumnSpec::text("id"))
        .column(ColumnSpec::text("inspectionItemId"))
        .column(ColumnSpec::text("originalName"))
        .foreign_key(ForeignKey::required("inspectionItemId", "InspectionItem"))
        .owned_through("inspectionItemId", "InspectionItem")
        .required(&["id", "inspectionItemId", "originalName"])
        .conflict_key(&["inspectionItemId", "originalName"])
}

fn inspection_item_history() -> TableDescriptor {
    TableDescriptor::new("InspectionItemHistory")
        .column(ColumnSpec::text("id"))
        .column(ColumnSpec::text("inspectionItemId"))
        .column(ColumnSpec::text("operationType"))
        .column(ColumnSpec::json("details"))
        .column(ColumnSpec::text("undoCommand"))
        .column(created_at())
        .foreign_key(ForeignKey::required("inspectionItemId", "InspectionItem"))
        .owned_through("inspectionItemId", "InspectionItem")
        .required(&[
            "id",
            "inspectionItemId",
            "operationType",
            "details",
            "undoCommand",
        ])
}

fn hrv_data() -> TableDescriptor {
    user_table("HrvData")
        .column(ColumnSpec::timestamp("date"))
        .column(ColumnSpec::real("dailyRmssd"))
        .column(ColumnSpec::real("deepRmssd").nullable())
        .column(ColumnSpec::real("coverage").nullable())
        .column(ColumnSpec::real("lowFrequency").nullable())
        .column(ColumnSpec::real("highFrequency").nullable())
        .column(ColumnSpec::json("raw").nullable())
        .column(ColumnSpec::timestamp("syncedAt").default_now())
        .required(&["id"])
        .conflict_key(&["userId", "date"])
}

fn detailed_sleep() -> TableDescriptor {
    user_table("DetailedSleep")
        .column(ColumnSpec::timestamp("date"))
        .column(ColumnSpec::text("logId"))
        .column(ColumnSpec::timestamp("startTime"))
        .column(ColumnSpec::timestamp("endTime"))
        .column(ColumnSpec::integer("duration"))
        .column(ColumnSpec::integer("efficiency"))
        .column(ColumnSpec::integer("minutesAwake"))
        .column(ColumnSpec::integer("minutesLight"))
        .column(ColumnSpec::integer("minutesDeep"))
        .column(ColumnSpec::integer("minutesRem"))
        .column(ColumnSpec::json("stages"))
        .column(ColumnSpec::json("raw").nullable())
        .column(ColumnSpec::timestamp("syncedAt").default_now())
        .required(&["id"])
        .conflict_key(&["userId", "logId"])
}

fn intraday_heart_rate() -> TableDescriptor {
    user_table("IntradayHeartRate")
        .column(ColumnSpec::timestamp("date"))
        .column(ColumnSpec::integer("restingHeartRate").nullable())
        .column(ColumnSpec::integer("outOfRangeMinutes").nullable())
        .column(ColumnSpec::integer("fatBurnMinutes").nullable())
        .column(ColumnSpec::integer("cardioMinutes").nullable())
        .column(ColumnSpec::integer("peakMinutes").nullable())
        .column(ColumnSpec::json("intradayData"))
        .column(ColumnSpec::json("raw").nullable())
        .column(ColumnSpec::timestamp("syncedAt").default_now())
        .required(&["id"])
        .conflict_key(&["userId", "date"])
}
