use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::{Value, json};
use uuid::Uuid;

use hubvault_core::backup::{
    BACKUP_FORMAT_VERSION, BackupData, BackupFile, BackupMetadata, ImportMode, ImportOptions,
    ImportResult, Importer,
};
use hubvault_core::schema::{SchemaRegistry, health_hub};
use hubvault_core::store::TransactionalStore;
use hubvault_core::value::{Row, format_timestamp};

/// Builder for a referentially closed Health Hub backup file.
///
/// Every table gets rows: the shared master list once, then for each user
/// one user row, one Fitbit account and `rows_per_table` rows in every
/// other table. Ids are random v4 UUIDs; dates count up by day from the
/// start time so natural keys never collide.
#[derive(Debug, Clone)]
pub struct HealthHubDataset {
    users: usize,
    rows_per_table: usize,
    start: DateTime<Utc>,
}

impl Default for HealthHubDataset {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthHubDataset {
    pub fn new() -> Self {
        Self {
            users: 1,
            rows_per_table: 2,
            start: Utc
                .with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
                .single()
                .unwrap_or_else(Utc::now),
        }
    }

    pub fn users(mut self, users: usize) -> Self {
        self.users = users;
        self
    }

    pub fn rows_per_table(mut self, rows: usize) -> Self {
        self.rows_per_table = rows;
        self
    }

    pub fn starting_at(mut self, start: DateTime<Utc>) -> Self {
        self.start = start;
        self
    }

    fn day(&self, offset: usize) -> String {
        format_timestamp(&(self.start + Duration::days(offset as i64)))
    }

    fn id() -> String {
        Uuid::new_v4().to_string()
    }

    /// Build the file, with metadata counts matching the data.
    pub fn build(&self) -> BackupFile {
        let mut data = BackupData::new();
        let mut push = |table: &str, row: Value| {
            if let Value::Object(row) = row {
                data.entry(table.to_string()).or_default().push(row);
            }
        };

        let master_codes: Vec<String> = (0..self.rows_per_table.max(1))
            .map(|i| format!("M{:04}", i + 1))
            .collect();
        for (i, code) in master_codes.iter().enumerate() {
            push(
                "MasterItem",
                json!({
                    "code": code,
                    "standardName": format!("Marker {}", i + 1),
                    "jlac10": null,
                    "synonyms": [format!("marker-{}", i + 1)],
                }),
            );
        }

        for u in 0..self.users {
            let user_id = Self::id();
            let created = self.day(0);
            push(
                "User",
                json!({
                    "id": user_id,
                    "name": format!("User {}", u + 1),
                    "email": format!("user{}@example.com", u + 1),
                    "createdAt": created,
                    "updatedAt": created,
                }),
            );
            push(
                "FitbitAccount",
                json!({
                    "id": Self::id(),
                    "userId": user_id,
                    "fitbitUserId": format!("FB{}", u + 1),
                    "accessToken": "access",
                    "refreshToken": "refresh",
                    "expiresAt": self.day(30),
                    "scope": "activity heartrate sleep",
                    "tokenType": "Bearer",
                    "createdAt": created,
                    "updatedAt": created,
                }),
            );

            for i in 0..self.rows_per_table {
                let date = self.day(i);
                push(
                    "Account",
                    json!({
                        "id": Self::id(),
                        "userId": user_id,
                        "type": "oauth",
                        "provider": "google",
                        "providerAccountId": format!("{}-{}", user_id, i),
                    }),
                );
                push(
                    "Session",
                    json!({
                        "id": Self::id(),
                        "userId": user_id,
                        "sessionToken": Self::id(),
                        "expires": self.day(i + 7),
                    }),
                );
                push(
                    "FitData",
                    json!({
                        "id": Self::id(),
                        "userId": user_id,
                        "date": date,
                        "steps": 8000 + i as i64,
                        "heartRate": 60,
                        "weight": 64.5,
                        "raw": {"source": "fixture"},
                        "syncedAt": date,
                    }),
                );
                push(
                    "HealthRecord",
                    json!({
                        "id": Self::id(),
                        "userId": user_id,
                        "date": date,
                        "status": "completed",
                        "title": format!("Checkup {}", i + 1),
                        "data": {"results": [{"item": master_codes[i % master_codes.len()], "value": 5.2}]},
                        "images": [],
                        "createdAt": date,
                        "updatedAt": date,
                    }),
                );
                push(
                    "UserHealthItemSetting",
                    json!({
                        "id": Self::id(),
                        "userId": user_id,
                        "itemName": format!("Item {}", i + 1),
                        "minVal": 1.0,
                        "maxVal": 9.5,
                        "tags": ["fixture"],
                        "updatedAt": date,
                    }),
                );
                push(
                    "LifestyleHabit",
                    json!({
                        "id": Self::id(),
                        "userId": user_id,
                        "category": "exercise",
                        "name": format!("Habit {}", i + 1),
                        "value": {"frequency": "daily"},
                        "createdAt": date,
                        "updatedAt": date,
                    }),
                );
                push(
                    "Supplement",
                    json!({
                        "id": Self::id(),
                        "userId": user_id,
                        "name": format!("Supplement {}", i + 1),
                        "timing": ["morning"],
                        "order": i as i64,
                        "amount": "1",
                        "unit": "tablet",
                        "createdAt": date,
                        "updatedAt": date,
                    }),
                );

                let item_id = Self::id();
                push(
                    "InspectionItem",
                    json!({
                        "id": item_id,
                        "userId": user_id,
                        "name": format!("Inspection {}", i + 1),
                        "masterItemCode": master_codes[i % master_codes.len()],
                        "createdAt": date,
                        "updatedAt": date,
                    }),
                );
                push(
                    "InspectionItemAlias",
                    json!({
                        "id": Self::id(),
                        "inspectionItemId": item_id,
                        "originalName": format!("alias {}", i + 1),
                    }),
                );
                push(
                    "InspectionItemHistory",
                    json!({
                        "id": Self::id(),
                        "inspectionItemId": item_id,
                        "operationType": "rename",
                        "details": {"from": "old", "to": "new"},
                        "undoCommand": "rename new old",
                        "createdAt": date,
                    }),
                );
                push(
                    "HrvData",
                    json!({
                        "id": Self::id(),
                        "userId": user_id,
                        "date": date,
                        "dailyRmssd": 42.5,
                        "syncedAt": date,
                    }),
                );
                push(
                    "DetailedSleep",
                    json!({
                        "id": Self::id(),
                        "userId": user_id,
                        "date": date,
                        "logId": format!("log-{}-{}", u, i),
                        "startTime": date,
                        "endTime": self.day(i + 1),
                        "duration": 28_800_000,
                        "efficiency": 91,
                        "minutesAwake": 30,
                        "minutesLight": 240,
                        "minutesDeep": 90,
                        "minutesRem": 100,
                        "stages": [{"level": "deep", "seconds": 5400}],
                        "syncedAt": date,
                    }),
                );
                push(
                    "IntradayHeartRate",
                    json!({
                        "id": Self::id(),
                        "userId": user_id,
                        "date": date,
                        "restingHeartRate": 58,
                        "intradayData": [{"time": "00:00:00", "value": 57}],
                        "syncedAt": date,
                    }),
                );
            }
        }

        let tables: Vec<String> = health_hub::tables()
            .into_iter()
            .map(|table| table.name)
            .filter(|name| data.contains_key(name))
            .collect();
        let record_counts = data
            .iter()
            .map(|(table, rows)| (table.clone(), rows.len() as u64))
            .collect();

        BackupFile {
            metadata: BackupMetadata {
                version: BACKUP_FORMAT_VERSION.to_string(),
                exported_at: self.day(0),
                app_version: "fixture".to_string(),
                tables,
                user_id: None,
                record_counts,
            },
            data,
        }
    }

    /// Import the dataset into `store` in skip mode.
    pub fn seed<S: TransactionalStore>(
        &self,
        registry: &SchemaRegistry,
        store: &S,
    ) -> (BackupFile, ImportResult) {
        let file = self.build();
        let result =
            Importer::new(registry, store).import(&file, &ImportOptions::new(ImportMode::Skip));
        (file, result)
    }
}

/// Ids of the users in `file`.
pub fn user_ids(file: &BackupFile) -> Vec<String> {
    file.rows("User")
        .iter()
        .filter_map(|row| row.get("id").and_then(Value::as_str).map(str::to_string))
        .collect()
}

/// First row of `table` whose `field` equals `value`.
pub fn find_row<'a>(file: &'a BackupFile, table: &str, field: &str, value: &str) -> Option<&'a Row> {
    file.rows(table)
        .iter()
        .find(|row| row.get(field).and_then(Value::as_str) == Some(value))
}
