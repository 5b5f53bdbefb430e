//! Property-Based Tests for Import Ordering
//!
//! For any dependency-closed subset of tables and any row order within
//! them, an import must write parents before children and land every row.

use std::collections::BTreeSet;

use hubvault_core::backup::{ImportMode, ImportOptions, Importer};
use hubvault_core::schema::{SchemaRegistry, health_hub};
use hubvault_core::InMemoryStore;
use hubvault_testing::HealthHubDataset;
use proptest::prelude::*;

/// `tables` plus everything they reference, transitively.
fn dependency_closure(registry: &SchemaRegistry, tables: &[String]) -> BTreeSet<String> {
    let mut closed = BTreeSet::new();
    let mut pending: Vec<String> = tables.to_vec();
    while let Some(table) = pending.pop() {
        if !closed.insert(table.clone()) {
            continue;
        }
        if let Some(descriptor) = registry.descriptor(&table) {
            pending.extend(descriptor.dependencies().map(str::to_string));
        }
    }
    closed
}

fn table_subset() -> impl Strategy<Value = Vec<String>> {
    let names: Vec<String> = health_hub::tables().into_iter().map(|t| t.name).collect();
    let len = names.len();
    prop::sample::subsequence(names, 1..=len)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Writes follow registry order whatever order the rows arrive in
    #[test]
    fn prop_writes_follow_dependency_order(
        tables in table_subset(),
        rotation in 0usize..8,
        mode in prop_oneof![
            Just(ImportMode::Skip),
            Just(ImportMode::Overwrite),
            Just(ImportMode::Merge),
        ],
    ) {
        let registry = health_hub::registry().unwrap();
        let keep = dependency_closure(&registry, &tables);

        let mut file = HealthHubDataset::new().rows_per_table(3).build();
        file.data.retain(|table, _| keep.contains(table));
        for rows in file.data.values_mut() {
            let len = rows.len();
            rows.rotate_left(rotation % len);
        }
        file.metadata.tables.retain(|table| keep.contains(table));
        file.metadata.record_counts.retain(|table, _| keep.contains(table));

        let store = InMemoryStore::new();
        let result = Importer::new(&registry, &store).import(&file, &ImportOptions::new(mode));
        prop_assert!(result.success, "{:?}", result.errors);
        prop_assert_eq!(result.imported_total(), file.total_records());

        let positions: Vec<usize> = store
            .write_log()
            .iter()
            .map(|event| registry.position(&event.table).unwrap())
            .collect();
        prop_assert!(positions.windows(2).all(|pair| pair[0] <= pair[1]));
        prop_assert_eq!(store.total_rows() as u64, file.total_records());
    }

    /// A dry run never writes, whatever is selected
    #[test]
    fn prop_dry_run_is_side_effect_free(tables in table_subset()) {
        let registry = health_hub::registry().unwrap();
        let file = HealthHubDataset::new().build();
        let store = InMemoryStore::new();
        let selection: Vec<&str> = tables.iter().map(String::as_str).collect();

        let result = Importer::new(&registry, &store)
            .import(&file, &ImportOptions::new(ImportMode::Overwrite).tables(&selection).dry_run());
        prop_assert!(result.success);
        prop_assert!(result.imported.keys().all(|table| tables.contains(table)));
        prop_assert_eq!(store.total_rows(), 0);
    }
}
