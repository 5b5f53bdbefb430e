//! # Hubvault Testing
//!
//! Utilities for exercising the backup engine:
//!
//! - **Fixtures**: a complete, referentially closed Health Hub dataset with a
//!   configurable number of users and rows per table
//! - **Faults**: a store wrapper that fails chosen rows, savepoints or the
//!   commit, for testing containment and rollback
//!
//! ## Usage
//!
//! ```rust
//! use hubvault_core::InMemoryStore;
//! use hubvault_core::backup::{ImportOptions, Importer};
//! use hubvault_core::schema::health_hub;
//! use hubvault_testing::{FaultyStore, HealthHubDataset};
//!
//! let registry = health_hub::registry().unwrap();
//! let file = HealthHubDataset::new().users(2).rows_per_table(3).build();
//!
//! let store = FaultyStore::new(InMemoryStore::new()).fail_commit();
//! let result = Importer::new(&registry, &store).import(&file, &ImportOptions::default());
//! assert!(!result.success);
//! assert_eq!(store.inner().total_rows(), 0);
//! ```

/// Fault-injecting store wrapper
pub mod faults;
/// Health Hub dataset builder
pub mod fixtures;

pub use faults::FaultyStore;
pub use fixtures::HealthHubDataset;
