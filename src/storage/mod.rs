pub mod aggregate;
pub mod dimension;
pub mod first_seen;
pub mod ingest;
pub mod lifecycle;
pub mod locks;
pub mod retention;
pub mod schema;
pub mod session;
pub mod snapshot;
pub mod sqlite;
pub mod tables;
pub mod trait_def;

pub use lifecycle::{DerivedSet, SchemaAction};
pub use locks::SiteLocks;
pub use retention::{CleanupStep, PurgeReport, SitePurge, StepFailure, DEFAULT_RETENTION_DAYS};
pub use snapshot::SiteSnapshot;
pub use sqlite::SqliteStore;
pub use tables::SiteTables;
pub use trait_def::{LogStore, StoreError, StoreResult};
