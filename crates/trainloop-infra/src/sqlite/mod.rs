//! SQLite persistence for Trainloop.

pub mod cache;
pub mod pool;
pub mod quota;
pub mod run;

pub use cache::SqliteCacheStore;
pub use pool::DatabasePool;
pub use quota::SqliteQuotaStore;
pub use run::SqliteRunRepository;
