//! Repository trait definitions (ports implemented by trainloop-infra).

pub mod cache;
pub mod memory;
pub mod quota;
pub mod run;

pub use cache::CacheStore;
pub use quota::QuotaStore;
pub use run::RunRepository;
