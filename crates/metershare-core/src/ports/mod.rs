//! Port definitions (trait interfaces for adapters)
//!
//! Narrow capability traits so the sync engine, query service, and
//! facade can be exercised in tests with in-memory fakes and a manual
//! clock, without any live cloud dependency.

pub mod clock;
pub mod credential;
pub mod session_cache;
pub mod table_store;

pub use clock::{IClock, ManualClock, SystemClock};
pub use credential::{
    AuthMode, Credential, ICredentialProvider, ICredentialValidator, ProbeReport,
};
pub use session_cache::{
    CachedLookup, ISessionSource, ISessionStatsCache, ModelTokens, SessionFile, SessionStats,
};
pub use table_store::{ITableStore, StoreError, StoreOperation};
