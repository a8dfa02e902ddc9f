//! Provider contract, provider registry, session resolution and the reference providers

pub mod config;
pub mod error;
pub mod provider;
pub mod registry;
pub mod script;
pub mod session;
pub mod stub;

#[cfg(feature = "postgresql")]
pub mod postgresql;

pub use config::{ConnectType, CredentialsSource, ProviderConfig};
pub use error::{BoxError, ProviderError, ProviderResult};
pub use provider::{
    downcast_connection, find_source, AsAny, ConnectOptions, Provider, ProviderConnection,
    QueryControl, QueryOptions, QueryRange, QuerySort, RowMode,
};
pub use registry::ProviderRegistry;
pub use script::{ScriptCall, ScriptProvider, SCRIPT_KIND};
pub use session::{ContextBinding, Credentials, MemorySession, Session};
pub use stub::{StubCall, StubOp, StubProvider, STUB_KIND};

#[cfg(feature = "postgresql")]
pub use postgresql::{PostgresProvider, POSTGRES_KIND};
