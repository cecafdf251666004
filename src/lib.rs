//! crudmap: metadata-driven, permission-aware CRUD engine for plain record types.

pub mod case;
pub mod codec;
pub mod config;
pub mod convert;
pub mod error;
pub mod extractors;
pub mod filter;
pub mod handlers;
pub mod identity;
pub mod migration;
pub mod recover;
pub mod response;
pub mod routes;
pub mod schema;
pub mod service;
pub mod sql;
pub mod state;
pub mod store;

pub use codec::{CodecRegistry, FieldValue};
pub use config::{CreateHook, CrudConfig, EngineConfig, ListConfig, RelatedFetcher};
pub use error::{ApiFailure, CodecError, ConfigError, EngineError, StoreError};
pub use extractors::{Anonymous, Identity, IdentityProvider, TrustedHeaders};
pub use filter::{CompiledFilter, Condition, FilterCompiler, FilterOp, HasManyFilter, ListParams, PredefinedQuery};
pub use identity::{DecisionLog, RequestContext, RequestIdentity};
pub use migration::{ensure_relation_table, ensure_table};
pub use recover::install_panic_hook;
pub use response::{DeleteResponse, ItemResponse, ListResponse};
pub use routes::{common_routes, common_routes_with_ready, crud_routes};
pub use schema::{Capabilities, FieldKind, FieldsMapping, Record, SchemaBuilder, SchemaRegistry};
pub use service::{CrudEngine, FieldRule, RelatedModels, RequestValidator};
pub use state::AppState;
pub use store::{ensure_database_exists, MemoryStore, PgStore, Store, StoreTx};
