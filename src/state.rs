//! Shared runtime for all routes. Registries are filled at bootstrap and only read afterwards.

use crate::codec::CodecRegistry;
use crate::config::EngineConfig;
use crate::extractors::{Anonymous, IdentityProvider};
use crate::recover::install_panic_hook;
use crate::schema::SchemaRegistry;
use crate::store::Store;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub schemas: Arc<SchemaRegistry>,
    pub codecs: Arc<CodecRegistry>,
    pub config: EngineConfig,
    pub identity: Arc<dyn IdentityProvider>,
}

impl AppState {
    /// State with an empty codec registry and anonymous callers. Installs the panic hook that
    /// records stacks for recovered panics.
    pub fn new(store: Arc<dyn Store>, schemas: Arc<SchemaRegistry>, config: EngineConfig) -> Self {
        install_panic_hook();
        AppState {
            store,
            schemas,
            codecs: Arc::new(CodecRegistry::new()),
            config,
            identity: Arc::new(Anonymous),
        }
    }

    pub fn with_codecs(mut self, codecs: CodecRegistry) -> Self {
        self.codecs = Arc::new(codecs);
        self
    }

    pub fn with_identity(mut self, provider: impl IdentityProvider + 'static) -> Self {
        self.identity = Arc::new(provider);
        self
    }
}
