use std::ops::Deref;
use std::sync::Arc;

use crate::config::Config;
use crate::connection::Connection;
use crate::context::Context;
use crate::engine::{Engine, EngineFactory};
use crate::error::DriverError;
use crate::logging::Logger;

struct EngineLease {
    engine: Arc<dyn Engine>,
}

impl Drop for EngineLease {
    fn drop(&mut self) {
        self.engine.close();
    }
}

/// Shared reference to the engine client.
///
/// The client is closed once the connector and every connection holding a
/// handle have let go of it.
#[derive(Clone)]
pub(crate) struct EngineHandle(Arc<EngineLease>);

impl EngineHandle {
    pub(crate) fn new(engine: Arc<dyn Engine>) -> Self {
        Self(Arc::new(EngineLease { engine }))
    }
}

impl Deref for EngineHandle {
    type Target = dyn Engine;

    fn deref(&self) -> &Self::Target {
        self.0.engine.as_ref()
    }
}

/// Creates connections that share one engine client.
pub struct Connector {
    config: Arc<Config>,
    engine: EngineHandle,
    logger: Logger,
}

impl Connector {
    /// Build the engine client for `config` and wrap it.
    ///
    /// # Errors
    /// Passes through the factory's error.
    pub async fn new(config: Config, factory: &dyn EngineFactory) -> Result<Self, DriverError> {
        let engine = factory.connect(&config).await?;
        Ok(Self::from_engine(config, engine))
    }

    /// Wrap an engine client built elsewhere.
    #[must_use]
    pub fn from_engine(config: Config, engine: Arc<dyn Engine>) -> Self {
        let logger = config.logger();
        Self {
            config: Arc::new(config),
            engine: EngineHandle::new(engine),
            logger,
        }
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Open a connection.
    ///
    /// # Errors
    /// Returns the context's error if it has already fired.
    pub async fn connect(&self, ctx: &Context) -> Result<Connection, DriverError> {
        if let Some(err) = ctx.err() {
            return Err(err);
        }
        self.logger.debug("opening connection");
        Ok(Connection::new(
            self.engine.clone(),
            Arc::clone(&self.config),
            self.logger.clone(),
        ))
    }
}

impl std::fmt::Debug for Connector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connector")
            .field("database", &self.config.database.to_string())
            .finish_non_exhaustive()
    }
}
