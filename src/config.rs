use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::DriverError;
use crate::logging::Logger;

const DEFAULT_BEGIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Fully qualified database resource name:
/// `projects/<project>/instances/<instance>/databases/<database>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DatabasePath {
    project: String,
    instance: String,
    database: String,
}

impl DatabasePath {
    /// Parse and validate a database resource name.
    ///
    /// # Errors
    /// Returns [`DriverError::Config`] unless `path` has exactly the
    /// `projects/*/instances/*/databases/*` shape with non-empty ids.
    pub fn parse(path: &str) -> Result<Self, DriverError> {
        let invalid = || {
            DriverError::Config(format!(
                "invalid database path {path:?}, expected projects/<project>/instances/<instance>/databases/<database>"
            ))
        };
        let segments: Vec<&str> = path.trim().split('/').collect();
        match segments.as_slice() {
            ["projects", project, "instances", instance, "databases", database]
                if [project, instance, database].iter().all(|id| valid_id(id)) =>
            {
                Ok(Self {
                    project: (*project).to_owned(),
                    instance: (*instance).to_owned(),
                    database: (*database).to_owned(),
                })
            }
            _ => Err(invalid()),
        }
    }

    #[must_use]
    pub fn project(&self) -> &str {
        &self.project
    }

    #[must_use]
    pub fn instance(&self) -> &str {
        &self.instance
    }

    #[must_use]
    pub fn database(&self) -> &str {
        &self.database
    }
}

fn valid_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':'))
}

impl fmt::Display for DatabasePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "projects/{}/instances/{}/databases/{}",
            self.project, self.instance, self.database
        )
    }
}

impl FromStr for DatabasePath {
    type Err = DriverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for DatabasePath {
    type Error = DriverError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<DatabasePath> for String {
    fn from(path: DatabasePath) -> Self {
        path.to_string()
    }
}

/// Session pool sizing handed to the engine factory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionPoolConfig {
    pub min_opened: u64,
    pub max_opened: u64,
}

impl Default for SessionPoolConfig {
    fn default() -> Self {
        Self {
            min_opened: 100,
            max_opened: 400,
        }
    }
}

/// Settings shared by every connection of a connector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabasePath,
    #[serde(default)]
    pub session_pool: SessionPoolConfig,
    /// How long `begin_tx` waits for a read-write transaction to start.
    #[serde(default = "default_begin_timeout", with = "duration_millis", rename = "begin_timeout_ms")]
    pub begin_timeout: Duration,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(skip)]
    pub logger: Option<Logger>,
}

fn default_begin_timeout() -> Duration {
    DEFAULT_BEGIN_TIMEOUT
}

fn default_user_agent() -> String {
    format!("spanner-sql-driver/{}", env!("CARGO_PKG_VERSION"))
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

impl Config {
    #[must_use]
    pub fn new(database: DatabasePath) -> Self {
        Self {
            database,
            session_pool: SessionPoolConfig::default(),
            begin_timeout: DEFAULT_BEGIN_TIMEOUT,
            user_agent: default_user_agent(),
            logger: None,
        }
    }

    /// Start a builder from a database resource name.
    ///
    /// # Errors
    /// Returns [`DriverError::Config`] if `database` is not a valid path.
    pub fn builder(database: &str) -> Result<ConfigBuilder, DriverError> {
        Ok(ConfigBuilder::new(DatabasePath::parse(database)?))
    }

    /// The injected logger, or the stderr default.
    #[must_use]
    pub fn logger(&self) -> Logger {
        self.logger.clone().unwrap_or_default()
    }
}

/// Fluent builder for [`Config`].
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    #[must_use]
    pub fn new(database: DatabasePath) -> Self {
        Self {
            config: Config::new(database),
        }
    }

    #[must_use]
    pub fn session_pool(mut self, min_opened: u64, max_opened: u64) -> Self {
        self.config.session_pool = SessionPoolConfig {
            min_opened,
            max_opened,
        };
        self
    }

    #[must_use]
    pub fn begin_timeout(mut self, timeout: Duration) -> Self {
        self.config.begin_timeout = timeout;
        self
    }

    #[must_use]
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    #[must_use]
    pub fn logger(mut self, logger: Logger) -> Self {
        self.config.logger = Some(logger);
        self
    }

    /// Validate and return the configuration.
    ///
    /// # Errors
    /// Returns [`DriverError::Config`] for an empty session pool range or a zero begin timeout.
    pub fn finish(self) -> Result<Config, DriverError> {
        let pool = self.config.session_pool;
        if pool.max_opened == 0 || pool.min_opened > pool.max_opened {
            return Err(DriverError::Config(format!(
                "session pool min_opened ({}) must not exceed max_opened ({}), and max_opened must be positive",
                pool.min_opened, pool.max_opened
            )));
        }
        if self.config.begin_timeout.is_zero() {
            return Err(DriverError::Config("begin_timeout must be positive".into()));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PATH: &str = "projects/p1/instances/i-1/databases/db_1";

    #[test]
    fn database_path_round_trips_through_display() {
        let path: DatabasePath = PATH.parse().unwrap();
        assert_eq!(path.project(), "p1");
        assert_eq!(path.instance(), "i-1");
        assert_eq!(path.database(), "db_1");
        assert_eq!(path.to_string(), PATH);
    }

    #[test]
    fn malformed_paths_are_rejected() {
        for bad in [
            "",
            "projects/p/instances/i",
            "projects//instances/i/databases/d",
            "project/p/instances/i/databases/d",
            "projects/p/instances/i/databases/d/extra",
            "projects/p q/instances/i/databases/d",
        ] {
            assert!(
                matches!(DatabasePath::parse(bad), Err(DriverError::Config(_))),
                "{bad:?} should not parse"
            );
        }
    }

    #[test]
    fn builder_applies_defaults_and_overrides() {
        let config = Config::builder(PATH).unwrap().finish().unwrap();
        assert_eq!(config.begin_timeout, Duration::from_secs(10));
        assert!(config.user_agent.starts_with("spanner-sql-driver/"));
        assert!(config.logger.is_none());

        let config = Config::builder(PATH)
            .unwrap()
            .session_pool(1, 4)
            .begin_timeout(Duration::from_millis(250))
            .user_agent("app/1.0")
            .logger(Logger::disabled())
            .finish()
            .unwrap();
        assert_eq!(config.session_pool.max_opened, 4);
        assert_eq!(config.begin_timeout, Duration::from_millis(250));
        assert_eq!(config.user_agent, "app/1.0");
        assert!(config.logger.is_some());
    }

    #[test]
    fn builder_rejects_inverted_pool_bounds() {
        let err = Config::builder(PATH).unwrap().session_pool(5, 2).finish().unwrap_err();
        assert!(matches!(err, DriverError::Config(_)));
    }

    #[test]
    fn config_deserializes_from_json() {
        let config: Config = serde_json::from_str(
            r#"{"database": "projects/p/instances/i/databases/d", "begin_timeout_ms": 1500}"#,
        )
        .unwrap();
        assert_eq!(config.database.database(), "d");
        assert_eq!(config.begin_timeout, Duration::from_millis(1500));
        assert_eq!(config.session_pool, SessionPoolConfig::default());

        let bad = serde_json::from_str::<Config>(r#"{"database": "nope"}"#);
        assert!(bad.is_err());
    }
}
