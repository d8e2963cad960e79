use std::time::Duration;

/// Errors raised while reading [`EngineConfig`] from the environment.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{name} is required")]
    Missing { name: &'static str },

    #[error("{name} must be {expected}, got {value:?}")]
    Invalid {
        name: &'static str,
        expected: &'static str,
        value: String,
    },
}

/// Engine configuration loaded from environment variables.
///
/// All fields have defaults suitable for local development.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Connection pool size for the PostgreSQL store (default: `10`).
    pub db_max_connections: u32,
    /// Period of the full graph index rebuild (default: `300s`).
    pub index_rebuild_interval: Duration,
    /// Period of the unreviewed-count broadcast (default: `60s`).
    pub unreviewed_count_interval: Duration,
    /// Documents per page when scanning a collection (default: `500`).
    pub scan_page_size: usize,
    /// Documents per bulk write during a migration (default: `200`).
    pub migration_batch_size: usize,
    /// Hit limit for searches (default: `50`).
    pub search_limit: usize,
    /// Keep the previous article collection after a migration
    /// (default: `false`).
    pub retain_previous_collection: bool,
    /// Broadcast channel capacity of the event bus (default: `1024`).
    pub event_bus_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            db_max_connections: 10,
            index_rebuild_interval: Duration::from_secs(300),
            unreviewed_count_interval: Duration::from_secs(60),
            scan_page_size: 500,
            migration_batch_size: 200,
            search_limit: 50,
            retain_previous_collection: false,
            event_bus_capacity: 1024,
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                          | Default |
    /// |----------------------------------|---------|
    /// | `DB_MAX_CONNECTIONS`             | `10`    |
    /// | `INDEX_REBUILD_INTERVAL_SECS`    | `300`   |
    /// | `UNREVIEWED_COUNT_INTERVAL_SECS` | `60`    |
    /// | `SCAN_PAGE_SIZE`                 | `500`   |
    /// | `MIGRATION_BATCH_SIZE`           | `200`   |
    /// | `SEARCH_LIMIT`                   | `50`    |
    /// | `RETAIN_PREVIOUS_COLLECTION`     | `false` |
    /// | `EVENT_BUS_CAPACITY`             | `1024`  |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let env = Env { lookup: &lookup };

        Ok(Self {
            db_max_connections: env.number("DB_MAX_CONNECTIONS", defaults.db_max_connections)?,
            index_rebuild_interval: Duration::from_secs(env.positive(
                "INDEX_REBUILD_INTERVAL_SECS",
                defaults.index_rebuild_interval.as_secs(),
            )?),
            unreviewed_count_interval: Duration::from_secs(env.positive(
                "UNREVIEWED_COUNT_INTERVAL_SECS",
                defaults.unreviewed_count_interval.as_secs(),
            )?),
            scan_page_size: env.positive("SCAN_PAGE_SIZE", defaults.scan_page_size)?,
            migration_batch_size: env
                .positive("MIGRATION_BATCH_SIZE", defaults.migration_batch_size)?,
            search_limit: env.positive("SEARCH_LIMIT", defaults.search_limit)?,
            retain_previous_collection: env.flag(
                "RETAIN_PREVIOUS_COLLECTION",
                defaults.retain_previous_collection,
            )?,
            event_bus_capacity: env.positive("EVENT_BUS_CAPACITY", defaults.event_bus_capacity)?,
        })
    }
}

/// Read a required variable (e.g. `DATABASE_URL`).
pub fn required(name: &'static str) -> Result<String, ConfigError> {
    std::env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or(ConfigError::Missing { name })
}

struct Env<'a, F: Fn(&str) -> Option<String>> {
    lookup: &'a F,
}

impl<F: Fn(&str) -> Option<String>> Env<'_, F> {
    fn raw(&self, name: &str) -> Option<String> {
        (self.lookup)(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn number<T: std::str::FromStr>(&self, name: &'static str, default: T) -> Result<T, ConfigError> {
        match self.raw(name) {
            None => Ok(default),
            Some(value) => value.parse().map_err(|_| ConfigError::Invalid {
                name,
                expected: "a number",
                value,
            }),
        }
    }

    fn positive<T>(&self, name: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: std::str::FromStr + PartialOrd + Default,
    {
        let value = self.number(name, default)?;
        if value > T::default() {
            Ok(value)
        } else {
            Err(ConfigError::Invalid {
                name,
                expected: "a positive number",
                value: self.raw(name).unwrap_or_default(),
            })
        }
    }

    fn flag(&self, name: &'static str, default: bool) -> Result<bool, ConfigError> {
        match self.raw(name) {
            None => Ok(default),
            Some(value) => match value.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                _ => Err(ConfigError::Invalid {
                    name,
                    expected: "a boolean",
                    value,
                }),
            },
        }
    }
}
