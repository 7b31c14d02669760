//! Environment-driven configuration, in the shape of `RuntimeConfig`'s
//! `dotenvy`-then-`env::var`-with-defaults pattern.

use std::time::Duration;

/// Selects which `IndexingStore`/`RpcCacheStore` backend a [`StoreConfig`]
/// resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    #[cfg(feature = "sqlite")]
    Sqlite,
    #[cfg(feature = "postgres")]
    Postgres,
}

/// Pool-sizing knobs shared by both store backends.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoolOptions {
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout: Duration,
    pub statement_cache_capacity: usize,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 1,
            connect_timeout: Duration::from_secs(30),
            statement_cache_capacity: 100,
        }
    }
}

/// Top-level configuration for a `chainloom` runtime: database connection,
/// rate limiting, and query-surface limits.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub database_url: String,
    pub pool: PoolOptions,
    /// Prefix used for private per-run schemas, e.g. `ponder` -> `ponder_<tag>`.
    pub namespace_prefix: String,
    /// Requests per second allowed through the `RequestQueue`.
    pub rate_limit_rps: u32,
    /// Hard cap on `findMany` page size.
    pub max_page_size: u32,
}

impl StoreConfig {
    const DEFAULT_DB_NAME: &'static str = "chainloom.db";
    const DEFAULT_NAMESPACE_PREFIX: &'static str = "ponder";
    const DEFAULT_RATE_LIMIT_RPS: u32 = 50;
    const DEFAULT_MAX_PAGE_SIZE: u32 = 1000;

    fn resolve_database_url(provided: Option<String>) -> String {
        if let Some(url) = provided {
            return url;
        }
        dotenvy::dotenv().ok();
        std::env::var("DATABASE_URL").unwrap_or_else(|_| format!("sqlite://{}", Self::DEFAULT_DB_NAME))
    }

    #[must_use]
    pub fn new(database_url: Option<String>) -> Self {
        dotenvy::dotenv().ok();
        Self {
            database_url: Self::resolve_database_url(database_url),
            pool: PoolOptions::default(),
            namespace_prefix: std::env::var("CHAINLOOM_NAMESPACE_PREFIX")
                .unwrap_or_else(|_| Self::DEFAULT_NAMESPACE_PREFIX.to_string()),
            rate_limit_rps: std::env::var("CHAINLOOM_RATE_LIMIT_RPS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(Self::DEFAULT_RATE_LIMIT_RPS),
            max_page_size: std::env::var("CHAINLOOM_MAX_PAGE_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(Self::DEFAULT_MAX_PAGE_SIZE),
        }
    }

    #[must_use]
    pub fn with_pool(mut self, pool: PoolOptions) -> Self {
        self.pool = pool;
        self
    }

    #[must_use]
    pub fn with_rate_limit_rps(mut self, rps: u32) -> Self {
        self.rate_limit_rps = rps;
        self
    }

    #[must_use]
    pub fn with_max_page_size(mut self, size: u32) -> Self {
        self.max_page_size = size;
        self
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::new(None)
    }
}
