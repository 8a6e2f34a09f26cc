use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub environment: Environment,
    pub database: DatabaseConfig,
    pub tenancy: TenancyConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
    /// Role granted usage/privileges on every tenant namespace.
    pub app_role: String,
    /// Mandatory per-session statement timeout for provisioning work.
    pub statement_timeout_ms: u64,
    /// Mandatory per-session lock-wait timeout for provisioning work.
    pub lock_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenancyConfig {
    /// Request path prefixes that never receive tenant context.
    pub public_path_prefixes: Vec<String>,
    /// Routes mounted under this prefix are marked post-onboarding, which
    /// allows inline namespace creation instead of deferral.
    pub dashboard_path_prefix: String,
    pub reconcile_interval_secs: u64,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let environment = match env::var("APP_ENV").as_deref() {
            Ok("production") | Ok("prod") => Environment::Production,
            Ok("staging") | Ok("stage") => Environment::Staging,
            _ => Environment::Development,
        };

        // Set defaults based on environment, then override with specific env vars
        match environment {
            Environment::Production => Self::production(),
            Environment::Staging => Self::staging(),
            Environment::Development => Self::development(),
        }
        .with_env_overrides()
    }

    fn with_env_overrides(mut self) -> Self {
        // Database overrides
        if let Ok(v) = env::var("DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = v.parse().unwrap_or(self.database.max_connections);
        }
        if let Ok(v) = env::var("DATABASE_ACQUIRE_TIMEOUT_SECS") {
            self.database.acquire_timeout_secs = v.parse().unwrap_or(self.database.acquire_timeout_secs);
        }
        if let Ok(v) = env::var("DATABASE_APP_ROLE") {
            self.database.app_role = v;
        }
        if let Ok(v) = env::var("DATABASE_STATEMENT_TIMEOUT_MS") {
            self.database.statement_timeout_ms = v.parse().unwrap_or(self.database.statement_timeout_ms);
        }
        if let Ok(v) = env::var("DATABASE_LOCK_TIMEOUT_MS") {
            self.database.lock_timeout_ms = v.parse().unwrap_or(self.database.lock_timeout_ms);
        }

        // Tenancy overrides
        if let Ok(v) = env::var("TENANCY_PUBLIC_PATH_PREFIXES") {
            self.tenancy.public_path_prefixes = v.split(',').map(|s| s.trim().to_string()).collect();
        }
        if let Ok(v) = env::var("TENANCY_DASHBOARD_PATH_PREFIX") {
            self.tenancy.dashboard_path_prefix = v;
        }
        if let Ok(v) = env::var("TENANCY_RECONCILE_INTERVAL_SECS") {
            self.tenancy.reconcile_interval_secs = v.parse().unwrap_or(self.tenancy.reconcile_interval_secs);
        }

        self
    }

    fn development() -> Self {
        Self {
            environment: Environment::Development,
            database: DatabaseConfig {
                max_connections: 10,
                acquire_timeout_secs: 30,
                app_role: "trellis_app".to_string(),
                statement_timeout_ms: 15_000,
                lock_timeout_ms: 5_000,
            },
            tenancy: TenancyConfig {
                public_path_prefixes: vec![
                    "/health".to_string(),
                    "/auth".to_string(),
                ],
                dashboard_path_prefix: "/api/dashboard".to_string(),
                reconcile_interval_secs: 300,
            },
        }
    }

    fn staging() -> Self {
        Self {
            environment: Environment::Staging,
            database: DatabaseConfig {
                max_connections: 20,
                acquire_timeout_secs: 10,
                app_role: "trellis_app".to_string(),
                statement_timeout_ms: 10_000,
                lock_timeout_ms: 3_000,
            },
            tenancy: TenancyConfig {
                public_path_prefixes: vec![
                    "/health".to_string(),
                    "/auth".to_string(),
                ],
                dashboard_path_prefix: "/api/dashboard".to_string(),
                reconcile_interval_secs: 600,
            },
        }
    }

    fn production() -> Self {
        Self {
            environment: Environment::Production,
            database: DatabaseConfig {
                max_connections: 50,
                acquire_timeout_secs: 5,
                app_role: "trellis_app".to_string(),
                statement_timeout_ms: 10_000,
                lock_timeout_ms: 2_000,
            },
            tenancy: TenancyConfig {
                public_path_prefixes: vec![
                    "/health".to_string(),
                    "/auth".to_string(),
                ],
                dashboard_path_prefix: "/api/dashboard".to_string(),
                reconcile_interval_secs: 900,
            },
        }
    }
}

// Global singleton config - initialized once at startup
pub static CONFIG: Lazy<AppConfig> = Lazy::new(AppConfig::from_env);

// Convenience function for accessing config
pub fn config() -> &'static AppConfig {
    &CONFIG
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_development_config() {
        let config = AppConfig::development();
        assert_eq!(config.database.max_connections, 10);
        assert_eq!(config.database.statement_timeout_ms, 15_000);
        assert!(config.tenancy.public_path_prefixes.contains(&"/health".to_string()));
    }

    #[test]
    fn test_default_production_config() {
        let config = AppConfig::production();
        assert_eq!(config.database.lock_timeout_ms, 2_000);
        assert_eq!(config.tenancy.reconcile_interval_secs, 900);
    }

    #[test]
    fn test_timeouts_always_positive() {
        for config in [AppConfig::development(), AppConfig::staging(), AppConfig::production()] {
            assert!(config.database.statement_timeout_ms > 0);
            assert!(config.database.lock_timeout_ms > 0);
        }
    }
}
