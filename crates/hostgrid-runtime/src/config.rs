//! Environment-driven configuration and startup health checks.

use std::collections::HashMap;
use std::time::Duration;

use crate::credits::Credits;
use crate::invoker::InvokerConfig;
#[cfg(feature = "sqlite-persistence")]
use crate::sqlite_repository::SqliteComputeRepository;

const ENV_KEYS: [&str; 7] = [
    "HOSTGRID_STORAGE_BACKEND",
    "HOSTGRID_SQLITE_DB",
    "HOSTGRID_SERVER_ADDR",
    "HOSTGRID_INVOKE_TIMEOUT_MS",
    "HOSTGRID_CONNECT_TIMEOUT_MS",
    "HOSTGRID_DETECT_TIMEOUT_MS",
    "HOSTGRID_DEFAULT_COST_CREDITS",
];

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StorageBackend {
    Sqlite,
    Memory,
}

#[derive(Clone, Debug)]
pub struct HostgridConfig {
    pub backend: StorageBackend,
    pub sqlite_db_path: String,
    pub server_addr: String,
    pub invoke_timeout: Duration,
    pub connect_timeout: Duration,
    pub detect_timeout: Duration,
    /// Charged when a dispatch request omits `cost_credits`.
    pub default_cost: Credits,
}

impl Default for HostgridConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Sqlite,
            sqlite_db_path: "hostgrid.db".to_string(),
            server_addr: "127.0.0.1:8080".to_string(),
            invoke_timeout: Duration::from_millis(30_000),
            connect_timeout: Duration::from_millis(5_000),
            detect_timeout: Duration::from_millis(5_000),
            default_cost: Credits::from_whole(10),
        }
    }
}

impl HostgridConfig {
    pub fn from_env() -> Result<Self, String> {
        let mut envs = HashMap::new();
        for key in ENV_KEYS {
            if let Ok(value) = std::env::var(key) {
                envs.insert(key.to_string(), value);
            }
        }
        Self::from_env_map(&envs)
    }

    pub fn from_env_map(envs: &HashMap<String, String>) -> Result<Self, String> {
        let defaults = Self::default();
        let backend_raw = envs
            .get("HOSTGRID_STORAGE_BACKEND")
            .map(|v| v.trim().to_ascii_lowercase())
            .unwrap_or_else(|| "sqlite".to_string());
        let backend = match backend_raw.as_str() {
            "sqlite" => StorageBackend::Sqlite,
            "memory" => StorageBackend::Memory,
            other => {
                return Err(format!(
                    "invalid HOSTGRID_STORAGE_BACKEND='{}'. expected one of: sqlite, memory",
                    other
                ));
            }
        };

        let sqlite_db_path = non_empty(envs, "HOSTGRID_SQLITE_DB").unwrap_or(defaults.sqlite_db_path);
        let server_addr = non_empty(envs, "HOSTGRID_SERVER_ADDR").unwrap_or(defaults.server_addr);
        let invoke_timeout =
            parse_millis(envs, "HOSTGRID_INVOKE_TIMEOUT_MS")?.unwrap_or(defaults.invoke_timeout);
        let connect_timeout =
            parse_millis(envs, "HOSTGRID_CONNECT_TIMEOUT_MS")?.unwrap_or(defaults.connect_timeout);
        let detect_timeout =
            parse_millis(envs, "HOSTGRID_DETECT_TIMEOUT_MS")?.unwrap_or(defaults.detect_timeout);
        let default_cost = match non_empty(envs, "HOSTGRID_DEFAULT_COST_CREDITS") {
            Some(raw) => {
                let value: f64 = raw.parse().map_err(|_| {
                    format!("invalid HOSTGRID_DEFAULT_COST_CREDITS='{}': not a number", raw)
                })?;
                Credits::from_decimal(value)
                    .map_err(|e| format!("invalid HOSTGRID_DEFAULT_COST_CREDITS='{}': {}", raw, e))?
            }
            None => defaults.default_cost,
        };

        Ok(Self {
            backend,
            sqlite_db_path,
            server_addr,
            invoke_timeout,
            connect_timeout,
            detect_timeout,
            default_cost,
        })
    }

    pub fn invoker_config(&self) -> InvokerConfig {
        InvokerConfig::default()
            .with_timeout(self.invoke_timeout)
            .with_connect_timeout(self.connect_timeout)
    }

    pub fn startup_health_check(&self) -> Result<(), String> {
        match self.backend {
            StorageBackend::Memory => Ok(()),
            StorageBackend::Sqlite => self.sqlite_health_check(),
        }
    }

    #[cfg(feature = "sqlite-persistence")]
    fn sqlite_health_check(&self) -> Result<(), String> {
        SqliteComputeRepository::new(&self.sqlite_db_path).map_err(|e| {
            format!(
                "storage backend sqlite health check failed for HOSTGRID_SQLITE_DB='{}': {}",
                self.sqlite_db_path, e
            )
        })?;
        Ok(())
    }

    #[cfg(not(feature = "sqlite-persistence"))]
    fn sqlite_health_check(&self) -> Result<(), String> {
        Err(
            "HOSTGRID_STORAGE_BACKEND=sqlite requires feature 'sqlite-persistence'. Rebuild with --features \"sqlite-persistence\" or use HOSTGRID_STORAGE_BACKEND=memory."
                .to_string(),
        )
    }
}

fn non_empty(envs: &HashMap<String, String>, key: &str) -> Option<String> {
    envs.get(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_millis(envs: &HashMap<String, String>, key: &str) -> Result<Option<Duration>, String> {
    let Some(raw) = non_empty(envs, key) else {
        return Ok(None);
    };
    match raw.parse::<u64>() {
        Ok(0) => Err(format!("invalid {}='{}': must be greater than zero", key, raw)),
        Ok(ms) => Ok(Some(Duration::from_millis(ms))),
        Err(_) => Err(format!("invalid {}='{}': expected milliseconds", key, raw)),
    }
}
