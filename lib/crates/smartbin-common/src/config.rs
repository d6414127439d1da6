use serde::Deserialize;

use crate::paths::timing;
use crate::types::BinLocation;

/// Environment prefix shared by the server and the CLI.
pub const ENV_PREFIX: &str = "SMARTBIN_";

/// Store updates that may wait for the single writer.
pub const DEFAULT_WRITE_QUEUE: usize = 32;

/// Which remote state store implementation to use
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Firebase,
    Valkey,
    Memory,
}

/// What happens to a pending auto-close when a new classification arrives
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum CyclePolicy {
    /// Every classification runs its own open/close timeline.
    #[default]
    Independent,
    /// A new classification cancels the previous pending close.
    SingleActive,
}

/// Remote store settings, loaded from `SMARTBIN_*` env vars via `envy`.
///
///   - `SMARTBIN_STORE_BACKEND`        firebase | valkey | memory (default firebase)
///   - `SMARTBIN_FIREBASE_URL`         database URL (required for firebase)
///   - `SMARTBIN_FIREBASE_AUTH_FILE`   optional path to a database secret / token
///   - `SMARTBIN_VALKEY_URL`           (default `redis://valkey:6379`)
///   - `SMARTBIN_VALKEY_USER`          optional ACL user
///   - `SMARTBIN_VALKEY_PASS_FILE`     optional path to the ACL password
///   - `SMARTBIN_VALKEY_CA`            optional CA cert, enables TLS
///   - `SMARTBIN_VALKEY_CLIENT_CERT`   optional client cert (mTLS)
///   - `SMARTBIN_VALKEY_CLIENT_KEY`    optional client key (mTLS)
///   - `SMARTBIN_STORE_TIMEOUT_SECS`   (default 5)
#[derive(Debug, Clone, Deserialize)]
pub struct StoreSettings {
    #[serde(default)]
    pub store_backend: StoreBackend,

    pub firebase_url: Option<String>,

    pub firebase_auth_file: Option<String>,

    #[serde(default = "default_valkey_url")]
    pub valkey_url: String,

    pub valkey_user: Option<String>,

    pub valkey_pass_file: Option<String>,

    pub valkey_ca: Option<String>,

    pub valkey_client_cert: Option<String>,

    pub valkey_client_key: Option<String>,

    #[serde(default = "default_store_timeout_secs")]
    pub store_timeout_secs: u64,
}

impl StoreSettings {
    /// Reject settings that would make every store call fail.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.store_timeout_secs == 0 {
            return Err("SMARTBIN_STORE_TIMEOUT_SECS must be greater than 0");
        }
        Ok(())
    }
}

/// HTTP server settings, loaded from the same `SMARTBIN_*` env vars.
///
///   - `SMARTBIN_LISTEN_ADDR`          (default `0.0.0.0:8080`)
///   - `SMARTBIN_MODEL_URL`            model server predict endpoint
///   - `SMARTBIN_MODEL_TIMEOUT_SECS`   (default 30)
///   - `SMARTBIN_DWELL_SECS`           lid open window (default 10)
///   - `SMARTBIN_CYCLE_POLICY`         independent | single_active
///   - `SMARTBIN_WRITE_QUEUE`         pending store updates (default 32)
///   - `SMARTBIN_MAX_UPLOAD_BYTES`     (default 5 MiB)
///   - `SMARTBIN_BIN_LATITUDE` / `SMARTBIN_BIN_LONGITUDE`
///   - `SMARTBIN_TLS_CERT` / `SMARTBIN_TLS_KEY` (enable HTTPS when both set)
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    #[serde(default = "default_model_url")]
    pub model_url: String,

    #[serde(default = "default_model_timeout_secs")]
    pub model_timeout_secs: u64,

    #[serde(default = "default_dwell_secs")]
    pub dwell_secs: u64,

    #[serde(default)]
    pub cycle_policy: CyclePolicy,

    #[serde(default = "default_write_queue")]
    pub write_queue: usize,

    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,

    #[serde(default = "default_latitude")]
    pub bin_latitude: f64,

    #[serde(default = "default_longitude")]
    pub bin_longitude: f64,

    pub tls_cert: Option<String>,

    pub tls_key: Option<String>,
}

impl ServerConfig {
    /// Reject values that would break the open/close cycle or the
    /// classification path.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.dwell_secs == 0 {
            return Err("SMARTBIN_DWELL_SECS must be greater than 0");
        }
        if self.model_timeout_secs == 0 {
            return Err("SMARTBIN_MODEL_TIMEOUT_SECS must be greater than 0");
        }
        if self.write_queue == 0 {
            return Err("SMARTBIN_WRITE_QUEUE must be greater than 0");
        }
        if self.max_upload_bytes == 0 {
            return Err("SMARTBIN_MAX_UPLOAD_BYTES must be greater than 0");
        }
        Ok(())
    }

    #[must_use]
    pub fn bin_location(&self) -> BinLocation {
        BinLocation {
            latitude: self.bin_latitude,
            longitude: self.bin_longitude,
        }
    }
}

fn default_valkey_url() -> String {
    "redis://valkey:6379".to_string()
}

fn default_store_timeout_secs() -> u64 {
    timing::DEFAULT_STORE_TIMEOUT_SECS
}

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_model_url() -> String {
    "http://model-server:8501/v1/models/waste:predict".to_string()
}

fn default_model_timeout_secs() -> u64 {
    timing::DEFAULT_MODEL_TIMEOUT_SECS
}

fn default_dwell_secs() -> u64 {
    timing::DEFAULT_DWELL_SECS
}

fn default_write_queue() -> usize {
    DEFAULT_WRITE_QUEUE
}

fn default_max_upload_bytes() -> usize {
    5 * 1024 * 1024
}

fn default_latitude() -> f64 {
    13.005_459
}

fn default_longitude() -> f64 {
    77.569_199
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            store_backend: StoreBackend::default(),
            firebase_url: None,
            firebase_auth_file: None,
            valkey_url: default_valkey_url(),
            valkey_user: None,
            valkey_pass_file: None,
            valkey_ca: None,
            valkey_client_cert: None,
            valkey_client_key: None,
            store_timeout_secs: default_store_timeout_secs(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            model_url: default_model_url(),
            model_timeout_secs: default_model_timeout_secs(),
            dwell_secs: default_dwell_secs(),
            cycle_policy: CyclePolicy::default(),
            write_queue: default_write_queue(),
            max_upload_bytes: default_max_upload_bytes(),
            bin_latitude: default_latitude(),
            bin_longitude: default_longitude(),
            tls_cert: None,
            tls_key: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_default_listen_addr() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.listen_addr, "0.0.0.0:8080");
    }

    #[test]
    fn server_default_dwell_is_ten_seconds() {
        assert_eq!(ServerConfig::default().dwell_secs, 10);
    }

    #[test]
    fn server_default_policy_is_independent() {
        assert_eq!(ServerConfig::default().cycle_policy, CyclePolicy::Independent);
    }

    #[test]
    fn server_default_upload_limit() {
        assert_eq!(ServerConfig::default().max_upload_bytes, 5 * 1024 * 1024);
    }

    #[test]
    fn server_default_location() {
        let location = ServerConfig::default().bin_location();
        assert!((location.latitude - 13.005_459).abs() < f64::EPSILON);
        assert!((location.longitude - 77.569_199).abs() < f64::EPSILON);
    }

    #[test]
    fn store_default_backend_is_firebase() {
        let cfg = StoreSettings::default();
        assert_eq!(cfg.store_backend, StoreBackend::Firebase);
        assert_eq!(cfg.valkey_url, "redis://valkey:6379");
        assert_eq!(cfg.store_timeout_secs, 5);
    }

    #[test]
    fn defaults_pass_validation() {
        assert!(ServerConfig::default().validate().is_ok());
        assert!(StoreSettings::default().validate().is_ok());
    }

    #[test]
    fn zero_store_timeout_is_rejected() {
        let settings = StoreSettings {
            store_timeout_secs: 0,
            ..StoreSettings::default()
        };
        assert!(settings.validate().unwrap_err().contains("STORE_TIMEOUT_SECS"));
    }

    #[test]
    fn zero_dwell_is_rejected() {
        let config = ServerConfig {
            dwell_secs: 0,
            ..ServerConfig::default()
        };
        assert!(config.validate().unwrap_err().contains("DWELL_SECS"));
    }

    #[test]
    fn zero_write_queue_and_model_timeout_are_rejected() {
        let config = ServerConfig {
            write_queue: 0,
            ..ServerConfig::default()
        };
        assert!(config.validate().unwrap_err().contains("WRITE_QUEUE"));
        let config = ServerConfig {
            model_timeout_secs: 0,
            ..ServerConfig::default()
        };
        assert!(config.validate().unwrap_err().contains("MODEL_TIMEOUT_SECS"));
    }

    #[test]
    fn policy_wire_names() {
        let policy: CyclePolicy = serde_json::from_str("\"single_active\"").unwrap();
        assert_eq!(policy, CyclePolicy::SingleActive);
        let backend: StoreBackend = serde_json::from_str("\"memory\"").unwrap();
        assert_eq!(backend, StoreBackend::Memory);
    }
}
