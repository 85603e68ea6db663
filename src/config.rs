use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use thiserror::Error;

use crate::access::AccessPolicy;
use crate::crypto::PBKDF2_ITERATIONS;

/// Application-level constants
pub const APP_NAME: &str = "Homecare";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

const ENV_PREFIX: &str = "HOMECARE_";

/// Default `tracing` filter when `RUST_LOG` is unset.
pub fn default_log_filter() -> &'static str {
    "homecare=info,tower_http=info"
}

/// Get the application data directory: `~/Homecare/`, or `./homecare-data`
/// when no home directory can be determined.
pub fn app_data_dir() -> PathBuf {
    match dirs::home_dir() {
        Some(home) => home.join(APP_NAME),
        None => PathBuf::from("homecare-data"),
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for {var}: {value}")]
    InvalidValue { var: String, value: String },
}

/// Which content generator backs summaries, analyses and drafted messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeneratorBackend {
    Template,
    Ollama { base_url: String, model: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub bind_addr: SocketAddr,
    pub access_token_minutes: i64,
    pub refresh_token_days: i64,
    pub password_iterations: u32,
    pub generator: GeneratorBackend,
    pub extraction_workers: usize,
    pub ocr_command: String,
    pub auto_summarize_on_end: bool,
    pub policy: AccessPolicy,
    pub rate_per_minute: u32,
    pub rate_per_hour: u32,
    pub max_upload_bytes: usize,
    pub audit_retention_days: i64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: app_data_dir(),
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8000)),
            access_token_minutes: 30,
            refresh_token_days: 7,
            password_iterations: PBKDF2_ITERATIONS,
            generator: GeneratorBackend::Template,
            extraction_workers: 2,
            ocr_command: "tesseract".into(),
            auto_summarize_on_end: false,
            policy: AccessPolicy::default(),
            rate_per_minute: 100,
            rate_per_hour: 1000,
            max_upload_bytes: 25 * 1024 * 1024,
            audit_retention_days: 90,
        }
    }
}

impl Config {
    /// Read `HOMECARE_*` environment variables over the defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary variable source (keys include the prefix).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |name: &str| lookup(&format!("{ENV_PREFIX}{name}")).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(dir) = get("DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        parse_into(&get, "BIND", &mut config.bind_addr)?;
        parse_into(&get, "ACCESS_TOKEN_MINUTES", &mut config.access_token_minutes)?;
        parse_into(&get, "REFRESH_TOKEN_DAYS", &mut config.refresh_token_days)?;
        parse_into(&get, "PASSWORD_ITERATIONS", &mut config.password_iterations)?;
        parse_into(&get, "EXTRACTION_WORKERS", &mut config.extraction_workers)?;
        if let Some(cmd) = get("OCR_COMMAND") {
            config.ocr_command = cmd;
        }
        parse_bool(&get, "AUTO_SUMMARIZE_ON_END", &mut config.auto_summarize_on_end)?;
        parse_bool(
            &get,
            "ENFORCE_PATIENT_OWNERSHIP",
            &mut config.policy.enforce_patient_ownership,
        )?;
        parse_bool(
            &get,
            "ADMIN_ONLY_ROLE_ASSIGNMENT",
            &mut config.policy.admin_only_role_assignment,
        )?;
        parse_into(&get, "RATE_PER_MINUTE", &mut config.rate_per_minute)?;
        parse_into(&get, "RATE_PER_HOUR", &mut config.rate_per_hour)?;
        let mut max_upload_mb = config.max_upload_bytes / (1024 * 1024);
        parse_into(&get, "MAX_UPLOAD_MB", &mut max_upload_mb)?;
        config.max_upload_bytes = max_upload_mb * 1024 * 1024;
        parse_into(&get, "AUDIT_RETENTION_DAYS", &mut config.audit_retention_days)?;

        match get("GENERATOR").as_deref() {
            None | Some("template") => {}
            Some("ollama") => {
                config.generator = GeneratorBackend::Ollama {
                    base_url: get("OLLAMA_URL").unwrap_or_else(|| "http://localhost:11434".into()),
                    model: get("OLLAMA_MODEL").unwrap_or_else(|| "llama3".into()),
                };
            }
            Some(other) => {
                return Err(ConfigError::InvalidValue {
                    var: format!("{ENV_PREFIX}GENERATOR"),
                    value: other.into(),
                })
            }
        }

        Ok(config)
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("homecare.db")
    }

    /// Directory of the uploaded-file store.
    pub fn files_dir(&self) -> PathBuf {
        self.data_dir.join("files")
    }
}

fn parse_into<T: FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    name: &str,
    slot: &mut T,
) -> Result<(), ConfigError> {
    if let Some(raw) = get(name) {
        *slot = raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
            var: format!("{ENV_PREFIX}{name}"),
            value: raw.clone(),
        })?;
    }
    Ok(())
}

fn parse_bool(
    get: &impl Fn(&str) -> Option<String>,
    name: &str,
    slot: &mut bool,
) -> Result<(), ConfigError> {
    if let Some(raw) = get(name) {
        *slot = match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => {
                return Err(ConfigError::InvalidValue {
                    var: format!("{ENV_PREFIX}{name}"),
                    value: raw,
                })
            }
        };
    }
    Ok(())
}
