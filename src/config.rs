use anyhow::{Context, Result};
use keyring::Entry;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_API_URL: &str = "http://localhost:5000";
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

const ENV_API_URL: &str = "NSIGHT_API_URL";
const ENV_TIMEOUT_SECS: &str = "NSIGHT_TIMEOUT_SECS";
const ENV_API_KEY_REF: &str = "NSIGHT_API_KEY_REF";
const ENV_DB_PATH: &str = "NSIGHT_DB_PATH";

const KEYRING_SERVICE: &str = "nsight_api_key";
const KEYRING_USER: &str = "backend";

/// Client settings, read from the environment.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub api_url: String,
    /// Upper bound on a single `/api/query` round trip.
    pub query_timeout: Duration,
    pub connect_timeout: Duration,
    /// Where the backend token lives: `env:VAR_NAME`, `keyring`, or nothing.
    pub api_key_ref: Option<String>,
    /// SQLite file for headless use; the desktop shell uses its own store.
    pub db_path: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            query_timeout: DEFAULT_QUERY_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            api_key_ref: None,
            db_path: None,
        }
    }
}

impl ClientConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the config from any variable source; unset or blank values keep defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        let mut config = Self::default();

        if let Some(url) = get(ENV_API_URL) {
            config.api_url = url.trim().to_string();
        }
        if let Some(secs) = get(ENV_TIMEOUT_SECS) {
            let secs: u64 = secs
                .trim()
                .parse()
                .with_context(|| format!("{} must be a whole number of seconds, got '{}'", ENV_TIMEOUT_SECS, secs))?;
            config.query_timeout = Duration::from_secs(secs);
        }
        config.api_key_ref = get(ENV_API_KEY_REF);
        config.db_path = get(ENV_DB_PATH).map(PathBuf::from);

        log::debug!("Loaded client config: {:?}", config);
        Ok(config)
    }

    /// Resolves the backend token named by `api_key_ref`.
    pub fn api_key(&self) -> Result<Option<String>> {
        match self.api_key_ref.as_deref() {
            None => Ok(None),
            Some(ref_str) if ref_str.starts_with("env:") => {
                let env_var_name = ref_str.trim_start_matches("env:");
                log::debug!("Retrieving API key from environment variable: {}", env_var_name);
                std::env::var(env_var_name).map(Some).context(format!(
                    "Failed to get API key from environment variable '{}'",
                    env_var_name
                ))
            }
            Some("keyring") => {
                let entry = Entry::new(KEYRING_SERVICE, KEYRING_USER)
                    .context("Failed to create keyring entry")?;
                log::debug!("Retrieving API key from keyring for service: {}", KEYRING_SERVICE);
                entry
                    .get_password()
                    .map(Some)
                    .context("Failed to get API key from keyring. Please set it in settings.")
            }
            Some(other) => Err(anyhow::anyhow!("Unsupported api_key_ref format: {}", other)),
        }
    }
}

/// Stores the backend token in the OS keyring.
pub fn set_api_key_in_keyring(api_key: &str) -> Result<()> {
    let entry = Entry::new(KEYRING_SERVICE, KEYRING_USER)
        .context("Failed to create keyring entry for setting password")?;
    log::info!("Setting API key in keyring for service: {}", KEYRING_SERVICE);
    entry
        .set_password(api_key)
        .context("Failed to set API key in keyring")
}
