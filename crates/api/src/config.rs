use std::str::FromStr;
use std::time::Duration;

use cylindria_comfyui::config::DispatcherConfig;
use cylindria_core::endpoint::parse_base_url;
use cylindria_core::error::CoreError;
use cylindria_core::types::MAX_DEVICES;

/// Server configuration loaded from environment variables.
///
/// All fields have defaults suitable for a single local backend.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `8000`).
    pub port: u16,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// Shared secret expected in `X-API-Key`. `None` disables the check.
    pub api_key: Option<String>,
    /// Backend addresses and listener timings.
    pub dispatcher: DispatcherConfig,
}

/// Invalid startup configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A variable is set but cannot be parsed or is out of range.
    #[error("{var} must be {expected}, got '{value}'")]
    Invalid {
        var: &'static str,
        expected: &'static str,
        value: String,
    },

    /// The backend base address was rejected.
    #[error(transparent)]
    Core(#[from] CoreError),
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                     | Default                  |
    /// |-----------------------------|--------------------------|
    /// | `HOST`                      | `0.0.0.0`                |
    /// | `PORT`                      | `8000`                   |
    /// | `COMFYUI_BASE_URL`          | `http://127.0.0.1:8188`  |
    /// | `GPU_COUNT`                 | `1`                      |
    /// | `CYLINDRIA_API_KEY`         | unset                    |
    /// | `REQUEST_TIMEOUT_SECS`      | `30`                     |
    /// | `FORWARD_TIMEOUT_MS`        | `2000`                   |
    /// | `PROBE_TIMEOUT_MS`          | `2000`                   |
    /// | `POLL_INTERVAL_MS`          | `2000`                   |
    /// | `ORPHAN_FAILURE_AFTER_SECS` | unset                    |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Same as [`ServerConfig::from_env`] but reading variables through
    /// `lookup`. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| {
            lookup(var)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let host = get("HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port: u16 = parse_var(&get, "PORT", 8000, "a valid port number")?;
        let request_timeout_secs: u64 =
            parse_var(&get, "REQUEST_TIMEOUT_SECS", 30, "a whole number of seconds")?;

        let base_url = parse_base_url(
            &get("COMFYUI_BASE_URL").unwrap_or_else(|| "http://127.0.0.1:8188".into()),
        )?;

        let device_count: usize = parse_var(&get, "GPU_COUNT", 1, "an integer between 1 and 8")?;
        if !(1..=MAX_DEVICES).contains(&device_count) {
            return Err(ConfigError::Invalid {
                var: "GPU_COUNT",
                expected: "an integer between 1 and 8",
                value: device_count.to_string(),
            });
        }

        let mut dispatcher = DispatcherConfig::new(base_url, device_count);
        dispatcher.forward_timeout = Duration::from_millis(parse_var(
            &get,
            "FORWARD_TIMEOUT_MS",
            2000,
            "a whole number of milliseconds",
        )?);
        dispatcher.probe_timeout = Duration::from_millis(parse_var(
            &get,
            "PROBE_TIMEOUT_MS",
            2000,
            "a whole number of milliseconds",
        )?);
        dispatcher.poll_interval = Duration::from_millis(parse_var(
            &get,
            "POLL_INTERVAL_MS",
            2000,
            "a whole number of milliseconds",
        )?);
        dispatcher.poll_timeout = dispatcher.forward_timeout;
        dispatcher.orphan_failure_after = match get("ORPHAN_FAILURE_AFTER_SECS") {
            Some(_) => Some(Duration::from_secs(parse_var(
                &get,
                "ORPHAN_FAILURE_AFTER_SECS",
                0,
                "a whole number of seconds",
            )?)),
            None => None,
        };

        Ok(Self {
            host,
            port,
            request_timeout_secs,
            api_key: get("CYLINDRIA_API_KEY"),
            dispatcher,
        })
    }
}

fn parse_var<T, G>(get: &G, var: &'static str, default: T, expected: &'static str) -> Result<T, ConfigError>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(var) {
        Some(value) => value.parse().map_err(|_| ConfigError::Invalid {
            var,
            expected,
            value,
        }),
        None => Ok(default),
    }
}
