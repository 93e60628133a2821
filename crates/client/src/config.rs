use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ClientError;
use crate::progress::ReconnectPolicy;

/// Client configuration loaded from environment variables.
///
/// All fields have defaults suitable for a service running locally on
/// its development port.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the processing service (default: `http://localhost:8000`).
    pub api_url: String,
    /// Timeout for submission, upload and export requests (default: `300`s).
    /// The progress stream is long-lived and not subject to it.
    pub request_timeout: Duration,
    /// TCP connect timeout for every request (default: `10`s).
    pub connect_timeout: Duration,
    /// Reconnect attempts after the progress stream drops (default: `3`).
    pub stream_reconnects: u32,
    /// Directory where retrieved artifacts are saved (default: `.`).
    pub output_dir: PathBuf,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:8000".into(),
            request_timeout: Duration::from_secs(300),
            connect_timeout: Duration::from_secs(10),
            stream_reconnects: 3,
            output_dir: PathBuf::from("."),
        }
    }
}

impl ClientConfig {
    /// Load configuration from the process environment.
    ///
    /// | Env Var                       | Default                 |
    /// |-------------------------------|-------------------------|
    /// | `XLPROC_API_URL`              | `http://localhost:8000` |
    /// | `XLPROC_REQUEST_TIMEOUT_SECS` | `300`                   |
    /// | `XLPROC_CONNECT_TIMEOUT_SECS` | `10`                    |
    /// | `XLPROC_STREAM_RECONNECTS`    | `3`                     |
    /// | `XLPROC_OUTPUT_DIR`           | `.`                     |
    pub fn from_env() -> Result<Self, ClientError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ClientError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let api_url = lookup("XLPROC_API_URL")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or(defaults.api_url);

        let request_timeout_secs: u64 = parse_var(
            &lookup,
            "XLPROC_REQUEST_TIMEOUT_SECS",
            defaults.request_timeout.as_secs(),
        )?;
        let connect_timeout_secs: u64 = parse_var(
            &lookup,
            "XLPROC_CONNECT_TIMEOUT_SECS",
            defaults.connect_timeout.as_secs(),
        )?;
        let stream_reconnects: u32 =
            parse_var(&lookup, "XLPROC_STREAM_RECONNECTS", defaults.stream_reconnects)?;

        let output_dir = lookup("XLPROC_OUTPUT_DIR")
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or(defaults.output_dir);

        Ok(Self {
            api_url,
            request_timeout: Duration::from_secs(request_timeout_secs),
            connect_timeout: Duration::from_secs(connect_timeout_secs),
            stream_reconnects,
            output_dir,
        })
    }

    /// Reconnect policy for the progress stream.
    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            max_attempts: self.stream_reconnects,
            ..Default::default()
        }
    }

    /// Build the shared HTTP client. Per-request timeouts are applied by
    /// [`ProcessorApi`](crate::api::ProcessorApi) so the progress stream
    /// can stay open indefinitely.
    pub fn http_client(&self) -> Result<reqwest::Client, ClientError> {
        reqwest::Client::builder()
            .connect_timeout(self.connect_timeout)
            .build()
            .map_err(|e| ClientError::Config(format!("Failed to build HTTP client: {e}")))
    }
}

fn parse_var<T, F>(lookup: &F, key: &str, default: T) -> Result<T, ClientError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|e| ClientError::Config(format!("{key} must be a valid number: {e}"))),
        _ => Ok(default),
    }
}
