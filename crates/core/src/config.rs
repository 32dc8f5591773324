use serde::{Deserialize, Serialize};
use std::{fmt, path::PathBuf, str::FromStr};

pub const DEFAULT_STREAM_THRESHOLD: u64 = 1600;
pub const DEFAULT_WORKER_THREADS: usize = 4;
pub const DEFAULT_CACHE_DIR_NAME: &str = "ali_file_cache";
pub const ENV_APP_KEY: &str = "ALI_APP_KEY";
pub const ENV_ACCESS_KEY: &str = "ALI_ACCESS_KEY";
pub const ENV_KEY_SECRET: &str = "ALI_KEY_SECRET";
pub const ENV_STATIC_TOKEN: &str = "ALI_NLS_TOKEN";
pub const ENV_CACHE_PATH: &str = "TTS_CACHE_PATH";
pub const ENV_STREAM_THRESHOLD: &str = "TTS_CACHE_THRESHOLD";
pub const ENV_WORKER_THREADS: &str = "TTS_WORKER_THREADS";
pub const ENV_SYNTH_URL: &str = "TTS_SYNTH_URL";
pub const ENV_TOKEN_URL: &str = "TTS_TOKEN_URL";

/// A credential that never shows up in logs.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Secret(String);

impl Secret {
    pub fn new<S: Into<String>>(value: S) -> Result<Self, ConfigError> {
        let v = value.into();
        if v.trim().is_empty() {
            return Err(ConfigError::EmptySecret);
        }
        Ok(Self(v))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(**redacted**)")
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Credentials {
    pub app_key: Secret,
    pub access_key: Secret,
    pub key_secret: Secret,
}

impl Credentials {
    /// All three keys are required; a missing one is reported by name.
    pub fn from_parts(
        app_key: Option<Secret>,
        access_key: Option<Secret>,
        key_secret: Option<Secret>,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            app_key: app_key.ok_or(ConfigError::MissingCredential(ENV_APP_KEY))?,
            access_key: access_key.ok_or(ConfigError::MissingCredential(ENV_ACCESS_KEY))?,
            key_secret: key_secret.ok_or(ConfigError::MissingCredential(ENV_KEY_SECRET))?,
        })
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct StreamThreshold(u64);

impl StreamThreshold {
    pub fn new(bytes: u64) -> Result<Self, ConfigError> {
        if bytes == 0 {
            return Err(ConfigError::ZeroThreshold);
        }
        Ok(Self(bytes))
    }

    pub fn bytes(&self) -> u64 {
        self.0
    }
}

impl Default for StreamThreshold {
    fn default() -> Self {
        Self(DEFAULT_STREAM_THRESHOLD)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CacheConfig {
    pub credentials: Credentials,
    pub cache_root: PathBuf,
    pub stream_threshold: StreamThreshold,
    pub worker_threads: usize,
}

impl CacheConfig {
    pub fn new(credentials: Credentials, cache_root: PathBuf) -> Self {
        Self {
            credentials,
            cache_root,
            stream_threshold: StreamThreshold::default(),
            worker_threads: DEFAULT_WORKER_THREADS,
        }
    }

    pub fn with_stream_threshold(mut self, threshold: StreamThreshold) -> Self {
        self.stream_threshold = threshold;
        self
    }

    pub fn with_worker_threads(mut self, worker_threads: usize) -> Result<Self, ConfigError> {
        if worker_threads == 0 {
            return Err(ConfigError::ZeroWorkerThreads);
        }
        self.worker_threads = worker_threads;
        Ok(self)
    }

    /// Creates the cache root (and its ancestors). Run once at startup.
    pub fn prepare(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.cache_root).map_err(|e| ConfigError::CacheRoot {
            path: self.cache_root.clone(),
            reason: e.to_string(),
        })
    }
}

pub fn default_cache_root() -> PathBuf {
    dirs::cache_dir()
        .map(|d| d.join(DEFAULT_CACHE_DIR_NAME))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CACHE_DIR_NAME))
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("credential must not be empty")]
    EmptySecret,
    #[error("missing credential (set {0} or pass it on the command line)")]
    MissingCredential(&'static str),
    #[error("stream threshold must be >= 1 byte")]
    ZeroThreshold,
    #[error("worker thread count must be >= 1")]
    ZeroWorkerThreads,
    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
    #[error("cache root {path} is not usable: {reason}")]
    CacheRoot { path: PathBuf, reason: String },
}

pub trait Env {
    fn var(&self, key: &str) -> Option<String>;
}

#[derive(Clone, Debug, Default)]
pub struct StdEnv;

impl Env for StdEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

#[derive(Clone, Debug, Default)]
pub struct MapEnv {
    vars: std::collections::BTreeMap<String, String>,
}

impl MapEnv {
    pub fn with_var(mut self, key: &str, value: &str) -> Self {
        self.vars.insert(key.to_owned(), value.to_owned());
        self
    }
}

impl Env for MapEnv {
    fn var(&self, key: &str) -> Option<String> {
        self.vars.get(key).cloned()
    }
}

pub fn resolve_secret(
    cli_value: Option<String>,
    env_key: &str,
    env: &impl Env,
) -> Result<Option<Secret>, ConfigError> {
    match cli_value {
        Some(v) => Ok(Some(Secret::new(v)?)),
        None => match env.var(env_key) {
            Some(v) => Ok(Some(Secret::new(v)?)),
            None => Ok(None),
        },
    }
}

pub fn resolve_string_with_default(
    cli_value: Option<String>,
    env_key: &str,
    env: &impl Env,
    default: &str,
) -> String {
    match cli_value {
        Some(v) => v,
        None => env.var(env_key).unwrap_or_else(|| default.to_owned()),
    }
}

pub fn resolve_optional_string(
    cli_value: Option<String>,
    env_key: &str,
    env: &impl Env,
) -> Option<String> {
    match cli_value {
        Some(v) => Some(v),
        None => env.var(env_key),
    }
}

/// CLI value, then a parsed env var, then `default`. A malformed env var is an error, not a fallback.
pub fn resolve_parsed_with_default<T: FromStr>(
    cli_value: Option<T>,
    env_key: &str,
    env: &impl Env,
    default: T,
) -> Result<T, ConfigError> {
    if let Some(v) = cli_value {
        return Ok(v);
    }
    match env.var(env_key) {
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
            key: env_key.to_owned(),
            value: raw,
        }),
        None => Ok(default),
    }
}
