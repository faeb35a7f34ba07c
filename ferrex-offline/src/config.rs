//! Configuration for the offline engine and the `ferrex-offline` CLI.

use anyhow::{Context, anyhow};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use sha2::Digest;
use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};
use url::Url;

use crate::{
    error::{OfflineError, Result},
    infra::cache::OfflineCacheRoot,
    queue::QueueLimits,
};

/// Path to a TOML or JSON config file.
pub const CONFIG_PATH_ENV: &str = "FERREX_OFFLINE_CONFIG_PATH";
/// Inline JSON configuration.
pub const CONFIG_JSON_ENV: &str = "FERREX_OFFLINE_CONFIG_JSON";

/// Source that produced the offline configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum OfflineConfigSource {
    /// Built-in defaults.
    #[default]
    Default,
    /// File named by [`CONFIG_PATH_ENV`].
    EnvPath(PathBuf),
    /// JSON from [`CONFIG_JSON_ENV`].
    EnvInline,
    /// A default file found in the working directory.
    File(PathBuf),
}

/// Settings for the offline playback engine.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct OfflineConfig {
    /// Base URL of the Ferrex server that owns playback state.
    pub server_url: String,
    /// Bearer token sent with replayed requests.
    pub access_token: Option<String>,
    /// Override for the on-disk store. Defaults to the platform cache
    /// directory, namespaced per server.
    pub cache_dir: Option<PathBuf>,
    /// Bounds applied to the pending event queue.
    pub queue: QueueLimits,
    /// How many recent dead letters to keep for diagnostics.
    pub dead_letter_capacity: usize,
    /// Period of the background sync loop.
    pub sync_interval_secs: u64,
    /// Per-request timeout for the server client.
    pub request_timeout_secs: u64,
}

impl Default for OfflineConfig {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:3000".to_string(),
            access_token: None,
            cache_dir: None,
            queue: QueueLimits::default(),
            dead_letter_capacity: 50,
            sync_interval_secs: 60,
            request_timeout_secs: 15,
        }
    }
}

impl OfflineConfig {
    /// Load configuration using environment variables.
    /// Evaluation order:
    /// 1) `$FERREX_OFFLINE_CONFIG_PATH` (TOML or JSON file),
    /// 2) `$FERREX_OFFLINE_CONFIG_JSON` (inline JSON),
    /// 3) `ferrex-offline.toml` / `ferrex-offline.json` in the working
    ///    directory,
    /// 4) defaults.
    pub fn load_from_env() -> anyhow::Result<(Self, OfflineConfigSource)> {
        if let Ok(path_str) = env::var(CONFIG_PATH_ENV)
            && !path_str.trim().is_empty()
        {
            let path = PathBuf::from(path_str);
            let config = Self::load_from_file(&path)?;
            return Ok((config, OfflineConfigSource::EnvPath(path)));
        }

        if let Ok(raw) = env::var(CONFIG_JSON_ENV)
            && !raw.trim().is_empty()
        {
            let parsed = Self::parse_json(&raw)
                .with_context(|| format!("failed to parse {CONFIG_JSON_ENV}"))?;
            return Ok((parsed, OfflineConfigSource::EnvInline));
        }

        if let Some(path) = Self::find_default_file() {
            let config = Self::load_from_file(&path)?;
            return Ok((config, OfflineConfigSource::File(path)));
        }

        Ok((Self::default(), OfflineConfigSource::Default))
    }

    /// Read a file, choosing the format from its extension.
    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path).with_context(|| {
            format!("failed to read offline config from {}", path.display())
        })?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::parse_json(&contents).with_context(|| {
                format!("invalid offline config {}", path.display())
            }),
            Some("toml") => toml::from_str(&contents).map_err(|err| {
                anyhow!("invalid offline config {}: {}", path.display(), err)
            }),
            _ => Self::parse_from_str(&contents, &path.display().to_string()),
        }
    }

    /// Parse TOML, or JSON when `hint` says so.
    pub fn parse_from_str(
        contents: &str,
        origin: &str,
    ) -> anyhow::Result<Self> {
        toml::from_str(contents).or_else(|toml_err| {
            serde_json::from_str(contents).map_err(|json_err| {
                anyhow!(
                    "failed to parse offline config {}: toml error: {}; json error: {}",
                    origin,
                    toml_err,
                    json_err
                )
            })
        })
    }

    /// Parse a JSON document.
    pub fn parse_json(raw: &str) -> anyhow::Result<Self> {
        serde_json::from_str(raw)
            .map_err(|err| anyhow!("invalid offline config json: {err}"))
    }

    fn find_default_file() -> Option<PathBuf> {
        const CANDIDATES: &[&str] = &[
            "ferrex-offline.toml",
            "ferrex-offline.json",
            "config/ferrex-offline.toml",
        ];

        CANDIDATES
            .iter()
            .map(Path::new)
            .find(|path| path.exists())
            .map(|path| path.to_path_buf())
    }

    /// Reject unusable values before anything is opened.
    pub fn validate(&self) -> Result<()> {
        self.parsed_server_url()?;

        if self.queue.max_entries == 0 {
            return Err(OfflineError::Config(
                "queue.max_entries must be greater than zero".into(),
            ));
        }
        if self.queue.max_age_days == 0 {
            return Err(OfflineError::Config(
                "queue.max_age_days must be greater than zero".into(),
            ));
        }
        if self.sync_interval_secs == 0 {
            return Err(OfflineError::Config(
                "sync_interval_secs must be greater than zero".into(),
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err(OfflineError::Config(
                "request_timeout_secs must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    /// `server_url` as a [`Url`].
    pub fn parsed_server_url(&self) -> Result<Url> {
        let url = Url::parse(self.server_url.trim()).map_err(|err| {
            OfflineError::Config(format!(
                "invalid server_url {}: {err}",
                self.server_url
            ))
        })?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(OfflineError::Config(format!(
                "server_url must use http or https, got {other}"
            ))),
        }
    }

    /// Period of the background sync loop.
    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    /// Per-request timeout for the server client.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Directory backing the offline store: `cache_dir` when set, otherwise
    /// `<platform cache>/offline/<server namespace>`.
    pub fn resolve_cache_root(&self) -> anyhow::Result<OfflineCacheRoot> {
        if let Some(dir) = &self.cache_dir {
            return Ok(OfflineCacheRoot::new(dir.clone()));
        }

        let proj_dirs = ProjectDirs::from("", "ferrex", "ferrex-player")
            .ok_or_else(|| anyhow!("Failed to resolve ProjectDirs"))?;
        let root = proj_dirs
            .cache_dir()
            .join("offline")
            .join(namespace_for_server_url(&self.server_url));
        Ok(OfflineCacheRoot::new(root))
    }
}

/// Stable per-server directory name so switching servers never mixes queues.
pub fn namespace_for_server_url(server_url: &str) -> String {
    let normalized = normalize_server_url(server_url);
    let digest = sha2::Sha256::digest(normalized.as_bytes());
    hex_encode(&digest[..16])
}

fn normalize_server_url(server_url: &str) -> String {
    server_url.trim().trim_end_matches('/').to_ascii_lowercase()
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write as _;

    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut out, b| {
        let _ = write!(out, "{b:02x}");
        out
    })
}
