//! Server configuration.
//!
//! Layered with figment: built-in defaults, then an optional TOML file, then
//! `VIDEO_STREAM_*` environment variables (`__` separates nested keys, e.g.
//! `VIDEO_STREAM_STREAM__CHUNK_SIZE`).

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::{ServeOptions, IO_BUFFER_SIZE};

pub const ENV_PREFIX: &str = "VIDEO_STREAM_";

fn default_bind() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("/data/videos")
}

fn default_video_dir() -> String {
    "videos".to_string()
}

fn default_api_prefix() -> String {
    "/api".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,
    /// Directory beneath which everything served must live.
    #[serde(default = "default_storage_root")]
    pub storage_root: PathBuf,
    /// Subdirectory of `storage_root` holding the videos.
    #[serde(default = "default_video_dir")]
    pub video_dir: String,
    /// Prefix all routes are nested under; empty or `/` for none.
    #[serde(default = "default_api_prefix")]
    pub api_prefix: String,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub files: FilesConfig,
}

fn default_stream_max_age() -> u64 {
    86_400
}

fn default_chunk_size() -> usize {
    IO_BUFFER_SIZE
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConfig {
    #[serde(default = "default_stream_max_age")]
    pub cache_max_age_secs: u64,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        StreamConfig {
            cache_max_age_secs: default_stream_max_age(),
            chunk_size: default_chunk_size(),
        }
    }
}

fn default_files_max_age() -> u64 {
    3_600
}

fn default_true() -> bool {
    true
}

/// Static serving of everything under the storage root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilesConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_files_max_age")]
    pub cache_max_age_secs: u64,
}

impl Default for FilesConfig {
    fn default() -> Self {
        FilesConfig {
            enabled: true,
            cache_max_age_secs: default_files_max_age(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind: default_bind(),
            storage_root: default_storage_root(),
            video_dir: default_video_dir(),
            api_prefix: default_api_prefix(),
            stream: StreamConfig::default(),
            files: FilesConfig::default(),
        }
    }
}

impl Config {
    /// Defaults, then `path` if it exists, then the environment.
    pub fn figment(path: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = path {
            if path.exists() {
                figment = figment.merge(Toml::file(path));
            } else {
                tracing::debug!(path = %path.display(), "no config file");
            }
        }
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    pub fn load(path: Option<&Path>) -> Result<Self, figment::Error> {
        Self::figment(path).extract()
    }

    pub fn video_root(&self) -> PathBuf {
        self.storage_root.join(&self.video_dir)
    }

    pub fn stream_options(&self) -> ServeOptions {
        ServeOptions {
            cache_max_age: Duration::from_secs(self.stream.cache_max_age_secs),
            chunk_size: self.stream.chunk_size,
        }
    }

    pub fn files_options(&self) -> ServeOptions {
        ServeOptions {
            cache_max_age: Duration::from_secs(self.files.cache_max_age_secs),
            chunk_size: self.stream.chunk_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::time::Duration;

    use figment::Jail;

    use super::Config;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!("0.0.0.0:8080", config.bind.to_string());
        assert_eq!(Path::new("/data/videos/videos"), config.video_root());
        assert_eq!(Duration::from_secs(86_400), config.stream_options().cache_max_age);
        assert_eq!(Duration::from_secs(3_600), config.files_options().cache_max_age);
        assert_eq!(64 * 1024, config.stream_options().chunk_size);
        assert!(config.files.enabled);
    }

    #[test]
    fn test_file_and_env_layering() {
        Jail::expect_with(|jail| {
            jail.create_file("server.toml", r#"
                storage_root = "/srv/media"
                api_prefix = ""

                [stream]
                chunk_size = 4096

                [files]
                enabled = false
            "#)?;
            jail.set_env("VIDEO_STREAM_BIND", "127.0.0.1:9000");
            jail.set_env("VIDEO_STREAM_STREAM__CACHE_MAX_AGE_SECS", "60");

            let config = Config::load(Some(Path::new("server.toml")))?;
            assert_eq!("127.0.0.1:9000", config.bind.to_string());
            assert_eq!(Path::new("/srv/media/videos"), config.video_root());
            assert_eq!("", config.api_prefix);
            assert_eq!(4096, config.stream.chunk_size);
            assert_eq!(60, config.stream.cache_max_age_secs);
            assert!(!config.files.enabled);
            Ok(())
        });
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        Jail::expect_with(|_jail| {
            let config = Config::load(Some(Path::new("does-not-exist.toml")))?;
            assert_eq!(Config::default(), config);
            Ok(())
        });
    }
}
