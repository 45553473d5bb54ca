use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

const DEFAULT_CONFIG: &str = include_str!("../config.toml");

const FALLBACK_URL: &str = "http://localhost:3000";
const FALLBACK_PLAYER: &str = "default";

#[derive(Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    server: ServerConfig,
    #[serde(default)]
    sync: SyncConfig,
    #[serde(default)]
    search: SearchConfig,
}

#[derive(Deserialize, Default)]
struct ServerConfig {
    url: Option<String>,
    player: Option<String>,
}

#[derive(Deserialize, Default)]
struct SyncConfig {
    reconnect_delay_ms: Option<u64>,
    settle_delay_ms: Option<u64>,
}

#[derive(Deserialize, Default)]
struct SearchConfig {
    untagged: Option<Vec<String>>,
    max_results: Option<usize>,
}

pub struct Config {
    server: ServerConfig,
    sync: SyncConfig,
    search: SearchConfig,
}

impl Config {
    /// Built-in defaults overlaid with the user's config file, if any.
    pub fn load() -> Self {
        match user_config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Self::from_file(embedded()),
        }
    }

    /// Built-in defaults overlaid with the file at `path`. An unreadable or
    /// malformed file is ignored with a warning.
    pub fn load_from(path: &Path) -> Self {
        let mut base = embedded();
        match std::fs::read_to_string(path) {
            Ok(contents) => match toml::from_str::<ConfigFile>(&contents) {
                Ok(user) => {
                    merge_server(&mut base.server, user.server);
                    merge_sync(&mut base.sync, user.sync);
                    merge_search(&mut base.search, user.search);
                }
                Err(e) => {
                    log::warn!(target: "config", "ignoring malformed config {}: {}", path.display(), e)
                }
            },
            Err(e) => {
                log::warn!(target: "config", "could not read config {}: {}", path.display(), e)
            }
        }
        Self::from_file(base)
    }

    fn from_file(file: ConfigFile) -> Self {
        Config {
            server: file.server,
            sync: file.sync,
            search: file.search,
        }
    }

    /// Service root, without the `/data` API prefix.
    pub fn server_url(&self) -> &str {
        self.server.url.as_deref().unwrap_or(FALLBACK_URL)
    }

    pub fn player(&self) -> &str {
        self.server.player.as_deref().unwrap_or(FALLBACK_PLAYER)
    }

    pub fn set_player(&mut self, name: &str) {
        self.server.player = Some(name.to_string());
    }

    /// Event stream reconnect delay (clamped to 100 ms..10 min).
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.sync.reconnect_delay_ms.unwrap_or(4000).clamp(100, 600_000))
    }

    /// Update settle delay (clamped to 0..10 s).
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.sync.settle_delay_ms.unwrap_or(200).min(10_000))
    }

    /// Attributes searched by keywords without an explicit tag.
    pub fn untagged_attributes(&self) -> Vec<String> {
        match &self.search.untagged {
            Some(attrs) if !attrs.is_empty() => attrs.clone(),
            _ => ["artist", "title", "album"].iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Cap on applied search results (clamped to 1..10000).
    pub fn max_search_results(&self) -> usize {
        self.search.max_results.unwrap_or(200).clamp(1, 10_000)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_file(embedded())
    }
}

fn embedded() -> ConfigFile {
    toml::from_str(DEFAULT_CONFIG).unwrap_or_else(|e| {
        log::error!(target: "config", "embedded config.toml is invalid: {}", e);
        ConfigFile::default()
    })
}

fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("trollibox").join("config.toml"))
}

fn merge_server(base: &mut ServerConfig, user: ServerConfig) {
    if user.url.is_some() {
        base.url = user.url;
    }
    if user.player.is_some() {
        base.player = user.player;
    }
}

fn merge_sync(base: &mut SyncConfig, user: SyncConfig) {
    if user.reconnect_delay_ms.is_some() {
        base.reconnect_delay_ms = user.reconnect_delay_ms;
    }
    if user.settle_delay_ms.is_some() {
        base.settle_delay_ms = user.settle_delay_ms;
    }
}

fn merge_search(base: &mut SearchConfig, user: SearchConfig) {
    if user.untagged.is_some() {
        base.untagged = user.untagged;
    }
    if user.max_results.is_some() {
        base.max_results = user.max_results;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn embedded_defaults() {
        let config = Config::default();
        assert_eq!(config.server_url(), "http://localhost:3000");
        assert_eq!(config.player(), "default");
        assert_eq!(config.reconnect_delay(), Duration::from_secs(4));
        assert_eq!(config.settle_delay(), Duration::from_millis(200));
        assert_eq!(config.untagged_attributes(), vec!["artist", "title", "album"]);
        assert_eq!(config.max_search_results(), 200);
    }

    #[test]
    fn user_values_override_only_what_they_set() {
        let file = write_config("[server]\nplayer = \"kitchen\"\n[sync]\nsettle_delay_ms = 50\n");
        let config = Config::load_from(file.path());
        assert_eq!(config.player(), "kitchen");
        assert_eq!(config.server_url(), "http://localhost:3000");
        assert_eq!(config.settle_delay(), Duration::from_millis(50));
        assert_eq!(config.reconnect_delay(), Duration::from_secs(4));
    }

    #[test]
    fn out_of_range_values_are_clamped() {
        let file = write_config("[sync]\nreconnect_delay_ms = 1\n[search]\nmax_results = 0\nuntagged = []\n");
        let config = Config::load_from(file.path());
        assert_eq!(config.reconnect_delay(), Duration::from_millis(100));
        assert_eq!(config.max_search_results(), 1);
        assert_eq!(config.untagged_attributes().len(), 3);
    }

    #[test]
    fn malformed_file_falls_back_to_defaults() {
        let file = write_config("[server\nurl = ");
        let config = Config::load_from(file.path());
        assert_eq!(config.server_url(), "http://localhost:3000");
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = Config::load_from(Path::new("/nonexistent/trollibox.toml"));
        assert_eq!(config.player(), "default");
    }
}
