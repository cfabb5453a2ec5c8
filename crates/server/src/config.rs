use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use common::Tag;
use jukebox::{
    BufferLimits, Constraints, JukeboxMode, JukeboxSettings, SongSource, TagFilter, Watermarks,
};
use library::{AlbumGrouping, AlbumMode};
use player::{ConnectionSettings, DEFAULT_PARTITION};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    pub host: String,
    pub port: u16,
    pub password: String,
    pub timeout_secs: u64,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6600,
            password: String::new(),
            timeout_secs: 30,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub path: String,
    pub save: bool,
    pub album_mode: AlbumMode,
    /// Extra tag that splits albums, e.g. `Date`. Empty for none.
    pub group_tag: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: "albums.redb".to_string(),
            save: true,
            album_mode: AlbumMode::Advanced,
            group_tag: String::new(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct JukeboxConfig {
    pub add_max_per_cycle: usize,
    pub song_buffer: Watermarks,
    pub album_buffer: Watermarks,
    pub last_played_size: usize,
}

impl Default for JukeboxConfig {
    fn default() -> Self {
        let limits = BufferLimits::default();
        Self {
            add_max_per_cycle: limits.add_max,
            song_buffer: limits.song,
            album_buffer: limits.album,
            last_played_size: 50,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PartitionConfig {
    pub name: String,
    /// `off`, `song`, `album` or `script`.
    pub mode: String,
    pub queue_length: u32,
    /// Song mode pool: `Database` or a stored playlist name.
    pub source: String,
    pub script: String,
    pub uniq_tag: String,
    pub last_played_hours: u32,
    pub skip_disliked: bool,
    pub min_duration_secs: u32,
    pub max_duration_secs: u32,
    pub include: Vec<TagFilter>,
    pub exclude: Vec<TagFilter>,
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_PARTITION.to_string(),
            mode: "off".to_string(),
            queue_length: 1,
            source: "Database".to_string(),
            script: String::new(),
            uniq_tag: String::new(),
            last_played_hours: 0,
            skip_disliked: false,
            min_duration_secs: 0,
            max_duration_secs: 0,
            include: Vec::new(),
            exclude: Vec::new(),
        }
    }
}

impl PartitionConfig {
    pub fn settings(&self) -> Result<JukeboxSettings, ConfigError> {
        let mode = parse_mode(&self.mode, &self.source, &self.script)
            .map_err(|message| ConfigError::Invalid(format!("partition {}: {}", self.name, message)))?;
        let uniq_tag = parse_tag(&self.uniq_tag)
            .map_err(|message| ConfigError::Invalid(format!("partition {}: {}", self.name, message)))?;
        let mut constraints = Constraints::from_tag_filters(&self.include, &self.exclude);
        constraints.uniq_tag = uniq_tag;
        constraints.last_played_hours = self.last_played_hours;
        constraints.skip_disliked = self.skip_disliked;
        constraints.min_duration_secs = self.min_duration_secs;
        constraints.max_duration_secs = self.max_duration_secs;
        Ok(JukeboxSettings {
            mode,
            queue_length: self.queue_length,
            constraints,
        })
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub player: PlayerConfig,
    pub reconnect_delay_secs: u64,
    pub tick_interval_secs: u64,
    pub job_max_age_secs: u64,
    pub shutdown_timeout_secs: u64,
    pub cache: CacheConfig,
    pub jukebox: JukeboxConfig,
    pub partitions: Vec<PartitionConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            player: PlayerConfig::default(),
            reconnect_delay_secs: 5,
            tick_interval_secs: 2,
            job_max_age_secs: 60,
            shutdown_timeout_secs: 10,
            cache: CacheConfig::default(),
            jukebox: JukeboxConfig::default(),
            partitions: vec![PartitionConfig::default()],
        }
    }
}

impl ServerConfig {
    pub fn connection_settings(&self) -> ConnectionSettings {
        let password = self.player.password.trim();
        ConnectionSettings {
            host: self.player.host.clone(),
            port: self.player.port,
            password: (!password.is_empty()).then(|| password.to_string()),
            timeout: Duration::from_secs(self.player.timeout_secs.max(1)),
        }
    }

    pub fn buffer_limits(&self) -> BufferLimits {
        BufferLimits {
            song: self.jukebox.song_buffer,
            album: self.jukebox.album_buffer,
            add_max: self.jukebox.add_max_per_cycle.max(1),
        }
    }

    pub fn album_grouping(&self) -> Result<AlbumGrouping, ConfigError> {
        Ok(AlbumGrouping {
            mode: self.cache.album_mode,
            group_tag: parse_tag(&self.cache.group_tag).map_err(ConfigError::Invalid)?,
        })
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs.max(1))
    }

    pub fn job_max_age(&self) -> Duration {
        Duration::from_secs(self.job_max_age_secs.max(1))
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Yaml(serde_yaml::Error),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(err) => write!(f, "io error: {}", err),
            ConfigError::Yaml(err) => write!(f, "yaml error: {}", err),
            ConfigError::Invalid(message) => write!(f, "invalid config: {}", message),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::Io(err)
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        ConfigError::Yaml(err)
    }
}

/// Builds a jukebox mode from its textual parts, as used by the config file
/// and the HTTP API.
pub fn parse_mode(mode: &str, source: &str, script: &str) -> Result<JukeboxMode, String> {
    match mode.trim().to_ascii_lowercase().as_str() {
        "" | "off" => Ok(JukeboxMode::Off),
        "song" => Ok(JukeboxMode::Song(SongSource::parse(source))),
        "album" => Ok(JukeboxMode::Album),
        "script" => {
            let script = script.trim();
            if script.is_empty() {
                Err("script mode needs a script name".to_string())
            } else {
                Ok(JukeboxMode::Script(script.to_string()))
            }
        }
        other => Err(format!("unknown jukebox mode: {}", other)),
    }
}

/// Empty, `none` and `NoTag` mean no tag.
pub fn parse_tag(value: &str) -> Result<Option<Tag>, String> {
    let value = value.trim();
    if value.is_empty()
        || value.eq_ignore_ascii_case("none")
        || value.eq_ignore_ascii_case("notag")
    {
        return Ok(None);
    }
    Tag::from_name(value)
        .map(Some)
        .ok_or_else(|| format!("unknown tag: {}", value))
}

pub fn config_path_from_env() -> PathBuf {
    match env::var("JUKEBOXD_CONFIG") {
        Ok(value) if !value.trim().is_empty() => PathBuf::from(value),
        _ => default_config_path(),
    }
}

fn default_config_path() -> PathBuf {
    match env::current_exe() {
        Ok(exe) => exe
            .parent()
            .map(|dir| dir.join("config.yaml"))
            .unwrap_or_else(|| PathBuf::from("config.yaml")),
        Err(_) => PathBuf::from("config.yaml"),
    }
}

pub fn load_or_create_config(path: &Path) -> Result<(ServerConfig, bool), ConfigError> {
    if path.exists() {
        let contents = fs::read_to_string(path)?;
        let mut config: ServerConfig = serde_yaml::from_str(&contents)?;
        if config.port == 0 {
            config.port = 3000;
        }
        if config.cache.path.trim().is_empty() {
            config.cache.path = "albums.redb".to_string();
        }
        return Ok((config, false));
    }

    let config = ServerConfig::default();
    save_config(path, &config)?;
    Ok((config, true))
}

pub fn save_config(path: &Path, config: &ServerConfig) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let contents = serde_yaml::to_string(config)?;
    fs::write(path, contents)?;
    Ok(())
}

pub fn resolve_path(config_path: &Path, value: &str) -> PathBuf {
    let raw = PathBuf::from(value);
    if raw.is_absolute() {
        return raw;
    }
    let base = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    base.join(raw)
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use common::Tag;
    use jukebox::{JukeboxMode, SongSource};
    use library::AlbumMode;

    use super::{load_or_create_config, parse_mode, parse_tag, resolve_path, ServerConfig};

    fn temp_dir(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("jukeboxd-{}-{}", name, std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn missing_config_is_created_with_defaults() {
        let dir = temp_dir("create");
        let path = dir.join("config.yaml");
        let (config, created) = load_or_create_config(&path).unwrap();
        assert!(created);
        assert!(path.exists());
        assert_eq!(config.reconnect_delay_secs, 5);
        assert_eq!(config.jukebox.song_buffer.high, 50);

        let (_, created) = load_or_create_config(&path).unwrap();
        assert!(!created);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn partial_yaml_keeps_defaults_and_parses_partitions() {
        let yaml = r#"
player:
  host: music.local
cache:
  album_mode: simple
  group_tag: date
partitions:
  - name: kitchen
    mode: song
    source: Evening
    queue_length: 4
    uniq_tag: Artist
    include:
      - tag: Genre
        op: equals
        value: Jazz
"#;
        let config: ServerConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.player.host, "music.local");
        assert_eq!(config.player.port, 6600);
        assert_eq!(config.tick_interval_secs, 2);
        let grouping = config.album_grouping().unwrap();
        assert_eq!(grouping.mode, AlbumMode::Simple);
        assert_eq!(grouping.group_tag, Some(Tag::Date));

        let settings = config.partitions[0].settings().unwrap();
        assert_eq!(
            settings.mode,
            JukeboxMode::Song(SongSource::Playlist("Evening".to_string()))
        );
        assert_eq!(settings.queue_length, 4);
        assert_eq!(settings.constraints.uniq_tag, Some(Tag::Artist));
        assert_eq!(settings.constraints.include.len(), 1);
    }

    #[test]
    fn modes_parse_and_reject_garbage() {
        assert_eq!(parse_mode("Album", "", ""), Ok(JukeboxMode::Album));
        assert_eq!(parse_mode("", "", ""), Ok(JukeboxMode::Off));
        assert!(parse_mode("script", "", " ").is_err());
        assert!(parse_mode("shuffle", "", "").is_err());
        let mut config = ServerConfig::default();
        config.partitions[0].uniq_tag = "Colour".to_string();
        assert!(config.partitions[0].settings().is_err());
    }

    #[test]
    fn uniqueness_tag_can_be_turned_off() {
        assert_eq!(parse_tag("none"), Ok(None));
        assert_eq!(parse_tag(" NoTag "), Ok(None));
        assert_eq!(parse_tag(""), Ok(None));
        assert_eq!(parse_tag("album"), Ok(Some(Tag::Album)));

        let mut config = ServerConfig::default();
        config.partitions[0].mode = "song".to_string();
        config.partitions[0].uniq_tag = "None".to_string();
        let settings = config.partitions[0].settings().unwrap();
        assert_eq!(settings.constraints.uniq_tag, None);
    }

    #[test]
    fn relative_paths_resolve_next_to_config() {
        let path = resolve_path(Path::new("/etc/jukeboxd/config.yaml"), "albums.redb");
        assert_eq!(path, Path::new("/etc/jukeboxd/albums.redb"));
        let path = resolve_path(Path::new("config.yaml"), "/var/albums.redb");
        assert_eq!(path, Path::new("/var/albums.redb"));
    }
}
