use fs2::FileExt;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

pub const CONFIG_DIR_NAME: &str = "sidecar";
pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const DEFAULT_EDITOR: &str = "vim";
pub const DEFAULT_TERM: &str = "xterm-256color";
pub const ROOT_ENV: &str = "SIDECAR_ROOT";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to access {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },
    #[error("invalid value for {key}: {message}")]
    Invalid { key: String, message: String },
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

impl ConfigError {
    fn io(path: &Path, source: io::Error) -> Self {
        ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PluginKind {
    Files,
    Notes,
    Conversations,
    Terminal,
}

impl PluginKind {
    pub const ALL: [PluginKind; 4] = [
        PluginKind::Files,
        PluginKind::Notes,
        PluginKind::Conversations,
        PluginKind::Terminal,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            PluginKind::Files => "files",
            PluginKind::Notes => "notes",
            PluginKind::Conversations => "conversations",
            PluginKind::Terminal => "terminal",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == value)
    }

    fn watches_database(self) -> bool {
        matches!(self, PluginKind::Notes | PluginKind::Conversations)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PluginConfig {
    pub refresh_interval: Duration,
    pub enabled: bool,
    pub db_path: Option<PathBuf>,
    pub watch_debounce: Duration,
    pub quick_open_max_files: usize,
    pub quick_open_timeout: Duration,
    pub inline_edit_enabled: bool,
    pub default_editor: Option<String>,
    pub tmux_capture_max_bytes: usize,
    pub divider_width: Option<u16>,
}

impl PluginConfig {
    pub fn defaults_for(kind: PluginKind) -> Self {
        Self {
            refresh_interval: Duration::from_secs(2),
            enabled: true,
            db_path: None,
            watch_debounce: if kind.watches_database() {
                Duration::from_millis(250)
            } else {
                Duration::from_millis(100)
            },
            quick_open_max_files: 50_000,
            quick_open_timeout: Duration::from_secs(2),
            inline_edit_enabled: true,
            default_editor: None,
            tmux_capture_max_bytes: 512 * 1024,
            divider_width: None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawPluginConfig {
    refresh_interval: Option<String>,
    enabled: Option<bool>,
    db_path: Option<String>,
    watch_debounce: Option<String>,
    quick_open_max_files: Option<usize>,
    quick_open_timeout: Option<String>,
    inline_edit_enabled: Option<bool>,
    default_editor: Option<String>,
    tmux_capture_max_bytes: Option<usize>,
    divider_width: Option<u16>,
}

impl RawPluginConfig {
    fn resolve(self, kind: PluginKind) -> Result<PluginConfig, ConfigError> {
        let mut config = PluginConfig::defaults_for(kind);
        let key = |name: &str| format!("plugins.{}.{name}", kind.as_str());
        let duration = |name: &str, raw: &str| {
            parse_duration(raw).map_err(|message| ConfigError::Invalid {
                key: key(name),
                message,
            })
        };

        if let Some(raw) = self.refresh_interval.as_deref() {
            config.refresh_interval = duration("refresh_interval", raw)?;
        }
        if let Some(raw) = self.watch_debounce.as_deref() {
            config.watch_debounce = duration("watch_debounce", raw)?;
        }
        if let Some(raw) = self.quick_open_timeout.as_deref() {
            config.quick_open_timeout = duration("quick_open_timeout", raw)?;
        }
        if let Some(enabled) = self.enabled {
            config.enabled = enabled;
        }
        if let Some(path) = self.db_path.filter(|p| !p.trim().is_empty()) {
            config.db_path = Some(PathBuf::from(path));
        }
        if let Some(max) = self.quick_open_max_files {
            if max == 0 {
                return Err(ConfigError::Invalid {
                    key: key("quick_open_max_files"),
                    message: "must be greater than zero".to_string(),
                });
            }
            config.quick_open_max_files = max;
        }
        if let Some(enabled) = self.inline_edit_enabled {
            config.inline_edit_enabled = enabled;
        }
        if let Some(editor) = self.default_editor.filter(|e| !e.trim().is_empty()) {
            config.default_editor = Some(editor);
        }
        if let Some(max) = self.tmux_capture_max_bytes {
            config.tmux_capture_max_bytes = max;
        }
        config.divider_width = self.divider_width;
        Ok(config)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SidecarConfig {
    pub path: Option<PathBuf>,
    plugins: BTreeMap<PluginKind, PluginConfig>,
}

impl Default for SidecarConfig {
    fn default() -> Self {
        Self {
            path: None,
            plugins: PluginKind::ALL
                .into_iter()
                .map(|kind| (kind, PluginConfig::defaults_for(kind)))
                .collect(),
        }
    }
}

impl SidecarConfig {
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
    }

    /// A missing file yields defaults bound to `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "config file missing, using defaults");
                return Ok(Self {
                    path: Some(path.to_path_buf()),
                    ..Self::default()
                });
            }
            Err(err) => return Err(ConfigError::io(path, err)),
        };
        let mut config = Self::parse(&contents, path)?;
        config.path = Some(path.to_path_buf());
        Ok(config)
    }

    pub fn parse(contents: &str, origin: &Path) -> Result<Self, ConfigError> {
        let table: toml::Table = contents.parse().map_err(|err: toml::de::Error| {
            ConfigError::Parse {
                path: origin.to_path_buf(),
                message: err.message().to_string(),
            }
        })?;

        let mut config = Self::default();
        let Some(plugins) = table.get("plugins").and_then(toml::Value::as_table) else {
            return Ok(config);
        };
        for (name, value) in plugins {
            let Some(kind) = PluginKind::parse(name) else {
                debug!(plugin = %name, "ignoring config for unknown plugin");
                continue;
            };
            let raw: RawPluginConfig =
                value
                    .clone()
                    .try_into()
                    .map_err(|err: toml::de::Error| ConfigError::Parse {
                        path: origin.to_path_buf(),
                        message: format!("[plugins.{name}]: {}", err.message()),
                    })?;
            config.plugins.insert(kind, raw.resolve(kind)?);
        }
        Ok(config)
    }

    pub fn plugin(&self, kind: PluginKind) -> &PluginConfig {
        // Every kind is populated at construction.
        &self.plugins[&kind]
    }

    pub fn plugin_mut(&mut self, kind: PluginKind) -> &mut PluginConfig {
        self.plugins
            .entry(kind)
            .or_insert_with(|| PluginConfig::defaults_for(kind))
    }

    /// Writes one `[plugins.<kind>]` key back to disk, keeping every other
    /// key and table in the file as it was.
    pub fn persist_plugin_value(
        &self,
        kind: PluginKind,
        key: &str,
        value: toml::Value,
    ) -> Result<(), ConfigError> {
        let Some(path) = self.path.as_deref() else {
            return Ok(());
        };
        update_plugin_value(path, kind, key, value)
    }
}

pub fn update_plugin_value(
    path: &Path,
    kind: PluginKind,
    key: &str,
    value: toml::Value,
) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|err| ConfigError::io(parent, err))?;
    }
    let lock_path = lock_path_for(path);
    let lock = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&lock_path)
        .map_err(|err| ConfigError::io(&lock_path, err))?;
    lock.lock_exclusive()
        .map_err(|err| ConfigError::io(&lock_path, err))?;

    let result = (|| {
        let mut table = match fs::read_to_string(path) {
            Ok(contents) => contents
                .parse::<toml::Table>()
                .map_err(|err| ConfigError::Parse {
                    path: path.to_path_buf(),
                    message: err.message().to_string(),
                })?,
            Err(err) if err.kind() == io::ErrorKind::NotFound => toml::Table::new(),
            Err(err) => return Err(ConfigError::io(path, err)),
        };

        let plugins = child_table(&mut table, "plugins", path)?;
        let plugin = child_table(plugins, kind.as_str(), path)?;
        plugin.insert(key.to_string(), value);

        let rendered = toml::to_string_pretty(&table)?;
        write_atomic(path, rendered.as_bytes()).map_err(|err| ConfigError::io(path, err))
    })();

    if let Err(err) = lock.unlock() {
        warn!(path = %lock_path.display(), error = %err, "failed to release config lock");
    }
    result
}

fn child_table<'a>(
    table: &'a mut toml::Table,
    key: &str,
    path: &Path,
) -> Result<&'a mut toml::Table, ConfigError> {
    let entry = table
        .entry(key.to_string())
        .or_insert(toml::Value::Table(toml::Table::new()));
    entry.as_table_mut().ok_or_else(|| ConfigError::Parse {
        path: path.to_path_buf(),
        message: format!("`{key}` is not a table"),
    })
}

fn lock_path_for(path: &Path) -> PathBuf {
    match path.file_name() {
        Some(name) => path.with_file_name(format!("{}.lock", name.to_string_lossy())),
        None => path.with_extension("lock"),
    }
}

pub fn write_atomic(path: &Path, payload: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let temp_path = match path.file_name() {
        Some(name) => path.with_file_name(format!(".{}.tmp", name.to_string_lossy())),
        None => path.with_extension("tmp"),
    };
    fs::write(&temp_path, payload)?;
    fs::rename(&temp_path, path)
}

/// Accepts `250ms`, `2s`, `1m` and bare integers as milliseconds.
pub fn parse_duration(raw: &str) -> Result<Duration, String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err("empty duration".to_string());
    }
    let split = raw
        .find(|ch: char| !ch.is_ascii_digit() && ch != '.')
        .unwrap_or(raw.len());
    let (number, unit) = raw.split_at(split);
    let value: f64 = number
        .parse()
        .map_err(|_| format!("`{raw}` is not a duration"))?;
    let millis = match unit.trim() {
        "" | "ms" => value,
        "s" => value * 1_000.0,
        "m" => value * 60_000.0,
        other => return Err(format!("unknown duration unit `{other}`")),
    };
    if !millis.is_finite() || millis < 0.0 {
        return Err(format!("`{raw}` is out of range"));
    }
    Ok(Duration::from_millis(millis.round() as u64))
}

pub fn format_duration(duration: Duration) -> String {
    let millis = duration.as_millis();
    if millis % 60_000 == 0 && millis > 0 {
        format!("{}m", millis / 60_000)
    } else if millis % 1_000 == 0 && millis > 0 {
        format!("{}s", millis / 1_000)
    } else {
        format!("{millis}ms")
    }
}

pub fn resolve_editor(configured: Option<&str>) -> String {
    resolve_editor_from(
        configured,
        std::env::var("EDITOR").ok(),
        std::env::var("VISUAL").ok(),
    )
}

pub fn resolve_editor_from(
    configured: Option<&str>,
    editor: Option<String>,
    visual: Option<String>,
) -> String {
    configured
        .map(str::to_string)
        .into_iter()
        .chain(editor)
        .chain(visual)
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty())
        .unwrap_or_else(|| DEFAULT_EDITOR.to_string())
}

pub fn terminal_type() -> String {
    std::env::var("TERM")
        .ok()
        .filter(|term| !term.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_TERM.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn parses_duration_suffixes() {
        assert_eq!(parse_duration("250ms"), Ok(Duration::from_millis(250)));
        assert_eq!(parse_duration("2s"), Ok(Duration::from_secs(2)));
        assert_eq!(parse_duration("1.5s"), Ok(Duration::from_millis(1_500)));
        assert_eq!(parse_duration("1m"), Ok(Duration::from_secs(60)));
        assert_eq!(parse_duration("40"), Ok(Duration::from_millis(40)));
        assert!(parse_duration("soon").is_err());
        assert!(parse_duration("5h").is_err());
        assert_eq!(format_duration(Duration::from_millis(1_500)), "1500ms");
        assert_eq!(format_duration(Duration::from_secs(2)), "2s");
    }

    #[test]
    fn missing_file_yields_per_plugin_defaults() {
        let dir = tempdir().expect("tempdir");
        let config = SidecarConfig::load(&dir.path().join("config.toml")).expect("load");
        assert_eq!(
            config.plugin(PluginKind::Files).watch_debounce,
            Duration::from_millis(100)
        );
        assert_eq!(
            config.plugin(PluginKind::Notes).watch_debounce,
            Duration::from_millis(250)
        );
        assert_eq!(config.plugin(PluginKind::Files).quick_open_max_files, 50_000);
        assert_eq!(
            config.plugin(PluginKind::Terminal).tmux_capture_max_bytes,
            512 * 1024
        );
    }

    #[test]
    fn overrides_apply_per_plugin() {
        let contents = r#"
[plugins.files]
watch_debounce = "50ms"
quick_open_max_files = 1000
inline_edit_enabled = false

[plugins.notes]
db_path = "/tmp/notes.db"
enabled = false
"#;
        let config = SidecarConfig::parse(contents, Path::new("config.toml")).expect("parse");
        let files = config.plugin(PluginKind::Files);
        assert_eq!(files.watch_debounce, Duration::from_millis(50));
        assert_eq!(files.quick_open_max_files, 1000);
        assert!(!files.inline_edit_enabled);
        let notes = config.plugin(PluginKind::Notes);
        assert!(!notes.enabled);
        assert_eq!(notes.db_path, Some(PathBuf::from("/tmp/notes.db")));
    }

    #[test]
    fn invalid_duration_names_the_key() {
        let contents = "[plugins.terminal]\nrefresh_interval = \"often\"\n";
        let err = SidecarConfig::parse(contents, Path::new("config.toml")).expect_err("invalid");
        assert!(err.to_string().contains("plugins.terminal.refresh_interval"));
    }

    #[test]
    fn rewrite_preserves_unknown_keys() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "theme = \"dusk\"\n\n[plugins.files]\nmystery = 7\nwatch_debounce = \"80ms\"\n\n[plugins.custom]\nflag = true\n",
        )
        .expect("seed config");

        update_plugin_value(
            &path,
            PluginKind::Files,
            "divider_width",
            toml::Value::Integer(42),
        )
        .expect("update");

        let table: toml::Table = fs::read_to_string(&path)
            .expect("read")
            .parse()
            .expect("toml");
        assert_eq!(table["theme"].as_str(), Some("dusk"));
        let files = table["plugins"]["files"].as_table().expect("files table");
        assert_eq!(files["mystery"].as_integer(), Some(7));
        assert_eq!(files["divider_width"].as_integer(), Some(42));
        assert_eq!(files["watch_debounce"].as_str(), Some("80ms"));
        assert_eq!(table["plugins"]["custom"]["flag"].as_bool(), Some(true));

        let config = SidecarConfig::load(&path).expect("reload");
        assert_eq!(config.plugin(PluginKind::Files).divider_width, Some(42));
    }

    #[test]
    fn editor_resolution_order() {
        assert_eq!(
            resolve_editor_from(Some("hx"), Some("nano".into()), None),
            "hx"
        );
        assert_eq!(
            resolve_editor_from(None, Some(" ".into()), Some("emacs".into())),
            "emacs"
        );
        assert_eq!(resolve_editor_from(None, None, None), DEFAULT_EDITOR);
    }
}
