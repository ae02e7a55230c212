use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

const APP_DIR: &str = "tonearm";
const STATE_FILE: &str = "state.json";
const HISTORY_FILE: &str = "history.json";
const STATS_FILE: &str = "statistics.json";
const SETTINGS_FILE: &str = "settings.toml";
const CACHE_DIR: &str = "cache";

/// Locations of every file the player persists, rooted at one directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paths {
    root: PathBuf,
}

impl Paths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve the config root: an explicit override wins, then
    /// `TONEARM_CONFIG_DIR`, then `$XDG_CONFIG_HOME/tonearm`, then
    /// `~/.config/tonearm`, then `./.tonearm`.
    pub fn resolve(override_dir: Option<&Path>) -> Result<Self> {
        if let Some(dir) = override_dir {
            return Ok(Self::new(dir));
        }
        config_root().map(Self::new)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn state(&self) -> PathBuf {
        self.root.join(STATE_FILE)
    }

    pub fn history(&self) -> PathBuf {
        self.root.join(HISTORY_FILE)
    }

    pub fn statistics(&self) -> PathBuf {
        self.root.join(STATS_FILE)
    }

    pub fn settings(&self) -> PathBuf {
        self.root.join(SETTINGS_FILE)
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.root.join(CACHE_DIR)
    }
}

pub fn config_root() -> Result<PathBuf> {
    if let Some(override_dir) = env::var_os("TONEARM_CONFIG_DIR") {
        return Ok(PathBuf::from(override_dir));
    }

    if let Some(xdg) = env::var_os("XDG_CONFIG_HOME") {
        return Ok(PathBuf::from(xdg).join(APP_DIR));
    }

    match env::var_os("HOME").or_else(|| env::var_os("USERPROFILE")) {
        Some(home) => Ok(PathBuf::from(home).join(".config").join(APP_DIR)),
        None => {
            let cwd = env::current_dir().context("failed to read current directory")?;
            Ok(cwd.join(format!(".{APP_DIR}")))
        }
    }
}

pub fn ensure_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).with_context(|| format!("failed to create {}", path.display()))
}

/// Reads a JSON document, returning `Ok(None)` when the file does not exist.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }

    let raw =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let value = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    Ok(Some(value))
}

/// Writes pretty JSON to a sibling temp file and renames it over `path`,
/// so a crash mid-write leaves the previous document intact.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        ensure_dir(parent)?;
    }

    let json = serde_json::to_string_pretty(value)?;
    let mut staging = path.as_os_str().to_owned();
    staging.push(".tmp");
    let staging = PathBuf::from(staging);
    fs::write(&staging, json).with_context(|| format!("failed to write {}", staging.display()))?;
    fs::rename(&staging, path).with_context(|| format!("failed to replace {}", path.display()))?;
    Ok(())
}

/// User preferences, read from `settings.toml` with `TONEARM__*` environment
/// overrides on top. Missing keys take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Start playing the restored track right after launch.
    pub autoplay: bool,
    /// Restore the playback position of the restored track.
    pub resume: bool,
    /// Save the session automatically on quit.
    pub autosave: bool,
    /// Edge length, in pixels, that artwork is rendered at.
    pub artwork_size: u32,
    /// Maximum number of cover images kept in the on-disk cache.
    pub artwork_cache_size: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            autoplay: false,
            resume: true,
            autosave: true,
            artwork_size: 150,
            artwork_cache_size: crate::artwork::DEFAULT_MAX_ENTRIES,
        }
    }
}

impl Settings {
    pub fn load(paths: &Paths) -> Result<Self> {
        let file = paths.settings();
        let cfg = ::config::Config::builder()
            .add_source(::config::File::from(file.as_path()).required(false))
            .add_source(
                ::config::Environment::with_prefix("TONEARM")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("failed to read settings from {}", file.display()))?;
        let settings: Settings = cfg
            .try_deserialize()
            .context("failed to parse settings")?;
        settings.validate()?;
        tracing::debug!(?settings, "settings loaded");
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.artwork_cache_size == 0 {
            anyhow::bail!("artwork_cache_size must be >= 1");
        }
        if self.artwork_size == 0 {
            anyhow::bail!("artwork_size must be >= 1");
        }
        Ok(())
    }
}

pub fn normalize_path(path: &Path) -> PathBuf {
    let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    strip_windows_verbatim_prefix(&canonical)
}

pub fn strip_windows_verbatim_prefix(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();

    if let Some(trimmed) = raw.strip_prefix(r"\\?\UNC\") {
        return PathBuf::from(format!(r"\\{trimmed}"));
    }

    if let Some(trimmed) = raw.strip_prefix(r"\\?\") {
        return PathBuf::from(trimmed);
    }

    path.to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    #[test]
    fn paths_hang_off_the_root() {
        let paths = Paths::new("/tmp/tonearm-root");
        assert_eq!(paths.state(), PathBuf::from("/tmp/tonearm-root/state.json"));
        assert_eq!(
            paths.statistics(),
            PathBuf::from("/tmp/tonearm-root/statistics.json")
        );
        assert_eq!(paths.cache_dir(), PathBuf::from("/tmp/tonearm-root/cache"));
    }

    #[test]
    fn explicit_override_beats_environment() {
        let paths = Paths::resolve(Some(Path::new("/srv/player"))).expect("resolve");
        assert_eq!(paths.root(), Path::new("/srv/player"));
    }

    #[test]
    fn json_round_trip_through_atomic_write() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("doc.json");
        let mut doc = BTreeMap::new();
        doc.insert(String::from("volume"), 42_u8);

        write_json_atomic(&path, &doc).expect("write");
        let loaded: BTreeMap<String, u8> = read_json(&path).expect("read").expect("present");
        assert_eq!(loaded, doc);
        assert!(!dir.path().join("nested").join("doc.json.tmp").exists());
    }

    #[test]
    fn missing_json_reads_as_none() {
        let dir = tempdir().expect("tempdir");
        let loaded: Option<BTreeMap<String, u8>> =
            read_json(&dir.path().join("absent.json")).expect("read");
        assert!(loaded.is_none());
    }

    #[test]
    fn malformed_json_is_an_error() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("broken.json");
        fs::write(&path, "{ not json").expect("write");
        let err = read_json::<BTreeMap<String, u8>>(&path).expect_err("parse error");
        assert!(err.to_string().contains("failed to parse"), "{err:#}");
    }

    #[test]
    fn settings_default_without_file() {
        let dir = tempdir().expect("tempdir");
        let settings = Settings::load(&Paths::new(dir.path())).expect("load");
        assert!(settings.resume);
        assert!(!settings.autoplay);
        assert_eq!(settings.artwork_size, 150);
    }

    #[test]
    fn settings_file_overrides_defaults() {
        let dir = tempdir().expect("tempdir");
        fs::write(
            dir.path().join("settings.toml"),
            "autoplay = true\nartwork_cache_size = 12\n",
        )
        .expect("write settings");

        let settings = Settings::load(&Paths::new(dir.path())).expect("load");
        assert!(settings.autoplay);
        assert_eq!(settings.artwork_cache_size, 12);
        assert!(settings.autosave);
    }

    #[test]
    fn zero_cache_size_is_rejected() {
        let settings = Settings {
            artwork_cache_size: 0,
            ..Settings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn strips_windows_verbatim_prefix() {
        let cleaned = strip_windows_verbatim_prefix(Path::new(r"\\?\E:\LOCALMUSIC\a.mp3"));
        assert_eq!(cleaned, PathBuf::from(r"E:\LOCALMUSIC\a.mp3"));
    }
}
