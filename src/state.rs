use crate::config;
use crate::model::{RepeatMode, WindowGeometry};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

pub const DEFAULT_VOLUME: u8 = 50;
pub const MAX_RECENT_PLAYLISTS: usize = 10;

/// Everything needed to bring a session back after a restart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    pub playlist: Vec<PathBuf>,
    #[serde(with = "cursor", default)]
    pub current_index: Option<usize>,
    #[serde(default = "default_volume", deserialize_with = "volume::deserialize")]
    pub volume: u8,
    /// Playback position in milliseconds.
    #[serde(default)]
    pub position: u64,
    #[serde(default)]
    pub repeat: RepeatMode,
    #[serde(default)]
    pub shuffle: bool,
    #[serde(default)]
    pub window_geometry: WindowGeometry,
    #[serde(default)]
    pub recent_playlists: Vec<PathBuf>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            playlist: Vec::new(),
            current_index: None,
            volume: DEFAULT_VOLUME,
            position: 0,
            repeat: RepeatMode::Off,
            shuffle: false,
            window_geometry: WindowGeometry::default(),
            recent_playlists: Vec::new(),
        }
    }
}

impl SessionState {
    /// Moves `path` to the front of the recent playlist list.
    pub fn remember_playlist(&mut self, path: &Path) {
        remember(&mut self.recent_playlists, path);
    }
}

pub(crate) fn remember(recent: &mut Vec<PathBuf>, path: &Path) {
    recent.retain(|known| known != path);
    recent.insert(0, path.to_path_buf());
    recent.truncate(MAX_RECENT_PLAYLISTS);
}

fn default_volume() -> u8 {
    DEFAULT_VOLUME
}

/// The cursor is stored as an integer where `-1` means "no track".
mod cursor {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Option<usize>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(index) => serializer.serialize_i64(*index as i64),
            None => serializer.serialize_i64(-1),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<usize>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<i64>::deserialize(deserializer)?;
        Ok(raw.and_then(|index| usize::try_from(index).ok()))
    }
}

mod volume {
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<u8, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = i64::deserialize(deserializer)?;
        Ok(raw.clamp(0, 100) as u8)
    }
}

/// Reads and writes the session snapshot file.
#[derive(Debug, Clone)]
pub struct StateStore {
    file: PathBuf,
}

impl StateStore {
    pub fn new(file: impl Into<PathBuf>) -> Self {
        Self { file: file.into() }
    }

    pub fn file(&self) -> &Path {
        &self.file
    }

    pub fn save(&self, state: &SessionState) -> bool {
        match config::write_json_atomic(&self.file, state) {
            Ok(()) => {
                tracing::debug!(tracks = state.playlist.len(), "session state saved");
                true
            }
            Err(err) => {
                tracing::error!("failed to save session state: {err:#}");
                false
            }
        }
    }

    /// Loads the last snapshot. Tracks whose files are gone are dropped and
    /// a cursor past the end moves to the last track. Any read or parse failure
    /// yields `None`.
    pub fn load(&self) -> Option<SessionState> {
        let mut state = match config::read_json::<SessionState>(&self.file) {
            Ok(Some(state)) => state,
            Ok(None) => return None,
            Err(err) => {
                tracing::error!("session state unreadable: {err:#}");
                return None;
            }
        };

        let before = state.playlist.len();
        state.playlist.retain(|path| path.exists());
        if state.playlist.len() < before {
            tracing::warn!(
                dropped = before - state.playlist.len(),
                "restored playlist skipped missing files"
            );
        }

        state.current_index = match state.current_index {
            _ if state.playlist.is_empty() => None,
            Some(index) if index >= state.playlist.len() => Some(state.playlist.len() - 1),
            other => other,
        };
        Some(state)
    }

    pub fn clear(&self) -> bool {
        match fs::remove_file(&self.file) {
            Ok(()) => true,
            Err(err) if err.kind() == ErrorKind::NotFound => true,
            Err(err) => {
                tracing::error!(path = %self.file.display(), %err, "failed to clear session state");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn touch(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, b"audio").expect("write fixture");
        path
    }

    #[test]
    fn missing_file_loads_none() {
        let dir = tempdir().expect("tempdir");
        assert!(StateStore::new(dir.path().join("state.json")).load().is_none());
    }

    #[test]
    fn cursor_serializes_as_minus_one() {
        let json = serde_json::to_value(SessionState::default()).expect("serialize");
        assert_eq!(json["current_index"], serde_json::json!(-1));
        assert_eq!(json["volume"], serde_json::json!(50));
        assert_eq!(json["repeat"], serde_json::json!(0));
    }

    #[test]
    fn missing_tracks_are_dropped_and_cursor_clamped() {
        let dir = tempdir().expect("tempdir");
        let a = touch(dir.path(), "a.mp3");
        let gone = dir.path().join("gone.mp3");
        let store = StateStore::new(dir.path().join("state.json"));

        let state = SessionState {
            playlist: vec![a.clone(), gone],
            current_index: Some(1),
            ..SessionState::default()
        };
        assert!(store.save(&state));

        let loaded = store.load().expect("state");
        assert_eq!(loaded.playlist, vec![a]);
        assert_eq!(loaded.current_index, Some(0));
    }

    #[test]
    fn cursor_past_the_end_lands_on_last_track() {
        let dir = tempdir().expect("tempdir");
        let a = touch(dir.path(), "a.mp3");
        let b = touch(dir.path(), "b.mp3");
        let c = touch(dir.path(), "c.mp3");
        let store = StateStore::new(dir.path().join("state.json"));

        let state = SessionState {
            playlist: vec![a.clone(), b.clone(), c.clone()],
            current_index: Some(2),
            ..SessionState::default()
        };
        assert!(store.save(&state));
        fs::remove_file(&c).expect("remove");

        let loaded = store.load().expect("state");
        assert_eq!(loaded.playlist, vec![a, b]);
        assert_eq!(loaded.current_index, Some(1));
    }

    #[test]
    fn cursor_before_removed_tracks_is_kept() {
        let dir = tempdir().expect("tempdir");
        let a = touch(dir.path(), "a.mp3");
        let b = touch(dir.path(), "b.mp3");
        let c = touch(dir.path(), "c.mp3");
        let store = StateStore::new(dir.path().join("state.json"));

        let state = SessionState {
            playlist: vec![a.clone(), b.clone(), c.clone()],
            current_index: Some(1),
            ..SessionState::default()
        };
        assert!(store.save(&state));
        fs::remove_file(&c).expect("remove");

        let loaded = store.load().expect("state");
        assert_eq!(loaded.playlist, vec![a, b]);
        assert_eq!(loaded.current_index, Some(1));
    }

    #[test]
    fn all_tracks_missing_clears_cursor() {
        let dir = tempdir().expect("tempdir");
        let store = StateStore::new(dir.path().join("state.json"));
        let state = SessionState {
            playlist: vec![dir.path().join("gone.mp3")],
            current_index: Some(0),
            ..SessionState::default()
        };
        assert!(store.save(&state));
        assert_eq!(store.load().expect("state").current_index, None);
    }

    #[test]
    fn minimal_document_takes_defaults() {
        let dir = tempdir().expect("tempdir");
        let file = dir.path().join("state.json");
        fs::write(&file, r#"{"playlist": [], "volume": 140, "repeat": true}"#).expect("write");

        let loaded = StateStore::new(&file).load().expect("state");
        assert_eq!(loaded.volume, 100);
        assert_eq!(loaded.repeat, RepeatMode::All);
        assert_eq!(loaded.current_index, None);
        assert_eq!(loaded.window_geometry, WindowGeometry::default());
        assert!(loaded.recent_playlists.is_empty());
    }

    #[test]
    fn document_without_playlist_is_rejected() {
        let dir = tempdir().expect("tempdir");
        let file = dir.path().join("state.json");
        fs::write(&file, r#"{"volume": 30}"#).expect("write");
        assert!(StateStore::new(&file).load().is_none());
    }

    #[test]
    fn corrupt_file_loads_none() {
        let dir = tempdir().expect("tempdir");
        let file = dir.path().join("state.json");
        fs::write(&file, "{{{{").expect("write");
        assert!(StateStore::new(&file).load().is_none());
    }

    #[test]
    fn clear_is_idempotent() {
        let dir = tempdir().expect("tempdir");
        let store = StateStore::new(dir.path().join("state.json"));
        assert!(store.save(&SessionState::default()));
        assert!(store.clear());
        assert!(store.clear());
        assert!(store.load().is_none());
    }

    #[test]
    fn recent_playlists_are_capped_and_deduplicated() {
        let mut state = SessionState::default();
        for n in 0..12 {
            state.remember_playlist(&PathBuf::from(format!("/lists/{n}.m3u")));
        }
        state.remember_playlist(Path::new("/lists/5.m3u"));

        assert_eq!(state.recent_playlists.len(), MAX_RECENT_PLAYLISTS);
        assert_eq!(state.recent_playlists[0], PathBuf::from("/lists/5.m3u"));
        assert_eq!(state.recent_playlists[1], PathBuf::from("/lists/11.m3u"));
        assert_eq!(
            state
                .recent_playlists
                .iter()
                .filter(|p| p.ends_with("5.m3u"))
                .count(),
            1
        );
    }
}
