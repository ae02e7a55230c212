use crate::config;
use crate::model::{self, UNKNOWN_ARTIST};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use time::OffsetDateTime;

pub const HISTORY_CAPACITY: usize = 100;
const FORMAT_VERSION: &str = "1.0";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub file_path: PathBuf,
    pub title: String,
    pub artist: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

#[derive(Debug, Serialize, Deserialize)]
struct HistoryFile {
    version: String,
    history: Vec<HistoryEntry>,
}

/// Recently played tracks, newest first, one entry per path.
#[derive(Debug)]
pub struct PlayHistory {
    file: PathBuf,
    entries: Vec<HistoryEntry>,
}

impl PlayHistory {
    /// Loads the history stored at `file`. A missing or unreadable file
    /// yields an empty history.
    pub fn open(file: impl Into<PathBuf>) -> Self {
        let file = file.into();
        let mut entries = match config::read_json::<HistoryFile>(&file) {
            Ok(Some(stored)) => stored.history,
            Ok(None) => Vec::new(),
            Err(err) => {
                tracing::error!("play history unreadable, starting empty: {err:#}");
                Vec::new()
            }
        };
        entries.truncate(HISTORY_CAPACITY);
        tracing::debug!(entries = entries.len(), "play history loaded");
        Self { file, entries }
    }

    pub fn record(&mut self, path: &Path, title: Option<&str>, artist: Option<&str>) {
        self.record_at(path, title, artist, now());
    }

    pub fn record_at(
        &mut self,
        path: &Path,
        title: Option<&str>,
        artist: Option<&str>,
        timestamp: OffsetDateTime,
    ) {
        self.entries.retain(|entry| entry.file_path != path);
        self.entries.insert(
            0,
            HistoryEntry {
                file_path: path.to_path_buf(),
                title: title
                    .map(str::to_string)
                    .unwrap_or_else(|| model::title_from_path(path)),
                artist: artist.unwrap_or(UNKNOWN_ARTIST).to_string(),
                timestamp,
            },
        );
        self.entries.truncate(HISTORY_CAPACITY);
        self.save();
    }

    /// The `n` most recent entries.
    pub fn recent(&self, n: usize) -> &[HistoryEntry] {
        &self.entries[..n.min(self.entries.len())]
    }

    pub fn all(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.save();
    }

    fn save(&self) {
        let stored = HistoryFile {
            version: FORMAT_VERSION.to_string(),
            history: self.entries.clone(),
        };
        if let Err(err) = config::write_json_atomic(&self.file, &stored) {
            tracing::error!("failed to save play history: {err:#}");
        }
    }
}

pub(crate) fn now() -> OffsetDateTime {
    OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;
    use time::Duration;

    #[test]
    fn record_puts_newest_first_and_dedups() {
        let dir = tempdir().expect("tempdir");
        let mut history = PlayHistory::open(dir.path().join("history.json"));
        let start = OffsetDateTime::now_utc();

        history.record_at(Path::new("/m/a.mp3"), Some("A"), Some("X"), start);
        history.record_at(Path::new("/m/b.mp3"), Some("B"), None, start + Duration::seconds(1));
        history.record_at(
            Path::new("/m/a.mp3"),
            Some("A (live)"),
            Some("X"),
            start + Duration::seconds(2),
        );

        assert_eq!(history.len(), 2);
        let first = &history.all()[0];
        assert_eq!(first.file_path, PathBuf::from("/m/a.mp3"));
        assert_eq!(first.title, "A (live)");
        assert_eq!(first.timestamp, start + Duration::seconds(2));
        assert_eq!(history.all()[1].artist, UNKNOWN_ARTIST);
    }

    #[test]
    fn missing_title_uses_file_stem() {
        let dir = tempdir().expect("tempdir");
        let mut history = PlayHistory::open(dir.path().join("history.json"));
        history.record(Path::new("/m/Intro Theme.ogg"), None, None);
        assert_eq!(history.all()[0].title, "Intro Theme");
    }

    #[test]
    fn capacity_keeps_most_recent_hundred() {
        let dir = tempdir().expect("tempdir");
        let mut history = PlayHistory::open(dir.path().join("history.json"));
        for n in 0..105 {
            history.record(&PathBuf::from(format!("/m/{n}.mp3")), None, None);
        }
        assert_eq!(history.len(), HISTORY_CAPACITY);
        assert_eq!(history.all()[0].file_path, PathBuf::from("/m/104.mp3"));
        assert_eq!(history.all()[99].file_path, PathBuf::from("/m/5.mp3"));
    }

    #[test]
    fn recent_is_bounded_by_len() {
        let dir = tempdir().expect("tempdir");
        let mut history = PlayHistory::open(dir.path().join("history.json"));
        history.record(Path::new("/m/a.mp3"), None, None);
        history.record(Path::new("/m/b.mp3"), None, None);
        assert_eq!(history.recent(1).len(), 1);
        assert_eq!(history.recent(50).len(), 2);
        assert!(history.recent(0).is_empty());
    }

    #[test]
    fn survives_reopen_in_order() {
        let dir = tempdir().expect("tempdir");
        let file = dir.path().join("history.json");
        {
            let mut history = PlayHistory::open(&file);
            history.record(Path::new("/m/a.mp3"), Some("A"), Some("Artist"));
            history.record(Path::new("/m/b.mp3"), Some("B"), Some("Artist"));
        }

        let raw = fs::read_to_string(&file).expect("read");
        assert!(raw.contains("\"version\": \"1.0\""));

        let history = PlayHistory::open(&file);
        let titles: Vec<_> = history.all().iter().map(|e| e.title.as_str()).collect();
        assert_eq!(titles, vec!["B", "A"]);
    }

    #[test]
    fn corrupt_file_loads_empty() {
        let dir = tempdir().expect("tempdir");
        let file = dir.path().join("history.json");
        fs::write(&file, "{\"version\": \"1.0\", \"history\": [").expect("write");
        assert!(PlayHistory::open(&file).is_empty());
    }

    #[test]
    fn clear_persists() {
        let dir = tempdir().expect("tempdir");
        let file = dir.path().join("history.json");
        let mut history = PlayHistory::open(&file);
        history.record(Path::new("/m/a.mp3"), None, None);
        history.clear();
        assert!(PlayHistory::open(&file).is_empty());
    }
}
