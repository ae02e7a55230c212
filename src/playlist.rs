use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Ordered list of unique track paths plus a cursor.
///
/// The cursor is either `None` or a valid index; every mutation below
/// repairs it so that `current_index() < len()` always holds.
#[derive(Debug, Clone, Default)]
pub struct Playlist {
    tracks: Vec<PathBuf>,
    members: HashSet<PathBuf>,
    current: Option<usize>,
}

impl Playlist {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an existing file. Empty, missing and duplicate paths are
    /// rejected with `false`.
    pub fn add(&mut self, path: impl AsRef<Path>) -> bool {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            tracing::warn!("refusing to add empty path");
            return false;
        }
        if !path.is_file() {
            tracing::warn!(path = %path.display(), "refusing to add missing file");
            return false;
        }
        if self.members.contains(path) {
            tracing::debug!(path = %path.display(), "track already in playlist");
            return false;
        }

        self.members.insert(path.to_path_buf());
        self.tracks.push(path.to_path_buf());
        true
    }

    pub fn add_many<I, P>(&mut self, paths: I) -> usize
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        paths.into_iter().filter(|path| self.add(path)).count()
    }

    pub fn remove(&mut self, index: usize) -> bool {
        if index >= self.tracks.len() {
            return false;
        }

        let removed = self.tracks.remove(index);
        self.members.remove(&removed);

        self.current = match self.current {
            Some(current) if index < current => Some(current - 1),
            Some(current) if index == current => {
                if self.tracks.is_empty() {
                    None
                } else {
                    Some(current.min(self.tracks.len() - 1))
                }
            }
            other => other,
        };
        true
    }

    pub fn clear(&mut self) {
        self.tracks.clear();
        self.members.clear();
        self.current = None;
    }

    pub fn set_current(&mut self, index: usize) -> bool {
        if index >= self.tracks.len() {
            return false;
        }
        self.current = Some(index);
        true
    }

    pub fn current(&self) -> Option<&Path> {
        self.current.and_then(|idx| self.track_at(idx))
    }

    pub fn current_index(&self) -> Option<usize> {
        self.current
    }

    /// Moves the cursor forward, wrapping to the first track.
    pub fn advance(&mut self) -> Option<&Path> {
        if self.tracks.is_empty() {
            return None;
        }
        let next = match self.current {
            Some(current) => (current + 1) % self.tracks.len(),
            None => 0,
        };
        self.current = Some(next);
        self.track_at(next)
    }

    /// Moves the cursor back, wrapping to the last track.
    pub fn retreat(&mut self) -> Option<&Path> {
        if self.tracks.is_empty() {
            return None;
        }
        let last = self.tracks.len() - 1;
        let prev = match self.current {
            Some(0) | None => last,
            Some(current) => current - 1,
        };
        self.current = Some(prev);
        self.track_at(prev)
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn tracks(&self) -> &[PathBuf] {
        &self.tracks
    }

    pub fn track_at(&self, index: usize) -> Option<&Path> {
        self.tracks.get(index).map(PathBuf::as_path)
    }

    pub fn position_of(&self, path: &Path) -> Option<usize> {
        if !self.members.contains(path) {
            return None;
        }
        self.tracks.iter().position(|track| track == path)
    }

    /// Reorders one track; the cursor keeps pointing at the same track.
    pub fn move_track(&mut self, from: usize, to: usize) -> bool {
        let len = self.tracks.len();
        if from >= len || to >= len {
            return false;
        }
        if from == to {
            return true;
        }

        let current_path = self.current().map(Path::to_path_buf);
        let track = self.tracks.remove(from);
        self.tracks.insert(to, track);
        self.follow(current_path);
        true
    }

    /// Stable sort by a caller-provided key; the cursor follows its track.
    pub fn sort_by_key<K, F>(&mut self, mut key: F)
    where
        K: Ord,
        F: FnMut(&Path) -> K,
    {
        let current_path = self.current().map(Path::to_path_buf);
        self.tracks.sort_by_cached_key(|track| key(track.as_path()));
        self.follow(current_path);
    }

    /// Indices of tracks whose file name or path contains `query`,
    /// compared case-insensitively. An empty query matches everything.
    pub fn filter(&self, query: &str) -> Vec<usize> {
        let needle = query.trim().to_lowercase();
        self.tracks
            .iter()
            .enumerate()
            .filter(|(_, track)| {
                if needle.is_empty() {
                    return true;
                }
                let name = track
                    .file_name()
                    .map(|name| name.to_string_lossy().to_lowercase())
                    .unwrap_or_default();
                name.contains(&needle) || track.to_string_lossy().to_lowercase().contains(&needle)
            })
            .map(|(idx, _)| idx)
            .collect()
    }

    fn follow(&mut self, path: Option<PathBuf>) {
        if let Some(path) = path {
            self.current = self.tracks.iter().position(|track| *track == path);
        }
    }
}
