use crate::config;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use url::Url;

const FORMAT_VERSION: &str = "1.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaylistFormat {
    M3u,
    Json,
}

impl PlaylistFormat {
    /// `.json` files are JSON playlists; everything else is treated as M3U.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(OsStr::to_str) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => Self::Json,
            _ => Self::M3u,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct JsonPlaylist {
    #[serde(default)]
    version: String,
    #[serde(default)]
    tracks: Vec<PathBuf>,
    #[serde(default)]
    metadata: Map<String, Value>,
}

/// Writes `tracks` in the format implied by the file extension and returns
/// how many tracks were written.
pub fn save(path: &Path, tracks: &[PathBuf]) -> Result<usize> {
    match PlaylistFormat::from_path(path) {
        PlaylistFormat::M3u => save_m3u(path, tracks),
        PlaylistFormat::Json => {
            let mut metadata = Map::new();
            metadata.insert(
                String::from("name"),
                Value::String(crate::model::title_from_path(path)),
            );
            save_json(path, tracks, &metadata).map(|()| tracks.len())
        }
    }
}

pub fn load(path: &Path) -> Result<Vec<PathBuf>> {
    match PlaylistFormat::from_path(path) {
        PlaylistFormat::M3u => load_m3u(path),
        PlaylistFormat::Json => load_json(path).map(|(tracks, _)| tracks),
    }
}

/// Extended M3U with one `#EXTINF` line per track and `file://` URIs.
/// Tracks that no longer exist are skipped.
pub fn save_m3u(path: &Path, tracks: &[PathBuf]) -> Result<usize> {
    let mut out = String::from("#EXTM3U\n");
    let mut written = 0;

    for track in tracks {
        if !track.exists() {
            tracing::warn!(track = %track.display(), "skipping missing track in export");
            continue;
        }
        let absolute = std::path::absolute(track)
            .with_context(|| format!("failed to resolve {}", track.display()))?;
        let Ok(uri) = Url::from_file_path(&absolute) else {
            tracing::warn!(track = %absolute.display(), "track path has no file URI form");
            continue;
        };
        out.push_str(&format!(
            "#EXTINF:-1,{}\n{uri}\n",
            crate::model::title_from_path(track)
        ));
        written += 1;
    }

    write_file(path, &out)?;
    tracing::info!(path = %path.display(), tracks = written, "M3U playlist saved");
    Ok(written)
}

/// Reads an M3U or extended M3U playlist. Entries may be `file://` URIs,
/// absolute paths or paths relative to the playlist's folder.
pub fn load_m3u(path: &Path) -> Result<Vec<PathBuf>> {
    let raw =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let base = path.parent().unwrap_or_else(|| Path::new(""));

    let mut tracks = Vec::new();
    for line in raw.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some(track) = resolve_entry(line, base) else {
            tracing::warn!(entry = line, "unreadable playlist entry");
            continue;
        };
        if track.exists() {
            tracks.push(track);
        } else {
            tracing::warn!(track = %track.display(), "playlist entry not found");
        }
    }

    tracing::info!(path = %path.display(), tracks = tracks.len(), "M3U playlist loaded");
    Ok(tracks)
}

fn resolve_entry(entry: &str, base: &Path) -> Option<PathBuf> {
    if entry
        .get(..7)
        .is_some_and(|scheme| scheme.eq_ignore_ascii_case("file://"))
    {
        return Url::parse(entry).ok()?.to_file_path().ok();
    }

    let path = PathBuf::from(entry);
    if path.is_absolute() {
        Some(path)
    } else {
        Some(base.join(path))
    }
}

pub fn save_json(path: &Path, tracks: &[PathBuf], metadata: &Map<String, Value>) -> Result<()> {
    let document = JsonPlaylist {
        version: FORMAT_VERSION.to_string(),
        tracks: tracks.to_vec(),
        metadata: metadata.clone(),
    };
    let json = serde_json::to_string_pretty(&document)?;
    write_file(path, &json)?;
    tracing::info!(path = %path.display(), tracks = tracks.len(), "JSON playlist saved");
    Ok(())
}

/// Reads a JSON playlist, dropping tracks whose files are gone.
pub fn load_json(path: &Path) -> Result<(Vec<PathBuf>, Map<String, Value>)> {
    let Some(document) = config::read_json::<JsonPlaylist>(path)? else {
        anyhow::bail!("playlist {} does not exist", path.display());
    };

    let total = document.tracks.len();
    let tracks: Vec<PathBuf> = document
        .tracks
        .into_iter()
        .filter(|track| track.exists())
        .collect();
    if tracks.len() < total {
        tracing::warn!(missing = total - tracks.len(), "playlist tracks not found");
    }
    tracing::info!(path = %path.display(), tracks = tracks.len(), "JSON playlist loaded");
    Ok((tracks, document.metadata))
}

fn write_file(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        config::ensure_dir(parent)?;
    }
    fs::write(path, contents).with_context(|| format!("failed to write {}", path.display()))
}
