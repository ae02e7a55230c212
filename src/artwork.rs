use crate::config;
use anyhow::{Context, Result};
use image::imageops::FilterType;
use image::{Rgba, RgbaImage};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

pub const DEFAULT_MAX_ENTRIES: usize = 100;
const INDEX_FILE: &str = "artwork_index.bin";

/// A decoded cover image as tightly packed RGBA8 pixels.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artwork {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

impl fmt::Debug for Artwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Artwork")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.rgba.len())
            .finish()
    }
}

impl Artwork {
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let image = image::load_from_memory(bytes)
            .context("embedded artwork is not a decodable image")?
            .to_rgba8();
        Ok(Self::from_image(image))
    }

    pub fn from_image(image: RgbaImage) -> Self {
        Self {
            width: image.width(),
            height: image.height(),
            rgba: image.into_raw(),
        }
    }

    pub fn to_image(&self) -> Option<RgbaImage> {
        RgbaImage::from_raw(self.width, self.height, self.rgba.clone())
    }

    /// Scales the image to fit inside a `size` x `size` box, keeping the
    /// aspect ratio. Images that already fit are returned unchanged.
    pub fn fit(&self, size: u32) -> Self {
        if size == 0 || (self.width <= size && self.height <= size) {
            return self.clone();
        }
        let Some(image) = self.to_image() else {
            return self.clone();
        };

        let scale = f64::from(size) / f64::from(self.width.max(self.height));
        let width = ((f64::from(self.width) * scale).round() as u32).max(1);
        let height = ((f64::from(self.height) * scale).round() as u32).max(1);
        Self::from_image(image::imageops::resize(
            &image,
            width,
            height,
            FilterType::Triangle,
        ))
    }
}

/// Square stand-in shown when a track has no artwork: a dark diagonal
/// gradient with a light eighth-note in the middle.
pub fn placeholder(size: u32) -> Artwork {
    let size = size.max(1);
    let s = f64::from(size);
    let image = RgbaImage::from_fn(size, size, |x, y| {
        let (fx, fy) = (f64::from(x), f64::from(y));
        if in_note_glyph(fx / s, fy / s) {
            return Rgba([200, 205, 215, 255]);
        }
        let t = (fx + fy) / (2.0 * s);
        let mix = |from: f64, to: f64| (from + (to - from) * t).round() as u8;
        Rgba([mix(40.0, 70.0), mix(44.0, 76.0), mix(52.0, 92.0), 255])
    });
    Artwork::from_image(image)
}

fn in_note_glyph(u: f64, v: f64) -> bool {
    let head = (u - 0.44).powi(2) + (v - 0.68).powi(2) <= 0.11_f64.powi(2);
    let stem = (0.52..=0.56).contains(&u) && (0.26..=0.68).contains(&v);
    let flag = (0.56..=0.68).contains(&u) && (0.26..=0.33).contains(&v);
    head || stem || flag
}

/// Hex SHA-256 of the track path. Artwork is keyed by where a file lives,
/// not by what it contains.
pub fn cache_key(path: &Path) -> String {
    Sha256::digest(path.to_string_lossy().as_bytes())
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect()
}

/// On-disk cover art cache: one bincode blob per image plus a bincode
/// index mapping cache keys to blob files.
#[derive(Debug)]
pub struct ArtworkCache {
    dir: PathBuf,
    index: HashMap<String, PathBuf>,
    max_entries: usize,
}

impl ArtworkCache {
    /// Opens the cache in `dir`. An unreadable index starts the cache
    /// empty.
    pub fn open(dir: impl Into<PathBuf>, max_entries: usize) -> Self {
        let dir = dir.into();
        let index = match load_index(&dir.join(INDEX_FILE)) {
            Ok(index) => index,
            Err(err) => {
                tracing::error!("artwork index unreadable, starting empty: {err:#}");
                HashMap::new()
            }
        };
        tracing::debug!(entries = index.len(), dir = %dir.display(), "artwork cache opened");
        Self {
            dir,
            index,
            max_entries: max_entries.max(1),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    /// Artwork for `path`, from the cache when it is at least as new as
    /// the audio file, otherwise extracted from the file's tags.
    pub fn get(&mut self, path: &Path) -> Option<Artwork> {
        self.get_with(path, crate::library::embedded_cover_art)
    }

    pub fn get_with<F>(&mut self, path: &Path, extract: F) -> Option<Artwork>
    where
        F: FnOnce(&Path) -> Option<Vec<u8>>,
    {
        let key = cache_key(path);

        if let Some(blob) = self.index.get(&key) {
            let source_mtime = modified(path).unwrap_or(SystemTime::UNIX_EPOCH);
            let blob_mtime = modified(blob);
            if blob_mtime.is_some_and(|blob_mtime| blob_mtime >= source_mtime) {
                match read_blob(blob) {
                    Ok(artwork) => return Some(artwork),
                    Err(err) => tracing::warn!("dropping unreadable artwork blob: {err:#}"),
                }
            }
        }

        let bytes = extract(path)?;
        let artwork = match Artwork::decode(&bytes) {
            Ok(artwork) => artwork,
            Err(err) => {
                tracing::warn!(path = %path.display(), "{err:#}");
                return None;
            }
        };
        self.put(&key, &artwork);
        Some(artwork)
    }

    /// Stores an image under `key`, evicting the oldest fifth of the cache
    /// first when it is full.
    pub fn put(&mut self, key: &str, artwork: &Artwork) -> bool {
        match self.try_put(key, artwork) {
            Ok(()) => true,
            Err(err) => {
                tracing::error!("failed to cache artwork: {err:#}");
                false
            }
        }
    }

    fn try_put(&mut self, key: &str, artwork: &Artwork) -> Result<()> {
        config::ensure_dir(&self.dir)?;
        if self.index.len() >= self.max_entries {
            self.evict();
        }

        let blob = self.dir.join(format!("{key}.bin"));
        let bytes = bincode::serde::encode_to_vec(artwork, bincode::config::standard())
            .context("failed to encode artwork")?;
        fs::write(&blob, bytes).with_context(|| format!("failed to write {}", blob.display()))?;
        self.index.insert(key.to_string(), blob);
        self.persist_index()
    }

    fn evict(&mut self) {
        let mut by_age: Vec<(SystemTime, String)> = self
            .index
            .iter()
            .map(|(key, blob)| {
                let mtime = modified(blob).unwrap_or(SystemTime::UNIX_EPOCH);
                (mtime, key.clone())
            })
            .collect();
        by_age.sort();

        let count = (by_age.len() / 5).max(1);
        for (_, key) in by_age.into_iter().take(count) {
            if let Some(blob) = self.index.remove(&key) {
                remove_blob(&blob);
            }
        }
        tracing::debug!(evicted = count, remaining = self.index.len(), "artwork cache evicted");
    }

    /// Deletes every blob and empties the index.
    pub fn clear(&mut self) {
        for (_, blob) in self.index.drain() {
            remove_blob(&blob);
        }
        if let Err(err) = self.persist_index() {
            tracing::error!("failed to persist cleared artwork index: {err:#}");
        }
    }

    fn persist_index(&self) -> Result<()> {
        config::ensure_dir(&self.dir)?;
        let index_path = self.dir.join(INDEX_FILE);
        let bytes = bincode::serde::encode_to_vec(&self.index, bincode::config::standard())
            .context("failed to encode artwork index")?;
        let staging = self.dir.join(format!("{INDEX_FILE}.tmp"));
        fs::write(&staging, bytes)
            .with_context(|| format!("failed to write {}", staging.display()))?;
        fs::rename(&staging, &index_path)
            .with_context(|| format!("failed to replace {}", index_path.display()))
    }
}

fn load_index(path: &Path) -> Result<HashMap<String, PathBuf>> {
    if !path.exists() {
        return Ok(HashMap::new());
    }
    let bytes = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let (index, _) = bincode::serde::decode_from_slice(&bytes, bincode::config::standard())
        .with_context(|| format!("failed to decode {}", path.display()))?;
    Ok(index)
}

fn read_blob(path: &Path) -> Result<Artwork> {
    let bytes = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let (artwork, _) = bincode::serde::decode_from_slice(&bytes, bincode::config::standard())
        .with_context(|| format!("failed to decode {}", path.display()))?;
    Ok(artwork)
}

fn remove_blob(path: &Path) {
    if let Err(err) = fs::remove_file(path)
        && err.kind() != ErrorKind::NotFound
    {
        tracing::warn!(path = %path.display(), %err, "failed to delete artwork blob");
    }
}

fn modified(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|meta| meta.modified()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::ImageFormat;
    use std::cell::Cell;
    use std::fs::File;
    use std::io::Cursor;
    use std::time::Duration;
    use tempfile::tempdir;

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let image = RgbaImage::from_pixel(width, height, Rgba([200, 10, 10, 255]));
        let mut buffer = Cursor::new(Vec::new());
        image
            .write_to(&mut buffer, ImageFormat::Png)
            .expect("encode png");
        buffer.into_inner()
    }

    fn set_mtime(path: &Path, time: SystemTime) {
        File::options()
            .write(true)
            .open(path)
            .expect("open for mtime")
            .set_modified(time)
            .expect("set mtime");
    }

    #[test]
    fn key_is_hex_sha256_of_path() {
        let key = cache_key(Path::new("/music/a.mp3"));
        assert_eq!(key.len(), 64);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(key, cache_key(Path::new("/music/b.mp3")));
    }

    #[test]
    fn extracts_once_then_serves_from_cache() {
        let dir = tempdir().expect("tempdir");
        let track = dir.path().join("song.mp3");
        fs::write(&track, b"audio").expect("write track");
        set_mtime(&track, SystemTime::now() - Duration::from_secs(60));

        let mut cache = ArtworkCache::open(dir.path().join("cache"), 10);
        let calls = Cell::new(0);
        let extract = |_: &Path| {
            calls.set(calls.get() + 1);
            Some(png_bytes(3, 2))
        };

        let first = cache.get_with(&track, extract).expect("artwork");
        assert_eq!((first.width, first.height), (3, 2));
        let second = cache.get_with(&track, extract).expect("artwork");
        assert_eq!(first, second);
        assert_eq!(calls.get(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn no_embedded_artwork_caches_nothing() {
        let dir = tempdir().expect("tempdir");
        let mut cache = ArtworkCache::open(dir.path(), 10);
        assert!(cache.get_with(Path::new("/nope.mp3"), |_| None).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn undecodable_artwork_is_ignored() {
        let dir = tempdir().expect("tempdir");
        let mut cache = ArtworkCache::open(dir.path(), 10);
        let artwork = cache.get_with(Path::new("/x.mp3"), |_| Some(b"garbage".to_vec()));
        assert!(artwork.is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn newer_source_file_is_extracted_again() {
        let dir = tempdir().expect("tempdir");
        let track = dir.path().join("song.flac");
        fs::write(&track, b"audio").expect("write track");

        let mut cache = ArtworkCache::open(dir.path().join("cache"), 10);
        cache.get_with(&track, |_| Some(png_bytes(2, 2)));

        set_mtime(&track, SystemTime::now() + Duration::from_secs(3600));
        let refreshed = cache
            .get_with(&track, |_| Some(png_bytes(5, 5)))
            .expect("artwork");
        assert_eq!(refreshed.width, 5);
    }

    #[test]
    fn missing_source_still_hits_cache() {
        let dir = tempdir().expect("tempdir");
        let track = dir.path().join("gone.mp3");
        let mut cache = ArtworkCache::open(dir.path().join("cache"), 10);
        cache.put(&cache_key(&track), &placeholder(4));

        let hit = cache.get_with(&track, |_| panic!("should not extract"));
        assert_eq!(hit.map(|art| art.width), Some(4));
    }

    #[test]
    fn full_cache_evicts_oldest_fifth() {
        let dir = tempdir().expect("tempdir");
        let mut cache = ArtworkCache::open(dir.path(), 10);
        let base = SystemTime::now() - Duration::from_secs(10_000);

        for n in 0..10u64 {
            let key = format!("key{n}");
            assert!(cache.put(&key, &placeholder(2)));
            set_mtime(
                &dir.path().join(format!("{key}.bin")),
                base + Duration::from_secs(n * 10),
            );
        }
        assert_eq!(cache.len(), 10);

        assert!(cache.put("fresh", &placeholder(2)));
        assert_eq!(cache.len(), 9);
        assert!(!cache.contains("key0"));
        assert!(!cache.contains("key1"));
        assert!(cache.contains("key2"));
        assert!(cache.contains("fresh"));
        assert!(!dir.path().join("key0.bin").exists());
    }

    #[test]
    fn small_cache_evicts_at_least_one() {
        let dir = tempdir().expect("tempdir");
        let mut cache = ArtworkCache::open(dir.path(), 2);
        cache.put("a", &placeholder(1));
        set_mtime(
            &dir.path().join("a.bin"),
            SystemTime::now() - Duration::from_secs(100),
        );
        cache.put("b", &placeholder(1));
        cache.put("c", &placeholder(1));

        assert_eq!(cache.len(), 2);
        assert!(!cache.contains("a"));
    }

    #[test]
    fn index_survives_reopen() {
        let dir = tempdir().expect("tempdir");
        {
            let mut cache = ArtworkCache::open(dir.path(), 10);
            cache.put("persisted", &placeholder(3));
        }
        let cache = ArtworkCache::open(dir.path(), 10);
        assert!(cache.contains("persisted"));
    }

    #[test]
    fn corrupt_index_starts_empty() {
        let dir = tempdir().expect("tempdir");
        fs::write(dir.path().join(INDEX_FILE), b"\xff\xff\xff\xff\xff").expect("write junk");
        let cache = ArtworkCache::open(dir.path(), 10);
        assert!(cache.is_empty());
    }

    #[test]
    fn clear_removes_blobs() {
        let dir = tempdir().expect("tempdir");
        let mut cache = ArtworkCache::open(dir.path(), 10);
        cache.put("one", &placeholder(2));
        cache.put("two", &placeholder(2));

        cache.clear();
        assert!(cache.is_empty());
        assert!(!dir.path().join("one.bin").exists());
        assert!(ArtworkCache::open(dir.path(), 10).is_empty());
    }

    #[test]
    fn placeholder_is_square_and_opaque() {
        let art = placeholder(48);
        assert_eq!((art.width, art.height), (48, 48));
        assert_eq!(art.rgba.len(), 48 * 48 * 4);
        assert!(art.rgba.chunks(4).all(|px| px[3] == 255));
    }

    #[test]
    fn fit_scales_down_keeping_aspect() {
        let art = Artwork::decode(&png_bytes(300, 150)).expect("decode");
        let fitted = art.fit(150);
        assert_eq!((fitted.width, fitted.height), (150, 75));
        assert_eq!(placeholder(20).fit(150).width, 20);
    }
}
