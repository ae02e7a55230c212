use lofty::file::TaggedFile;
use lofty::picture::{Picture, PictureType};
use lofty::prelude::{Accessor, AudioFile, TaggedFileExt};
use lofty::probe::Probe;
use lofty::tag::{Tag, TagType};
use std::ffi::OsStr;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::{MediaSourceStream, MediaSourceStreamOptions};
use symphonia::core::meta::{MetadataOptions, StandardTagKey};
use symphonia::core::probe::{Hint, ProbeResult};
use symphonia::default::get_probe;
use walkdir::WalkDir;

pub const AUDIO_EXTENSIONS: &[&str] = &[
    "mp3", "wav", "flac", "ogg", "opus", "m4a", "mp4", "aac", "wma",
];

/// Metadata pulled from a file's embedded tags. Every field is optional;
/// display defaults are applied by the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackTags {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub duration: Option<Duration>,
    pub artwork: Option<Vec<u8>>,
}

/// Reads tags for one container family.
pub trait TagReader {
    fn family(&self) -> &'static str;
    fn read_tags(&self, path: &Path) -> TrackTags;
}

/// MP3 and WAV files, tagged with ID3v2.
pub struct Id3Reader;

/// MP4 family containers (`ilst` atoms).
pub struct Mp4Reader;

/// FLAC, Ogg Vorbis and Opus files (Vorbis comments).
pub struct VorbisReader;

/// Anything else: whatever tag lofty or symphonia can find, title from
/// the file name otherwise.
pub struct FallbackReader;

impl TagReader for Id3Reader {
    fn family(&self) -> &'static str {
        "id3"
    }

    fn read_tags(&self, path: &Path) -> TrackTags {
        read_preferring(path, &[TagType::Id3v2, TagType::RiffInfo, TagType::Id3v1])
    }
}

impl TagReader for Mp4Reader {
    fn family(&self) -> &'static str {
        "mp4"
    }

    fn read_tags(&self, path: &Path) -> TrackTags {
        read_preferring(path, &[TagType::Mp4Ilst])
    }
}

impl TagReader for VorbisReader {
    fn family(&self) -> &'static str {
        "vorbis"
    }

    fn read_tags(&self, path: &Path) -> TrackTags {
        read_preferring(path, &[TagType::VorbisComments])
    }
}

impl TagReader for FallbackReader {
    fn family(&self) -> &'static str {
        "fallback"
    }

    fn read_tags(&self, path: &Path) -> TrackTags {
        let mut tags = read_preferring(path, &[]);
        if tags.title.is_none() {
            tags.title = Some(crate::model::title_from_path(path));
        }
        tags
    }
}

/// Picks the reader for a path by its extension.
pub fn reader_for(path: &Path) -> &'static dyn TagReader {
    let ext = path
        .extension()
        .and_then(OsStr::to_str)
        .unwrap_or_default()
        .to_ascii_lowercase();
    match ext.as_str() {
        "mp3" | "wav" => &Id3Reader,
        "m4a" | "mp4" | "aac" => &Mp4Reader,
        "flac" | "ogg" | "opus" => &VorbisReader,
        _ => &FallbackReader,
    }
}

pub fn read_tags(path: &Path) -> TrackTags {
    let stripped = crate::config::strip_windows_verbatim_prefix(path);
    reader_for(&stripped).read_tags(&stripped)
}

fn read_preferring(path: &Path, preferred: &[TagType]) -> TrackTags {
    let Some(tagged) = open_tagged(path) else {
        return symphonia_tags(path);
    };

    let tag = preferred
        .iter()
        .find_map(|tag_type| tagged.tag(*tag_type))
        .or_else(|| tagged.primary_tag())
        .or_else(|| tagged.first_tag());

    let duration = Some(tagged.properties().duration()).filter(|duration| !duration.is_zero());
    let mut tags = TrackTags {
        duration,
        ..TrackTags::default()
    };

    if let Some(tag) = tag {
        tags.title = tag.title().and_then(|value| clean_value(&value));
        tags.artist = tag.artist().and_then(|value| clean_value(&value));
        tags.album = tag.album().and_then(|value| clean_value(&value));
    }
    tags.artwork = cover_from_tags(&tagged, tag);

    if tags.title.is_none() && tags.artist.is_none() && tags.album.is_none() {
        let probed = symphonia_tags(path);
        tags.title = probed.title;
        tags.artist = probed.artist;
        tags.album = probed.album;
        tags.duration = tags.duration.or(probed.duration);
    }
    tags
}

fn open_tagged(path: &Path) -> Option<TaggedFile> {
    let probe = match Probe::open(path) {
        Ok(probe) => probe,
        Err(err) => {
            tracing::debug!(path = %path.display(), %err, "cannot open for tag reading");
            return None;
        }
    };
    match probe.read() {
        Ok(tagged) => Some(tagged),
        Err(err) => {
            tracing::debug!(path = %path.display(), %err, "no readable tags");
            None
        }
    }
}

fn cover_from_tags(tagged: &TaggedFile, preferred: Option<&Tag>) -> Option<Vec<u8>> {
    preferred
        .and_then(|tag| pick_cover(tag.pictures()))
        .or_else(|| tagged.tags().iter().find_map(|tag| pick_cover(tag.pictures())))
}

/// Front cover if there is one, otherwise the first picture.
fn pick_cover(pictures: &[Picture]) -> Option<Vec<u8>> {
    pictures
        .iter()
        .find(|picture| picture.pic_type() == PictureType::CoverFront)
        .or_else(|| pictures.first())
        .map(|picture| picture.data().to_vec())
        .filter(|data| !data.is_empty())
}

/// Raw bytes of the embedded cover image, if the file carries one.
pub fn embedded_cover_art(path: &Path) -> Option<Vec<u8>> {
    let stripped = crate::config::strip_windows_verbatim_prefix(path);
    open_tagged(&stripped)
        .and_then(|tagged| cover_from_tags(&tagged, tagged.primary_tag()))
        .or_else(|| symphonia_embedded_cover_art(&stripped))
}

fn probe_with_symphonia(path: &Path) -> Option<ProbeResult> {
    let file = File::open(path).ok()?;
    let source = MediaSourceStream::new(Box::new(file), MediaSourceStreamOptions::default());

    let mut hint = Hint::new();
    if let Some(extension) = path.extension().and_then(OsStr::to_str) {
        hint.with_extension(extension);
    }

    get_probe()
        .format(
            &hint,
            source,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .ok()
}

fn symphonia_embedded_cover_art(path: &Path) -> Option<Vec<u8>> {
    let mut probed = probe_with_symphonia(path)?;
    let metadata = probed.format.metadata();
    let revision = metadata.current()?;
    let visual = revision
        .visuals()
        .iter()
        .find(|entry| !entry.data.is_empty())?;
    Some(visual.data.as_ref().to_vec())
}

fn symphonia_tags(path: &Path) -> TrackTags {
    let Some(mut probed) = probe_with_symphonia(path) else {
        return TrackTags::default();
    };

    let duration = probed
        .format
        .default_track()
        .and_then(|track| codec_duration(&track.codec_params));

    let metadata = probed.format.metadata();
    let Some(revision) = metadata.current() else {
        return TrackTags {
            duration,
            ..TrackTags::default()
        };
    };
    let tags = revision.tags();

    TrackTags {
        title: tag_value(tags, StandardTagKey::TrackTitle, &["title"]),
        artist: tag_value(
            tags,
            StandardTagKey::Artist,
            &["artist", "albumartist", "album_artist"],
        ),
        album: tag_value(tags, StandardTagKey::Album, &["album"]),
        duration,
        artwork: None,
    }
}

fn codec_duration(codec_params: &symphonia::core::codecs::CodecParameters) -> Option<Duration> {
    if let (Some(time_base), Some(frame_count)) = (codec_params.time_base, codec_params.n_frames) {
        let time = time_base.calc_time(frame_count);
        return Some(Duration::from_secs(time.seconds) + Duration::from_secs_f64(time.frac));
    }

    codec_params
        .n_frames
        .zip(codec_params.sample_rate)
        .filter(|(_, sample_rate)| *sample_rate > 0)
        .map(|(frames, sample_rate)| Duration::from_secs_f64(frames as f64 / sample_rate as f64))
}

fn tag_value(
    tags: &[symphonia::core::meta::Tag],
    standard_key: StandardTagKey,
    fallback_keys: &[&str],
) -> Option<String> {
    let from_standard = tags
        .iter()
        .find(|tag| tag.std_key == Some(standard_key))
        .map(|tag| tag.value.to_string());

    let from_fallback = || {
        tags.iter()
            .find(|tag| {
                fallback_keys
                    .iter()
                    .any(|key| tag.key.eq_ignore_ascii_case(key))
            })
            .map(|tag| tag.value.to_string())
    };

    from_standard
        .or_else(from_fallback)
        .and_then(|value| clean_value(&value))
}

fn clean_value(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Every audio file below `root`, sorted by path.
pub fn scan_folder(root: &Path) -> Vec<PathBuf> {
    let mut tracks: Vec<PathBuf> = WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file() && is_audio(entry.path()))
        .map(|entry| entry.into_path())
        .collect();
    tracks.sort();
    tracks
}

pub fn is_audio(path: &Path) -> bool {
    let ext = path.extension().and_then(OsStr::to_str).unwrap_or_default();
    AUDIO_EXTENSIONS
        .iter()
        .any(|supported| ext.eq_ignore_ascii_case(supported))
}
