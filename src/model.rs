use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::path::PathBuf;
use std::time::Duration;

/// What happens when the current track reaches its end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RepeatMode {
    #[default]
    Off,
    One,
    All,
}

impl RepeatMode {
    pub fn next(self) -> Self {
        match self {
            Self::Off => Self::One,
            Self::One => Self::All,
            Self::All => Self::Off,
        }
    }

    pub fn from_index(value: i64) -> Option<Self> {
        match value {
            0 => Some(Self::Off),
            1 => Some(Self::One),
            2 => Some(Self::All),
            _ => None,
        }
    }

    pub fn index(self) -> u8 {
        match self {
            Self::Off => 0,
            Self::One => 1,
            Self::All => 2,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::One => "one",
            Self::All => "all",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "off" | "0" | "none" => Some(Self::Off),
            "one" | "1" | "track" => Some(Self::One),
            "all" | "2" | "playlist" => Some(Self::All),
            _ => None,
        }
    }
}

impl Serialize for RepeatMode {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u8(self.index())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawRepeat {
    Int(i64),
    Flag(bool),
}

impl<'de> Deserialize<'de> for RepeatMode {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        // Older snapshots stored repeat as a plain on/off flag.
        match RawRepeat::deserialize(deserializer)? {
            RawRepeat::Flag(true) => Ok(Self::All),
            RawRepeat::Flag(false) => Ok(Self::Off),
            RawRepeat::Int(value) => Ok(Self::from_index(value).unwrap_or_else(|| {
                tracing::warn!(value, "unknown repeat mode, using off");
                Self::Off
            })),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowGeometry {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowGeometry {
    fn default() -> Self {
        Self {
            x: 100,
            y: 100,
            width: 900,
            height: 600,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Stopped,
    Playing,
    Paused,
}

impl PlaybackState {
    pub fn label(self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Playing => "playing",
            Self::Paused => "paused",
        }
    }
}

/// Display metadata for one track, with defaults filled in.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackInfo {
    pub path: PathBuf,
    pub title: String,
    pub artist: String,
    pub album: String,
    pub duration: Duration,
    pub artwork: Option<crate::artwork::Artwork>,
}

pub const UNKNOWN_ARTIST: &str = "Unknown artist";
pub const UNKNOWN_ALBUM: &str = "Unknown album";

pub fn title_from_path(path: &std::path::Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string_lossy().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeat_cycles_off_one_all() {
        assert_eq!(RepeatMode::Off.next(), RepeatMode::One);
        assert_eq!(RepeatMode::One.next(), RepeatMode::All);
        assert_eq!(RepeatMode::All.next(), RepeatMode::Off);
    }

    #[test]
    fn repeat_serializes_as_integer() {
        let json = serde_json::to_string(&RepeatMode::All).expect("serialize");
        assert_eq!(json, "2");
        let back: RepeatMode = serde_json::from_str("1").expect("deserialize");
        assert_eq!(back, RepeatMode::One);
    }

    #[test]
    fn legacy_boolean_repeat_is_accepted() {
        let on: RepeatMode = serde_json::from_str("true").expect("deserialize");
        let off: RepeatMode = serde_json::from_str("false").expect("deserialize");
        assert_eq!(on, RepeatMode::All);
        assert_eq!(off, RepeatMode::Off);
    }

    #[test]
    fn out_of_range_repeat_falls_back_to_off() {
        let mode: RepeatMode = serde_json::from_str("7").expect("deserialize");
        assert_eq!(mode, RepeatMode::Off);
    }

    #[test]
    fn title_is_file_stem() {
        assert_eq!(
            title_from_path(std::path::Path::new("/music/Artist - Song.flac")),
            "Artist - Song"
        );
    }
}
