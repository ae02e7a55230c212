use anyhow::{Context, Result};
use rodio::Source;
use rodio::cpal::traits::{DeviceTrait, HostTrait};
use rodio::{Decoder, DeviceSinkBuilder, MixerDeviceSink, Player};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// The playback backend the player drives. Volume is linear, 0.0 to 1.0.
pub trait MediaEngine {
    /// Opens `path` and starts playing it from the beginning.
    fn play(&mut self, path: &Path) -> Result<()>;
    /// Opens `path` paused at the beginning, ready for `resume` or `seek_to`.
    fn load(&mut self, path: &Path) -> Result<()>;
    fn pause(&mut self);
    fn resume(&mut self);
    fn stop(&mut self);
    fn is_paused(&self) -> bool;
    fn current_track(&self) -> Option<&Path>;
    fn position(&self) -> Option<Duration>;
    fn duration(&self) -> Option<Duration>;
    fn seek_to(&mut self, position: Duration) -> Result<()>;
    fn volume(&self) -> f32;
    fn set_volume(&mut self, volume: f32);
    /// True once the loaded track has played through to its end.
    fn is_finished(&self) -> bool;
}

/// Plays through the system's default output device via rodio.
pub struct RodioEngine {
    stream: MixerDeviceSink,
    sink: Player,
    current: Option<PathBuf>,
    track_duration: Option<Duration>,
    volume: f32,
}

impl RodioEngine {
    pub fn new() -> Result<Self> {
        let stream = open_output_stream()?;
        let sink = Player::connect_new(stream.mixer());
        Ok(Self {
            stream,
            sink,
            current: None,
            track_duration: None,
            volume: 1.0,
        })
    }

    fn open_track(&mut self, path: &Path, paused: bool) -> Result<()> {
        self.sink.stop();
        self.sink = Player::connect_new(self.stream.mixer());
        self.current = None;
        self.track_duration = None;

        let file =
            File::open(path).with_context(|| format!("failed to open track {}", path.display()))?;
        let source = Decoder::try_from(file)
            .with_context(|| format!("failed to decode {}", path.display()))?;
        self.track_duration = source.total_duration();
        if paused {
            self.sink.pause();
        }
        self.sink.append(source);
        self.sink.set_volume(self.volume);
        self.current = Some(path.to_path_buf());
        tracing::debug!(track = %path.display(), paused, "track opened");
        Ok(())
    }
}

fn open_output_stream() -> Result<MixerDeviceSink> {
    let default = DeviceSinkBuilder::from_default_device()
        .context("failed to open default system output stream")
        .and_then(|builder| {
            builder
                .with_error_callback(|err| tracing::warn!("audio stream error: {err}"))
                .open_sink_or_fallback()
                .context("failed to start default output stream")
        });

    let mut stream = match default {
        Ok(stream) => stream,
        Err(default_err) => {
            tracing::warn!("{default_err:#}, trying other output devices");
            open_any_output_device().with_context(|| {
                format!("unable to start any audio output stream after default failed: {default_err:#}")
            })?
        }
    };
    stream.log_on_drop(false);
    Ok(stream)
}

/// Tries every output device, sound servers first.
fn open_any_output_device() -> Option<MixerDeviceSink> {
    let host = rodio::cpal::default_host();
    let mut devices: Vec<_> = host
        .output_devices()
        .ok()
        .into_iter()
        .flatten()
        .filter_map(|device| device.name().ok().map(|name| (name, device)))
        .collect();
    devices.sort_by_cached_key(|(name, _)| {
        let lower = name.to_ascii_lowercase();
        let rank = if lower.contains("pulse") {
            0_u8
        } else if lower.contains("pipewire") {
            1_u8
        } else if lower.contains("default") {
            2_u8
        } else {
            3_u8
        };
        (rank, lower)
    });

    devices.into_iter().find_map(|(name, device)| {
        let opened = DeviceSinkBuilder::from_device(device)
            .context("failed to open fallback output device")
            .and_then(|builder| {
                builder
                    .with_error_callback(|_| {})
                    .open_sink_or_fallback()
                    .context("failed to start fallback output stream")
            });
        match opened {
            Ok(stream) => {
                tracing::info!(device = %name, "using fallback audio output");
                Some(stream)
            }
            Err(err) => {
                tracing::debug!(device = %name, "{err:#}");
                None
            }
        }
    })
}

impl MediaEngine for RodioEngine {
    fn play(&mut self, path: &Path) -> Result<()> {
        self.open_track(path, false)
    }

    fn load(&mut self, path: &Path) -> Result<()> {
        self.open_track(path, true)
    }

    fn pause(&mut self) {
        self.sink.pause();
    }

    fn resume(&mut self) {
        self.sink.play();
    }

    fn stop(&mut self) {
        self.sink.stop();
        self.current = None;
        self.track_duration = None;
    }

    fn is_paused(&self) -> bool {
        self.sink.is_paused()
    }

    fn current_track(&self) -> Option<&Path> {
        self.current.as_deref()
    }

    fn position(&self) -> Option<Duration> {
        self.current.as_ref()?;
        Some(self.sink.get_pos())
    }

    fn duration(&self) -> Option<Duration> {
        self.track_duration
    }

    fn seek_to(&mut self, position: Duration) -> Result<()> {
        if self.current.is_none() {
            anyhow::bail!("no active track");
        }
        self.sink
            .try_seek(position)
            .map_err(|err| anyhow::anyhow!("failed to seek current track: {err:?}"))
    }

    fn volume(&self) -> f32 {
        self.volume
    }

    fn set_volume(&mut self, volume: f32) {
        self.volume = volume.clamp(0.0, 1.0);
        self.sink.set_volume(self.volume);
    }

    fn is_finished(&self) -> bool {
        self.current.is_some() && !self.sink.is_paused() && self.sink.empty()
    }
}

/// Clock-driven stand-in for machines without an audio device. Position
/// advances in real time; a track ends when its decoded duration elapses.
pub struct NullAudioEngine {
    paused: bool,
    current: Option<PathBuf>,
    volume: f32,
    started_at: Option<Instant>,
    position_offset: Duration,
    track_duration: Option<Duration>,
}

impl NullAudioEngine {
    pub fn new() -> Self {
        Self {
            paused: false,
            current: None,
            volume: 1.0,
            started_at: None,
            position_offset: Duration::ZERO,
            track_duration: None,
        }
    }

    fn estimate_duration(path: &Path) -> Option<Duration> {
        let file = File::open(path).ok()?;
        let source = Decoder::try_from(file).ok()?;
        source
            .total_duration()
            .filter(|duration| !duration.is_zero())
    }

    fn current_position(&self) -> Duration {
        let mut position = self.position_offset;
        if !self.paused
            && self.current.is_some()
            && let Some(started_at) = self.started_at
        {
            position = position.saturating_add(started_at.elapsed());
        }
        if let Some(duration) = self.track_duration {
            return position.min(duration);
        }
        position
    }

    fn open_track(&mut self, path: &Path, paused: bool) {
        self.paused = paused;
        self.current = Some(path.to_path_buf());
        self.started_at = (!paused).then(Instant::now);
        self.position_offset = Duration::ZERO;
        self.track_duration = Self::estimate_duration(path);
    }
}

impl Default for NullAudioEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaEngine for NullAudioEngine {
    fn play(&mut self, path: &Path) -> Result<()> {
        self.open_track(path, false);
        Ok(())
    }

    fn load(&mut self, path: &Path) -> Result<()> {
        self.open_track(path, true);
        Ok(())
    }

    fn pause(&mut self) {
        self.position_offset = self.current_position();
        self.started_at = None;
        self.paused = true;
    }

    fn resume(&mut self) {
        if self.current.is_some() && self.paused {
            self.started_at = Some(Instant::now());
        }
        self.paused = false;
    }

    fn stop(&mut self) {
        self.current = None;
        self.paused = false;
        self.started_at = None;
        self.position_offset = Duration::ZERO;
        self.track_duration = None;
    }

    fn is_paused(&self) -> bool {
        self.paused
    }

    fn current_track(&self) -> Option<&Path> {
        self.current.as_deref()
    }

    fn position(&self) -> Option<Duration> {
        self.current.as_ref()?;
        Some(self.current_position())
    }

    fn duration(&self) -> Option<Duration> {
        self.track_duration
    }

    fn seek_to(&mut self, position: Duration) -> Result<()> {
        if self.current.is_none() {
            anyhow::bail!("no active track");
        }

        self.position_offset = self
            .track_duration
            .map_or(position, |duration| position.min(duration));
        self.started_at = if self.paused {
            None
        } else {
            Some(Instant::now())
        };
        Ok(())
    }

    fn volume(&self) -> f32 {
        self.volume
    }

    fn set_volume(&mut self, volume: f32) {
        self.volume = volume.clamp(0.0, 1.0);
    }

    fn is_finished(&self) -> bool {
        let Some(duration) = self.track_duration else {
            return false;
        };
        self.current.is_some() && !self.paused && self.current_position() >= duration
    }
}
