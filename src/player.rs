use crate::artwork::{self, Artwork, ArtworkCache};
use crate::audio::MediaEngine;
use crate::config::{Paths, Settings};
use crate::history::PlayHistory;
use crate::library;
use crate::model::{
    self, PlaybackState, RepeatMode, TrackInfo, UNKNOWN_ALBUM, UNKNOWN_ARTIST, WindowGeometry,
};
use crate::playlist::Playlist;
use crate::playlist_io;
use crate::shuffle::ShuffleBag;
use crate::state::{self, DEFAULT_VOLUME, SessionState};
use crate::stats::PlayStatistics;
use anyhow::Result;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Notifications for whoever presents the player, drained with
/// [`Player::drain_events`].
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    TrackChanged(PathBuf),
    /// Milliseconds into the current track.
    PositionChanged(u64),
    /// Length of the current track in milliseconds.
    DurationChanged(u64),
    StateChanged(PlaybackState),
    RepeatModeChanged(RepeatMode),
    ShuffleChanged(bool),
    VolumeChanged(u8),
    Error(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    Title,
    Artist,
    Album,
}

impl SortKey {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "title" | "name" => Some(Self::Title),
            "artist" => Some(Self::Artist),
            "album" => Some(Self::Album),
            _ => None,
        }
    }
}

/// The persistent stores the player writes to as tracks are played.
#[derive(Debug)]
pub struct Stores {
    pub history: PlayHistory,
    pub statistics: PlayStatistics,
    pub artwork: ArtworkCache,
}

impl Stores {
    pub fn open(paths: &Paths, settings: &Settings) -> Self {
        Self {
            history: PlayHistory::open(paths.history()),
            statistics: PlayStatistics::open(paths.statistics()),
            artwork: ArtworkCache::open(paths.cache_dir(), settings.artwork_cache_size),
        }
    }
}

/// Coordinates the playlist, shuffle bag, repeat mode and media engine.
///
/// All mutation happens through `&mut self` on one thread; the engine is
/// polled through [`Player::tick`].
pub struct Player {
    playlist: Playlist,
    shuffle_bag: ShuffleBag,
    repeat: RepeatMode,
    shuffle: bool,
    volume: u8,
    engine: Box<dyn MediaEngine>,
    stores: Stores,
    artwork_size: u32,
    recent_playlists: Vec<PathBuf>,
    fresh_load: bool,
    last_state: PlaybackState,
    last_position: Option<u64>,
    last_duration: Option<u64>,
    events: Vec<PlayerEvent>,
}

impl Player {
    pub fn new(mut engine: Box<dyn MediaEngine>, stores: Stores) -> Self {
        engine.set_volume(f32::from(DEFAULT_VOLUME) / 100.0);
        Self {
            playlist: Playlist::new(),
            shuffle_bag: ShuffleBag::new(),
            repeat: RepeatMode::Off,
            shuffle: false,
            volume: DEFAULT_VOLUME,
            engine,
            stores,
            artwork_size: Settings::default().artwork_size,
            recent_playlists: Vec::new(),
            fresh_load: false,
            last_state: PlaybackState::Stopped,
            last_position: None,
            last_duration: None,
            events: Vec::new(),
        }
    }

    pub fn with_shuffle_bag(mut self, bag: ShuffleBag) -> Self {
        self.shuffle_bag = bag;
        self
    }

    pub fn set_artwork_size(&mut self, size: u32) {
        self.artwork_size = size.max(1);
    }

    pub fn playlist(&self) -> &Playlist {
        &self.playlist
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    pub fn stores_mut(&mut self) -> &mut Stores {
        &mut self.stores
    }

    pub fn engine(&self) -> &dyn MediaEngine {
        self.engine.as_ref()
    }

    pub fn repeat(&self) -> RepeatMode {
        self.repeat
    }

    pub fn shuffle(&self) -> bool {
        self.shuffle
    }

    pub fn volume(&self) -> u8 {
        self.volume
    }

    pub fn recent_playlists(&self) -> &[PathBuf] {
        &self.recent_playlists
    }

    /// Adds tracks to the end of the playlist. The first track becomes
    /// current when nothing was selected yet.
    pub fn enqueue<I, P>(&mut self, paths: I) -> usize
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let added = self.playlist.add_many(paths);
        if added > 0 && self.playlist.current_index().is_none() {
            self.playlist.set_current(0);
        }
        added
    }

    pub fn remove_track(&mut self, index: usize) -> bool {
        self.playlist.remove(index)
    }

    pub fn move_track(&mut self, from: usize, to: usize) -> bool {
        self.playlist.move_track(from, to)
    }

    pub fn clear_playlist(&mut self) {
        self.stop();
        self.playlist.clear();
        self.shuffle_bag.reset();
    }

    pub fn sort_playlist(&mut self, key: SortKey) {
        self.playlist.sort_by_key(|path| match key {
            SortKey::Title => model::title_from_path(path).to_lowercase(),
            SortKey::Artist => library::read_tags(path)
                .artist
                .unwrap_or_default()
                .to_lowercase(),
            SortKey::Album => library::read_tags(path)
                .album
                .unwrap_or_default()
                .to_lowercase(),
        });
    }

    /// Opens `path` in the engine without starting playback.
    pub fn load_file(&mut self, path: &Path) -> bool {
        if path.as_os_str().is_empty() || !path.exists() {
            self.emit(PlayerEvent::Error(String::from("File not found")));
            return false;
        }

        if let Err(err) = self.engine.load(path) {
            tracing::warn!("failed to load {}: {err:#}", path.display());
            self.emit(PlayerEvent::Error(format!("{err:#}")));
            self.fresh_load = false;
            self.sync();
            return false;
        }

        self.fresh_load = true;
        self.emit(PlayerEvent::TrackChanged(path.to_path_buf()));
        self.sync();
        true
    }

    /// Starts or resumes playback. A track that was just loaded counts as a
    /// play; resuming after a pause does not.
    pub fn play(&mut self) -> bool {
        if self.engine.current_track().is_none() {
            if self.playlist.current().is_none() && self.playlist.advance().is_none() {
                return false;
            }
            let Some(path) = self.playlist.current().map(Path::to_path_buf) else {
                return false;
            };
            if !self.load_file(&path) {
                return false;
            }
        }

        self.engine.resume();
        if self.fresh_load {
            self.fresh_load = false;
            if let Some(path) = self.engine.current_track().map(Path::to_path_buf) {
                if self.shuffle
                    && let Some(index) = self.playlist.position_of(&path)
                {
                    self.shuffle_bag.mark(index);
                }
                self.record_play(&path);
            }
        }
        self.sync();
        true
    }

    pub fn pause(&mut self) {
        if self.state() == PlaybackState::Playing {
            self.engine.pause();
            self.sync();
        }
    }

    pub fn toggle_pause(&mut self) -> bool {
        if self.state() == PlaybackState::Playing {
            self.pause();
            true
        } else {
            self.play()
        }
    }

    pub fn stop(&mut self) {
        self.engine.stop();
        self.fresh_load = false;
        self.sync();
    }

    pub fn seek(&mut self, position_ms: u64) -> bool {
        match self.engine.seek_to(Duration::from_millis(position_ms)) {
            Ok(()) => {
                self.sync();
                true
            }
            Err(err) => {
                self.emit(PlayerEvent::Error(format!("{err:#}")));
                false
            }
        }
    }

    pub fn position_ms(&self) -> u64 {
        self.engine.position().map_or(0, duration_ms)
    }

    pub fn duration_ms(&self) -> u64 {
        self.engine.duration().map_or(0, duration_ms)
    }

    pub fn state(&self) -> PlaybackState {
        if self.engine.current_track().is_none() {
            PlaybackState::Stopped
        } else if self.engine.is_paused() {
            PlaybackState::Paused
        } else {
            PlaybackState::Playing
        }
    }

    /// Advances to the next track (a random one in shuffle mode) and plays
    /// it.
    pub fn next(&mut self) -> bool {
        let next = if self.shuffle {
            self.shuffle_bag.next(&mut self.playlist)
        } else {
            self.playlist.advance().map(Path::to_path_buf)
        };
        match next {
            Some(path) => self.start(&path),
            None => false,
        }
    }

    /// Steps back one track. Shuffle does not affect this direction.
    pub fn previous(&mut self) -> bool {
        match self.playlist.retreat().map(Path::to_path_buf) {
            Some(path) => self.start(&path),
            None => false,
        }
    }

    pub fn play_index(&mut self, index: usize) -> bool {
        if !self.playlist.set_current(index) {
            return false;
        }
        match self.playlist.current().map(Path::to_path_buf) {
            Some(path) => self.start(&path),
            None => false,
        }
    }

    fn start(&mut self, path: &Path) -> bool {
        self.load_file(path) && self.play()
    }

    /// Sets the volume in percent, clamped to 0..=100.
    pub fn set_volume(&mut self, volume: i64) {
        let volume = volume.clamp(0, 100) as u8;
        self.engine.set_volume(f32::from(volume) / 100.0);
        if volume != self.volume {
            self.volume = volume;
            self.emit(PlayerEvent::VolumeChanged(volume));
        }
    }

    pub fn set_repeat(&mut self, mode: RepeatMode) {
        if mode != self.repeat {
            self.repeat = mode;
            self.emit(PlayerEvent::RepeatModeChanged(mode));
        }
    }

    pub fn cycle_repeat(&mut self) -> RepeatMode {
        self.set_repeat(self.repeat.next());
        self.repeat
    }

    pub fn set_shuffle(&mut self, enabled: bool) {
        self.shuffle_bag.reset();
        if enabled != self.shuffle {
            self.shuffle = enabled;
            self.emit(PlayerEvent::ShuffleChanged(enabled));
        }
    }

    /// Polls the engine: handles the end of the current track and reports
    /// position, duration and state changes.
    pub fn tick(&mut self) {
        if self.engine.current_track().is_some() && self.engine.is_finished() {
            self.handle_track_end();
        }
        self.sync();
    }

    fn handle_track_end(&mut self) {
        match self.repeat {
            RepeatMode::One => {
                let Some(path) = self.engine.current_track().map(Path::to_path_buf) else {
                    return;
                };
                if let Err(err) = self.engine.play(&path) {
                    tracing::warn!("failed to replay {}: {err:#}", path.display());
                    self.emit(PlayerEvent::Error(format!("{err:#}")));
                }
            }
            RepeatMode::All => {
                if !self.next() {
                    self.stop();
                }
            }
            RepeatMode::Off => {
                if self.sequence_exhausted() || !self.next() {
                    self.stop();
                }
            }
        }
    }

    fn sequence_exhausted(&self) -> bool {
        let len = self.playlist.len();
        if len == 0 {
            return true;
        }
        if self.shuffle {
            self.shuffle_bag.is_cycle_complete(len)
        } else {
            self.playlist.current_index() == Some(len - 1)
        }
    }

    fn record_play(&mut self, path: &Path) {
        let tags = library::read_tags(path);
        self.stores
            .history
            .record(path, tags.title.as_deref(), tags.artist.as_deref());
        self.stores.statistics.increment(path);
        tracing::debug!(track = %path.display(), "play recorded");
    }

    /// Display metadata for `path` with defaults for anything missing.
    pub fn track_info(&mut self, path: &Path) -> TrackInfo {
        let mut tags = library::read_tags(path);
        let embedded = tags.artwork.take();
        let artwork = self
            .stores
            .artwork
            .get_with(path, |_| embedded)
            .map(|art| art.fit(self.artwork_size));

        TrackInfo {
            path: path.to_path_buf(),
            title: tags.title.unwrap_or_else(|| model::title_from_path(path)),
            artist: tags.artist.unwrap_or_else(|| UNKNOWN_ARTIST.to_string()),
            album: tags.album.unwrap_or_else(|| UNKNOWN_ALBUM.to_string()),
            duration: tags.duration.unwrap_or(Duration::ZERO),
            artwork,
        }
    }

    /// Cover art fitted to the configured size, or a generated placeholder
    /// when the track has none.
    pub fn cover(&mut self, path: &Path) -> Artwork {
        match self.stores.artwork.get(path) {
            Some(art) => art.fit(self.artwork_size),
            None => artwork::placeholder(self.artwork_size),
        }
    }

    pub fn current_info(&mut self) -> Option<TrackInfo> {
        let path = self
            .engine
            .current_track()
            .or_else(|| self.playlist.current())
            .map(Path::to_path_buf)?;
        Some(self.track_info(&path))
    }

    pub fn snapshot(&self, window_geometry: WindowGeometry) -> SessionState {
        let position = if self.engine.current_track().is_some() {
            self.position_ms()
        } else {
            0
        };
        SessionState {
            playlist: self.playlist.tracks().to_vec(),
            current_index: self.playlist.current_index(),
            volume: self.volume,
            position,
            repeat: self.repeat,
            shuffle: self.shuffle,
            window_geometry,
            recent_playlists: self.recent_playlists.clone(),
        }
    }

    /// Applies a saved session: playlist, cursor, volume and modes, then
    /// reloads the current track, seeking and starting it as `settings`
    /// ask.
    pub fn restore(&mut self, state: &SessionState, settings: &Settings) {
        self.stop();
        self.playlist.clear();
        let added = self.playlist.add_many(&state.playlist);
        if added < state.playlist.len() {
            tracing::warn!(skipped = state.playlist.len() - added, "tracks not restored");
        }
        if let Some(index) = state.current_index {
            self.playlist.set_current(index);
        }
        self.set_volume(i64::from(state.volume));
        self.set_repeat(state.repeat);
        self.set_shuffle(state.shuffle);
        self.recent_playlists = state.recent_playlists.clone();

        let Some(current) = self.playlist.current().map(Path::to_path_buf) else {
            return;
        };
        if !self.load_file(&current) {
            return;
        }
        if settings.resume && state.position > 0 {
            self.seek(state.position);
        }
        if settings.autoplay {
            self.play();
        }
    }

    pub fn remember_playlist(&mut self, path: &Path) {
        state::remember(&mut self.recent_playlists, path);
    }

    /// Loads an M3U or JSON playlist, either appending to or replacing the
    /// current one. Returns how many tracks were added.
    pub fn import_playlist(&mut self, path: &Path, replace: bool) -> Result<usize> {
        let tracks = playlist_io::load(path)?;
        if replace {
            self.clear_playlist();
        }
        let added = self.enqueue(&tracks);
        self.remember_playlist(path);
        Ok(added)
    }

    pub fn export_playlist(&mut self, path: &Path) -> Result<usize> {
        let written = playlist_io::save(path, self.playlist.tracks())?;
        self.remember_playlist(path);
        Ok(written)
    }

    pub fn drain_events(&mut self) -> Vec<PlayerEvent> {
        std::mem::take(&mut self.events)
    }

    fn emit(&mut self, event: PlayerEvent) {
        self.events.push(event);
    }

    fn sync(&mut self) {
        let state = self.state();
        if state != self.last_state {
            self.last_state = state;
            self.emit(PlayerEvent::StateChanged(state));
        }

        let duration = self.engine.duration().map(duration_ms);
        if duration != self.last_duration {
            self.last_duration = duration;
            if let Some(duration) = duration {
                self.emit(PlayerEvent::DurationChanged(duration));
            }
        }

        let position = self.engine.position().map(duration_ms);
        if position != self.last_position {
            self.last_position = position;
            self.emit(PlayerEvent::PositionChanged(position.unwrap_or(0)));
        }
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::NullAudioEngine;
    use std::fs;
    use tempfile::{TempDir, tempdir};

    fn player_in(dir: &Path) -> Player {
        let paths = Paths::new(dir.join("config"));
        let stores = Stores::open(&paths, &Settings::default());
        Player::new(Box::new(NullAudioEngine::new()), stores)
            .with_shuffle_bag(ShuffleBag::with_seed(5))
    }

    fn tracks(dir: &TempDir, names: &[&str]) -> Vec<PathBuf> {
        names
            .iter()
            .map(|name| {
                let path = dir.path().join(name);
                fs::write(&path, b"not really audio").expect("write fixture");
                path
            })
            .collect()
    }

    #[test]
    fn load_missing_file_reports_not_found() {
        let dir = tempdir().expect("tempdir");
        let mut player = player_in(dir.path());

        assert!(!player.load_file(Path::new("")));
        assert!(!player.load_file(&dir.path().join("missing.mp3")));
        assert_eq!(
            player.drain_events(),
            vec![
                PlayerEvent::Error(String::from("File not found")),
                PlayerEvent::Error(String::from("File not found")),
            ]
        );
    }

    #[test]
    fn volume_is_clamped_and_forwarded() {
        let dir = tempdir().expect("tempdir");
        let mut player = player_in(dir.path());
        assert_eq!(player.volume(), 50);
        assert!((player.engine().volume() - 0.5).abs() < f32::EPSILON);

        player.set_volume(150);
        assert_eq!(player.volume(), 100);
        player.set_volume(-3);
        assert_eq!(player.volume(), 0);
        assert_eq!(player.engine().volume(), 0.0);
    }

    #[test]
    fn cycle_repeat_emits_each_mode() {
        let dir = tempdir().expect("tempdir");
        let mut player = player_in(dir.path());
        assert_eq!(player.cycle_repeat(), RepeatMode::One);
        assert_eq!(player.cycle_repeat(), RepeatMode::All);
        assert_eq!(player.cycle_repeat(), RepeatMode::Off);
        assert_eq!(
            player.drain_events(),
            vec![
                PlayerEvent::RepeatModeChanged(RepeatMode::One),
                PlayerEvent::RepeatModeChanged(RepeatMode::All),
                PlayerEvent::RepeatModeChanged(RepeatMode::Off),
            ]
        );
    }

    #[test]
    fn play_records_once_per_fresh_start() {
        let dir = tempdir().expect("tempdir");
        let files = tracks(&dir, &["a.mp3", "b.mp3"]);
        let mut player = player_in(dir.path());
        player.enqueue(&files);

        assert!(player.play());
        assert_eq!(player.state(), PlaybackState::Playing);
        player.pause();
        assert_eq!(player.state(), PlaybackState::Paused);
        assert!(player.play());

        assert_eq!(player.stores().statistics.play_count(&files[0]), 1);
        assert_eq!(player.stores().history.len(), 1);
    }

    #[test]
    fn track_info_fills_defaults() {
        let dir = tempdir().expect("tempdir");
        let files = tracks(&dir, &["Quiet Song.mp3"]);
        let mut player = player_in(dir.path());

        let info = player.track_info(&files[0]);
        assert_eq!(info.title, "Quiet Song");
        assert_eq!(info.artist, UNKNOWN_ARTIST);
        assert_eq!(info.album, UNKNOWN_ALBUM);
        assert_eq!(info.duration, Duration::ZERO);
        assert!(info.artwork.is_none());

        player.set_artwork_size(32);
        let cover = player.cover(&files[0]);
        assert_eq!((cover.width, cover.height), (32, 32));
    }

    #[test]
    fn sort_by_title_keeps_current_track() {
        let dir = tempdir().expect("tempdir");
        let files = tracks(&dir, &["c.mp3", "A.mp3", "b.mp3"]);
        let mut player = player_in(dir.path());
        player.enqueue(&files);
        player.play_index(2);

        player.sort_playlist(SortKey::Title);
        let order: Vec<_> = player
            .playlist()
            .tracks()
            .iter()
            .map(|path| model::title_from_path(path))
            .collect();
        assert_eq!(order, vec!["A", "b", "c"]);
        assert_eq!(player.playlist().current(), Some(files[2].as_path()));
    }

    #[test]
    fn import_appends_and_remembers() {
        let dir = tempdir().expect("tempdir");
        let files = tracks(&dir, &["a.mp3", "b.mp3"]);
        let list = dir.path().join("mix.m3u");
        playlist_io::save_m3u(&list, &files).expect("save playlist");

        let mut player = player_in(dir.path());
        player.enqueue([&files[0]]);
        assert_eq!(player.import_playlist(&list, false).expect("import"), 1);
        assert_eq!(player.playlist().len(), 2);
        assert_eq!(player.recent_playlists(), &[list.clone()]);

        assert_eq!(player.import_playlist(&list, true).expect("import"), 2);
        assert_eq!(player.playlist().current_index(), Some(0));
    }
}
