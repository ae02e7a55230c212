use crate::audio::{MediaEngine, NullAudioEngine, RodioEngine};
use crate::config::{self, Paths, Settings};
use crate::library;
use crate::model::{RepeatMode, WindowGeometry};
use crate::player::{Player, PlayerEvent, SortKey, Stores};
use crate::state::StateStore;
use anyhow::Result;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

const TICK_INTERVAL: Duration = Duration::from_millis(100);
const DEFAULT_LISTING: usize = 10;

#[derive(Debug, Default)]
pub struct AppOptions {
    pub config_dir: Option<PathBuf>,
    pub null_audio: bool,
    pub paths: Vec<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// A player plus the on-disk session it was restored from.
pub struct Session {
    pub player: Player,
    pub settings: Settings,
    pub store: StateStore,
    pub geometry: WindowGeometry,
}

impl Session {
    pub fn new(player: Player, settings: Settings, store: StateStore) -> Self {
        Self {
            player,
            settings,
            store,
            geometry: WindowGeometry::default(),
        }
    }

    /// Restores the last saved session, if there is one.
    pub fn restore(&mut self) -> bool {
        let Some(state) = self.store.load() else {
            return false;
        };
        self.geometry = state.window_geometry;
        self.player.restore(&state, &self.settings);
        true
    }

    pub fn save(&self) -> bool {
        self.store.save(&self.player.snapshot(self.geometry))
    }
}

pub fn run(options: AppOptions) -> Result<()> {
    let paths = Paths::resolve(options.config_dir.as_deref())?;
    let settings = Settings::load(&paths)?;
    tracing::info!(root = %paths.root().display(), "configuration loaded");

    let engine: Box<dyn MediaEngine> = if options.null_audio {
        Box::new(NullAudioEngine::new())
    } else {
        match RodioEngine::new() {
            Ok(engine) => Box::new(engine),
            Err(err) => {
                tracing::warn!("audio output unavailable, running silent: {err:#}");
                Box::new(NullAudioEngine::new())
            }
        }
    };

    let mut player = Player::new(engine, Stores::open(&paths, &settings));
    player.set_artwork_size(settings.artwork_size);
    let mut session = Session::new(player, settings, StateStore::new(paths.state()));
    session.restore();

    let stdout = io::stdout();
    let mut out = stdout.lock();
    for path in &options.paths {
        add_path(&mut session.player, path, &mut out)?;
    }
    if !options.paths.is_empty() && session.settings.autoplay {
        session.player.play();
    }
    print_events(&mut session.player, &mut out)?;
    writeln!(out, "Type help for commands")?;

    let (tx, rx) = mpsc::channel::<String>();
    thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });

    loop {
        match rx.recv_timeout(TICK_INTERVAL) {
            Ok(line) => {
                if run_command(&mut session, &line, &mut out)? == Flow::Quit {
                    break;
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
        session.player.tick();
        print_events(&mut session.player, &mut out)?;
        out.flush()?;
    }

    if session.settings.autosave {
        session.save();
    }
    session.player.stop();
    Ok(())
}

/// Runs one shell command. Track numbers are 1-based.
pub fn run_command(session: &mut Session, raw: &str, out: &mut impl Write) -> Result<Flow> {
    let input = raw.trim();
    if input.is_empty() {
        return Ok(Flow::Continue);
    }

    let mut command_split = input.splitn(2, char::is_whitespace);
    let command = command_split.next().unwrap_or_default();
    let rest = command_split.next().unwrap_or("").trim();
    let player = &mut session.player;

    match command {
        "help" => writeln!(out, "{HELP}")?,
        "add" => {
            if rest.is_empty() {
                writeln!(out, "Usage: add <file|folder>")?;
            } else {
                add_path(player, Path::new(rest), out)?;
            }
        }
        "remove" => match track_number(rest, player.playlist().len()) {
            Some(index) => {
                player.remove_track(index);
                writeln!(out, "Removed track {}", index + 1)?;
            }
            None => writeln!(out, "Usage: remove <n>")?,
        },
        "clear" => match rest {
            "" => {
                player.clear_playlist();
                writeln!(out, "Playlist cleared")?;
            }
            "history" => {
                player.stores_mut().history.clear();
                writeln!(out, "History cleared")?;
            }
            "stats" => {
                player.stores_mut().statistics.clear();
                writeln!(out, "Statistics cleared")?;
            }
            "cache" => {
                player.stores_mut().artwork.clear();
                writeln!(out, "Artwork cache cleared")?;
            }
            "state" => {
                session.store.clear();
                writeln!(out, "Saved session removed")?;
            }
            _ => writeln!(out, "Usage: clear [history|stats|cache|state]")?,
        },
        "list" => {
            let current = player.playlist().current_index();
            let matches = player.playlist().filter(rest);
            if matches.is_empty() {
                writeln!(out, "No tracks")?;
            }
            for index in matches {
                if let Some(path) = player.playlist().track_at(index) {
                    let marker = if Some(index) == current { '>' } else { ' ' };
                    writeln!(
                        out,
                        "{marker}{:>4}. {}",
                        index + 1,
                        crate::model::title_from_path(path)
                    )?;
                }
            }
        }
        "play" => {
            if rest.is_empty() {
                if !player.play() {
                    writeln!(out, "Nothing to play")?;
                }
            } else {
                match track_number(rest, player.playlist().len()) {
                    Some(index) => {
                        player.play_index(index);
                    }
                    None => writeln!(out, "Usage: play [n]")?,
                }
            }
        }
        "pause" => {
            player.toggle_pause();
        }
        "stop" => player.stop(),
        "next" => {
            if !player.next() {
                writeln!(out, "Playlist is empty")?;
            }
        }
        "prev" | "previous" => {
            if !player.previous() {
                writeln!(out, "Playlist is empty")?;
            }
        }
        "seek" => match parse_clock(rest) {
            Some(ms) => {
                player.seek(ms);
            }
            None => writeln!(out, "Usage: seek <seconds|m:ss>")?,
        },
        "volume" => {
            if rest.is_empty() {
                writeln!(out, "Volume: {}", player.volume())?;
            } else {
                match rest.parse::<i64>() {
                    Ok(volume) => player.set_volume(volume),
                    Err(_) => writeln!(out, "Usage: volume <0-100>")?,
                }
            }
        }
        "repeat" => {
            if rest.is_empty() {
                player.cycle_repeat();
            } else {
                match RepeatMode::parse(rest) {
                    Some(mode) => player.set_repeat(mode),
                    None => writeln!(out, "Usage: repeat [off|one|all]")?,
                }
            }
        }
        "shuffle" => match rest {
            "" => player.set_shuffle(!player.shuffle()),
            "on" => player.set_shuffle(true),
            "off" => player.set_shuffle(false),
            _ => writeln!(out, "Usage: shuffle [on|off]")?,
        },
        "sort" => match SortKey::parse(rest) {
            Some(key) => {
                player.sort_playlist(key);
                writeln!(out, "Playlist sorted")?;
            }
            None => writeln!(out, "Usage: sort <title|artist|album>")?,
        },
        "move" => {
            let len = player.playlist().len();
            let mut numbers = rest.split_whitespace();
            let from = numbers.next().and_then(|n| track_number(n, len));
            let to = numbers.next().and_then(|n| track_number(n, len));
            match (from, to) {
                (Some(from), Some(to)) => {
                    player.move_track(from, to);
                }
                _ => writeln!(out, "Usage: move <from> <to>")?,
            }
        }
        "info" => {
            let info = if rest.is_empty() {
                player.current_info()
            } else {
                track_number(rest, player.playlist().len())
                    .and_then(|index| player.playlist().track_at(index).map(Path::to_path_buf))
                    .map(|path| player.track_info(&path))
            };
            match info {
                Some(info) => {
                    writeln!(out, "Title:  {}", info.title)?;
                    writeln!(out, "Artist: {}", info.artist)?;
                    writeln!(out, "Album:  {}", info.album)?;
                    writeln!(out, "Length: {}", format_clock(info.duration.as_millis() as u64))?;
                    match info.artwork {
                        Some(art) => writeln!(out, "Cover:  {}x{}", art.width, art.height)?,
                        None => {
                            let art = player.cover(&info.path);
                            writeln!(out, "Cover:  placeholder {}x{}", art.width, art.height)?
                        }
                    }
                }
                None => writeln!(out, "No track selected")?,
            }
        }
        "status" => {
            writeln!(
                out,
                "{} {} / {} | volume {} | repeat {} | shuffle {}",
                player.state().label(),
                format_clock(player.position_ms()),
                format_clock(player.duration_ms()),
                player.volume(),
                player.repeat().label(),
                if player.shuffle() { "on" } else { "off" },
            )?;
        }
        "history" => {
            let count = listing_size(rest);
            let entries = player.stores().history.recent(count);
            if entries.is_empty() {
                writeln!(out, "No history")?;
            }
            for entry in entries {
                writeln!(out, "{} - {}", entry.artist, entry.title)?;
            }
        }
        "top" => {
            let top = player.stores().statistics.top(listing_size(rest));
            if top.is_empty() {
                writeln!(out, "No plays yet")?;
            }
            for (rank, (path, plays)) in top.iter().enumerate() {
                writeln!(
                    out,
                    "{:>3}. {} ({plays})",
                    rank + 1,
                    crate::model::title_from_path(path)
                )?;
            }
        }
        "stats" => write!(out, "{}", player.stores().statistics.report(listing_size(rest)))?,
        "export" => {
            if rest.is_empty() {
                writeln!(out, "Usage: export <file.m3u|file.json>")?;
            } else {
                match player.export_playlist(Path::new(rest)) {
                    Ok(written) => writeln!(out, "Exported {written} tracks")?,
                    Err(err) => writeln!(out, "export error: {err:#}")?,
                }
            }
        }
        "import" | "open" => {
            if rest.is_empty() {
                writeln!(out, "Usage: {command} <file.m3u|file.json>")?;
            } else {
                match player.import_playlist(Path::new(rest), command == "open") {
                    Ok(added) => writeln!(out, "Added {added} tracks")?,
                    Err(err) => writeln!(out, "import error: {err:#}")?,
                }
            }
        }
        "recent" => {
            if player.recent_playlists().is_empty() {
                writeln!(out, "No recent playlists")?;
            }
            for path in player.recent_playlists() {
                writeln!(out, "{}", path.display())?;
            }
        }
        "save" => {
            if session.save() {
                writeln!(out, "Session saved")?;
            } else {
                writeln!(out, "save error: see log")?;
            }
        }
        "quit" | "exit" => return Ok(Flow::Quit),
        _ => writeln!(out, "Unknown command. Use help")?,
    }

    print_events(&mut session.player, out)?;
    Ok(Flow::Continue)
}

fn add_path(player: &mut Player, raw: &Path, out: &mut impl Write) -> Result<()> {
    let path = config::normalize_path(raw);
    let added = if path.is_dir() {
        player.enqueue(library::scan_folder(&path))
    } else if path.is_file() {
        player.enqueue([&path])
    } else {
        writeln!(out, "Not found: {}", path.display())?;
        return Ok(());
    };
    writeln!(out, "Added {added} tracks")?;
    Ok(())
}

fn print_events(player: &mut Player, out: &mut impl Write) -> Result<()> {
    for event in player.drain_events() {
        match event {
            PlayerEvent::TrackChanged(path) => {
                writeln!(out, "Now: {}", crate::model::title_from_path(&path))?
            }
            PlayerEvent::StateChanged(state) => writeln!(out, "[{}]", state.label())?,
            PlayerEvent::RepeatModeChanged(mode) => writeln!(out, "Repeat: {}", mode.label())?,
            PlayerEvent::ShuffleChanged(on) => {
                writeln!(out, "Shuffle: {}", if on { "on" } else { "off" })?
            }
            PlayerEvent::VolumeChanged(volume) => writeln!(out, "Volume: {volume}")?,
            PlayerEvent::Error(message) => writeln!(out, "Error: {message}")?,
            PlayerEvent::PositionChanged(_) | PlayerEvent::DurationChanged(_) => {}
        }
    }
    Ok(())
}

fn track_number(raw: &str, len: usize) -> Option<usize> {
    let number = raw.trim().parse::<usize>().ok()?;
    (1..=len).contains(&number).then(|| number - 1)
}

fn listing_size(raw: &str) -> usize {
    raw.parse().ok().filter(|n| *n > 0).unwrap_or(DEFAULT_LISTING)
}

/// Parses `90`, `1.5` or `1:30` into milliseconds.
fn parse_clock(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    let seconds = match raw.split_once(':') {
        Some((minutes, seconds)) => {
            minutes.parse::<u64>().ok()? as f64 * 60.0 + seconds.parse::<f64>().ok()?
        }
        None => raw.parse::<f64>().ok()?,
    };
    (seconds.is_finite() && seconds >= 0.0).then(|| (seconds * 1000.0).round() as u64)
}

fn format_clock(ms: u64) -> String {
    let seconds = ms / 1000;
    format!("{}:{:02}", seconds / 60, seconds % 60)
}

const HELP: &str = "\
Commands:
  add <file|folder>      queue audio files
  list [query]           show the playlist
  play [n] | pause | stop | next | prev
  seek <seconds|m:ss>    jump within the track
  volume [0-100]         show or set the volume
  repeat [off|one|all]   cycle or set repeat
  shuffle [on|off]       toggle or set shuffle
  sort <title|artist|album>
  move <from> <to> | remove <n> | clear [history|stats|cache|state]
  info [n] | status | history [n] | top [n] | stats [n]
  export <file> | import <file> | open <file> | recent
  save | quit";
