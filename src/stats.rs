use crate::config;
use crate::history::now;
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

const FORMAT_VERSION: &str = "1.0";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackStats {
    pub play_count: u64,
    #[serde(with = "time::serde::rfc3339::option", default)]
    pub first_played: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option", default)]
    pub last_played: Option<OffsetDateTime>,
}

/// Per-track records in the order tracks were first seen.
#[derive(Debug, Clone, Default)]
struct Ledger {
    rows: Vec<(String, TrackStats)>,
    lookup: HashMap<String, usize>,
}

impl Ledger {
    fn get(&self, key: &str) -> Option<&TrackStats> {
        self.lookup.get(key).map(|idx| &self.rows[*idx].1)
    }

    fn entry(&mut self, key: &str) -> &mut TrackStats {
        let idx = match self.lookup.get(key) {
            Some(idx) => *idx,
            None => {
                self.rows.push((key.to_string(), TrackStats::default()));
                self.lookup.insert(key.to_string(), self.rows.len() - 1);
                self.rows.len() - 1
            }
        };
        &mut self.rows[idx].1
    }

    fn clear(&mut self) {
        self.rows.clear();
        self.lookup.clear();
    }
}

impl Serialize for Ledger {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.rows.len()))?;
        for (key, stats) in &self.rows {
            map.serialize_entry(key, stats)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Ledger {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct LedgerVisitor;

        impl<'de> Visitor<'de> for LedgerVisitor {
            type Value = Ledger;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of track paths to play statistics")
            }

            fn visit_map<A>(self, mut access: A) -> Result<Ledger, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut ledger = Ledger::default();
                while let Some((key, stats)) = access.next_entry::<String, TrackStats>()? {
                    *ledger.entry(&key) = stats;
                }
                Ok(ledger)
            }
        }

        deserializer.deserialize_map(LedgerVisitor)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StatsFile {
    version: String,
    statistics: Ledger,
}

/// Play counts and first/last play times per track path.
#[derive(Debug)]
pub struct PlayStatistics {
    file: PathBuf,
    ledger: Ledger,
}

impl PlayStatistics {
    pub fn open(file: impl Into<PathBuf>) -> Self {
        let file = file.into();
        let ledger = match config::read_json::<StatsFile>(&file) {
            Ok(Some(stored)) => stored.statistics,
            Ok(None) => Ledger::default(),
            Err(err) => {
                tracing::error!("play statistics unreadable, starting empty: {err:#}");
                Ledger::default()
            }
        };
        tracing::debug!(tracks = ledger.rows.len(), "play statistics loaded");
        Self { file, ledger }
    }

    pub fn increment(&mut self, path: &Path) {
        self.increment_at(path, now());
    }

    pub fn increment_at(&mut self, path: &Path, at: OffsetDateTime) {
        let stats = self.ledger.entry(&track_key(path));
        stats.play_count = stats.play_count.saturating_add(1);
        stats.last_played = Some(at);
        if stats.first_played.is_none() {
            stats.first_played = Some(at);
        }
        self.save();
    }

    /// The `n` most played tracks, most played first. Ties keep the order
    /// in which tracks were first recorded.
    pub fn top(&self, n: usize) -> Vec<(PathBuf, u64)> {
        let mut ranked: Vec<&(String, TrackStats)> = self.ledger.rows.iter().collect();
        ranked.sort_by(|a, b| b.1.play_count.cmp(&a.1.play_count));
        ranked
            .into_iter()
            .take(n)
            .map(|(key, stats)| (PathBuf::from(key), stats.play_count))
            .collect()
    }

    pub fn play_count(&self, path: &Path) -> u64 {
        self.get(path).map_or(0, |stats| stats.play_count)
    }

    pub fn get(&self, path: &Path) -> Option<&TrackStats> {
        self.ledger.get(&track_key(path))
    }

    pub fn total_plays(&self) -> u64 {
        self.ledger
            .rows
            .iter()
            .map(|(_, stats)| stats.play_count)
            .sum()
    }

    pub fn len(&self) -> usize {
        self.ledger.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ledger.rows.is_empty()
    }

    pub fn clear(&mut self) {
        self.ledger.clear();
        self.save();
    }

    /// Plain-text summary: totals followed by the `n` most played tracks.
    pub fn report(&self, n: usize) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Playback statistics");
        let _ = writeln!(out, "Tracks played: {}", self.len());
        let _ = writeln!(out, "Total plays: {}", self.total_plays());

        let top = self.top(n);
        if top.is_empty() {
            return out;
        }

        let _ = writeln!(out);
        let _ = writeln!(out, "Most played:");
        for (rank, (path, plays)) in top.iter().enumerate() {
            let last = self
                .get(path)
                .and_then(|stats| stats.last_played)
                .and_then(|at| at.format(&Rfc3339).ok())
                .unwrap_or_else(|| String::from("never"));
            let _ = writeln!(
                out,
                "{:>3}. {} ({plays} plays, last {last})",
                rank + 1,
                crate::model::title_from_path(path),
            );
        }
        out
    }

    fn save(&self) {
        if let Err(err) = self.try_save() {
            tracing::error!("failed to save play statistics: {err:#}");
        }
    }

    fn try_save(&self) -> anyhow::Result<()> {
        if self.file.exists() {
            let backup = self.file.with_extension("json.bak");
            let _ = fs::copy(&self.file, &backup);
        }
        let stored = StatsFile {
            version: FORMAT_VERSION.to_string(),
            statistics: self.ledger.clone(),
        };
        config::write_json_atomic(&self.file, &stored)
    }
}

fn track_key(path: &Path) -> String {
    path.to_string_lossy().to_string()
}
