use crate::playlist::Playlist;
use rand::rngs::{SmallRng, SysRng};
use rand::{RngExt, SeedableRng};
use std::collections::HashSet;
use std::path::PathBuf;

/// Picks tracks at random without repeating one until every track in the
/// playlist has been picked once.
#[derive(Debug)]
pub struct ShuffleBag {
    chosen: HashSet<usize>,
    rng: SmallRng,
}

impl Default for ShuffleBag {
    fn default() -> Self {
        Self::new()
    }
}

impl ShuffleBag {
    pub fn new() -> Self {
        Self {
            chosen: HashSet::new(),
            rng: SmallRng::try_from_rng(&mut SysRng).expect("failed to seed from OS RNG"),
        }
    }

    pub fn with_seed(seed: u64) -> Self {
        Self {
            chosen: HashSet::new(),
            rng: SmallRng::seed_from_u64(seed),
        }
    }

    /// Chooses the next track, moves the playlist cursor onto it and
    /// returns its path.
    pub fn next(&mut self, playlist: &mut Playlist) -> Option<PathBuf> {
        let len = playlist.len();
        if len == 0 {
            return None;
        }

        if self.chosen.len() >= len {
            self.chosen.clear();
        }

        let mut available: Vec<usize> = (0..len).filter(|idx| !self.chosen.contains(idx)).collect();
        if available.is_empty() {
            // Stale indices from a longer playlist can fill the bag without
            // covering the current range.
            self.chosen.clear();
            available = (0..len).collect();
        }

        let pick = available[self.rng.random_range(0..available.len())];
        self.chosen.insert(pick);
        playlist.set_current(pick);
        playlist.track_at(pick).map(PathBuf::from)
    }

    /// Counts `index` as played in this cycle, for tracks started without
    /// going through [`ShuffleBag::next`].
    pub fn mark(&mut self, index: usize) {
        self.chosen.insert(index);
    }

    pub fn reset(&mut self) {
        self.chosen.clear();
    }

    /// True once every index below `len` has been handed out this cycle.
    pub fn is_cycle_complete(&self, len: usize) -> bool {
        len > 0 && (0..len).all(|idx| self.chosen.contains(&idx))
    }

    pub fn chosen_count(&self) -> usize {
        self.chosen.len()
    }
}
