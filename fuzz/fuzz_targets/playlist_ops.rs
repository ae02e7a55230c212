#![no_main]

use libfuzzer_sys::fuzz_target;
use std::path::PathBuf;
use std::sync::OnceLock;
use tonearm::playlist::Playlist;
use tonearm::shuffle::ShuffleBag;

const TRACKS: usize = 16;

fn fixtures() -> &'static [PathBuf] {
    static FIXTURES: OnceLock<Vec<PathBuf>> = OnceLock::new();
    FIXTURES.get_or_init(|| {
        let dir = std::env::temp_dir().join("tonearm-fuzz");
        let _ = std::fs::create_dir_all(&dir);
        (0..TRACKS)
            .map(|idx| {
                let path = dir.join(format!("track_{idx}.mp3"));
                let _ = std::fs::write(&path, b"fuzz");
                path
            })
            .collect()
    })
}

fuzz_target!(|data: &[u8]| {
    let tracks = fixtures();
    let mut playlist = Playlist::new();
    let mut bag = ShuffleBag::with_seed(data.len() as u64);

    for pair in data.chunks(2) {
        let arg = usize::from(pair.get(1).copied().unwrap_or(0));
        match pair[0] % 9 {
            0 => {
                playlist.add(&tracks[arg % TRACKS]);
            }
            1 => {
                playlist.remove(arg % (playlist.len() + 1));
            }
            2 => {
                playlist.advance();
            }
            3 => {
                playlist.retreat();
            }
            4 => {
                playlist.set_current(arg % (playlist.len() + 1));
            }
            5 => {
                let len = playlist.len() + 1;
                playlist.move_track(arg % len, (arg / 3) % len);
            }
            6 => {
                if let Some(path) = bag.next(&mut playlist) {
                    assert_eq!(playlist.current(), Some(path.as_path()));
                }
            }
            7 => bag.reset(),
            _ => playlist.clear(),
        }

        if let Some(idx) = playlist.current_index() {
            assert!(idx < playlist.len());
        }
        assert!(bag.chosen_count() <= TRACKS);
    }
});
