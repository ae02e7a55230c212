pub mod app;
pub mod artwork;
pub mod audio;
pub mod config;
pub mod history;
pub mod library;
pub mod model;
pub mod player;
pub mod playlist;
pub mod playlist_io;
pub mod shuffle;
pub mod state;
pub mod stats;
