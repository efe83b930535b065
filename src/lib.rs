//! Keeps a SQLite index of media files on removable and network volumes in
//! sync with what is actually on disk, and enriches video records with
//! stream-level metadata from `ffprobe`.

pub mod command;
pub mod config;
pub mod db;
pub mod logging;
pub mod probe;
pub mod progress;
pub mod reconcile;
pub mod registry;
pub mod scanner;
pub mod schedule;
pub mod volume;
