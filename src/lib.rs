pub mod analyzer;
pub mod config;
pub mod interrupt;
pub mod report;
pub mod scanner;

/// Audio file extensions we decode
pub const SUPPORTED_EXTENSIONS: &[&str] = &[
    "wav", "wave",
    // claxon
    "flac",
    // symphonia
    "mp3", "ogg",
];

/// Application name for XDG paths
pub const APP_NAME: &str = "pitchbatch";
