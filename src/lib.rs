pub mod alignment;
pub mod analyzer;
pub mod config;
pub mod matchfile;
pub mod performance;
pub mod score;

/// Application name for XDG paths
pub const APP_NAME: &str = "perfmatch";
