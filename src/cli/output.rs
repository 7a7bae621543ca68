//! Output formatting and progress indicators
//!
//! This module provides the progress spinner, status prefixes and the
//! global output settings derived from `-v`, `--quiet` and `--json`.

use indicatif::{ProgressBar, ProgressStyle};
use std::sync::OnceLock;
use tracing::Level;

static OUTPUT: OnceLock<OutputConfig> = OnceLock::new();

/// Output settings for the whole process
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutputConfig {
    /// Only errors are printed
    pub quiet: bool,
    /// Results are printed as JSON
    pub json: bool,
    /// Number of `-v` flags
    pub verbose: u8,
}

impl OutputConfig {
    /// Create output settings from command-line flags
    pub fn new(quiet: bool, json: bool, verbose: u8) -> Self {
        Self {
            quiet,
            json,
            verbose,
        }
    }

    /// Make these settings visible through [`OutputConfig::current`]
    pub fn apply_global(self) {
        let _ = OUTPUT.set(self);
    }

    /// Settings applied by `main`, or the defaults
    pub fn current() -> Self {
        OUTPUT.get().copied().unwrap_or_default()
    }

    /// Default tracing level for these settings
    pub fn log_level(&self) -> Level {
        match (self.quiet, self.verbose) {
            (true, _) => Level::ERROR,
            (false, 0) => Level::WARN,
            (false, 1) => Level::INFO,
            (false, _) => Level::DEBUG,
        }
    }

    /// Whether a spinner should be drawn
    pub fn show_progress(&self) -> bool {
        !self.quiet && !self.json && self.verbose == 0
    }
}

/// Create a spinner for operations with unknown duration
pub fn create_spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏")
            .template("{spinner:.blue} {msg}")
            .expect("Invalid spinner template"),
    );
    pb.set_message(message.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(80));
    pb
}

/// Print an error and its causes to stderr
pub fn display_error(error: &anyhow::Error) {
    if OutputConfig::current().json {
        let causes: Vec<String> = error.chain().map(ToString::to_string).collect();
        println!("{}", serde_json::json!({ "error": causes }));
        return;
    }

    eprintln!("{} {}", status::ERROR, error);
    for cause in error.chain().skip(1) {
        eprintln!("  caused by: {cause}");
    }
}

/// Status message prefixes
pub mod status {
    /// Success prefix (green checkmark)
    pub const SUCCESS: &str = "✓";

    /// Error prefix (red X)
    pub const ERROR: &str = "✗";

    /// Warning prefix (yellow triangle)
    pub const WARNING: &str = "⚠";

    /// Info prefix (blue circle)
    pub const INFO: &str = "ℹ";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level() {
        assert_eq!(OutputConfig::new(false, false, 0).log_level(), Level::WARN);
        assert_eq!(OutputConfig::new(false, false, 1).log_level(), Level::INFO);
        assert_eq!(OutputConfig::new(false, false, 3).log_level(), Level::DEBUG);
        assert_eq!(OutputConfig::new(true, false, 2).log_level(), Level::ERROR);
    }

    #[test]
    fn test_progress_only_when_plain() {
        assert!(OutputConfig::new(false, false, 0).show_progress());
        assert!(!OutputConfig::new(false, true, 0).show_progress());
        assert!(!OutputConfig::new(true, false, 0).show_progress());
        assert!(!OutputConfig::new(false, false, 1).show_progress());
    }
}
