//! Terminal output helpers for the CLI: status lines and spinners.

use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;
use termion::color;

pub struct StatusUI;

impl StatusUI {
    pub fn info(message: &str) {
        println!(
            "{}{:>12}{} {}",
            color::Fg(color::Blue),
            "Info",
            color::Fg(color::Reset),
            message
        );
    }

    pub fn success(message: &str) {
        println!(
            "{}{:>12}{} {}",
            color::Fg(color::Green),
            "Done",
            color::Fg(color::Reset),
            message
        );
    }

    pub fn error(message: &str) {
        println!(
            "{}{:>12}{} {}",
            color::Fg(color::Red),
            "Error",
            color::Fg(color::Reset),
            message
        );
    }

    pub fn assistant(message: &str) {
        println!(
            "\n{}assistant{} {}\n",
            color::Fg(color::Cyan),
            color::Fg(color::Reset),
            message
        );
    }

    pub fn spinner(message: &str) -> ProgressBar {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{prefix:.blue.bold} {spinner:.blue} {msg}")
                .expect("Invalid spinner template")
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        pb.set_prefix(format!("{:>12}", "Working"));
        pb.set_message(message.to_string());
        pb.enable_steady_tick(Duration::from_millis(80));
        pb
    }

    pub fn finish_spinner(pb: ProgressBar, message: &str) {
        pb.finish_and_clear();
        Self::success(message);
    }
}
