use crate::flags::{Flags, RunStatus};
use crate::ui::icons::{CHECK, CLOCK, CROSS, PROGRESS, RUNNING, STOP};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Resolution of the progress bar; `progress` is a fraction in `0.0..=1.0`.
const BAR_STEPS: u64 = 1000;

/// Terminal view of the worker's progress as seen through the shared flags.
///
/// The bar is drawn on stderr and hides itself when stderr is not a terminal.
/// Status lines go to stdout either way, so scripted callers still see them.
pub struct FlagMonitor {
    bar: ProgressBar,
    last_status: Option<RunStatus>,
}

impl FlagMonitor {
    /// Create the monitor with `label` shown in front of the bar.
    pub fn new(label: &str) -> Self {
        let bar_style = ProgressStyle::default_bar()
            .template("{prefix:.bold.dim} [{bar:40.cyan/blue}] {percent:>3}% {msg}")
            .expect("progress bar template is a valid static string")
            .progress_chars("█▓▒░");

        let bar = ProgressBar::new(BAR_STEPS);
        bar.set_style(bar_style);
        bar.set_prefix(label.to_string());
        bar.enable_steady_tick(Duration::from_millis(100));

        Self {
            bar,
            last_status: None,
        }
    }

    /// Reflect a freshly read document. Status changes are also printed as a line.
    pub fn update(&mut self, flags: &Flags) {
        self.bar.set_position(progress_position(flags.progress));
        self.bar.set_message(status_message(flags));

        let status = flags.status();
        if self.last_status != Some(status) {
            self.last_status = Some(status);
            self.print_line(status_line(flags));
        }
    }

    /// Print a line above the bar.
    pub fn print_line(&self, msg: impl AsRef<str>) {
        self.bar.suspend(|| println!("{}", msg.as_ref()));
    }

    /// Stop drawing and print the final state.
    pub fn finish(&self, flags: &Flags) {
        self.bar.set_position(progress_position(flags.progress));
        self.bar.finish_and_clear();
        println!(
            "{}Final state: {} at {}",
            PROGRESS,
            style(flags.status()).bold(),
            format_progress(flags.progress)
        );
    }
}

/// Bar position for a progress fraction, clamped to the bar.
pub fn progress_position(progress: f64) -> u64 {
    if progress.is_nan() {
        return 0;
    }
    (progress.clamp(0.0, 1.0) * BAR_STEPS as f64).round() as u64
}

/// Progress fraction as a percentage string, e.g. "42.0%".
pub fn format_progress(progress: f64) -> String {
    format!("{:.1}%", progress * 100.0)
}

fn status_message(flags: &Flags) -> String {
    format!("epoch {} | {}", flags.epoch, flags.status())
}

/// One-line summary of a status transition.
pub fn status_line(flags: &Flags) -> String {
    match flags.status() {
        RunStatus::Waiting => format!("{}Waiting for the worker to start", CLOCK),
        RunStatus::Running => format!(
            "{}Running {} ({})",
            RUNNING,
            style(&flags.project_name).cyan(),
            format_progress(flags.progress)
        ),
        RunStatus::Stopping => format!("{}Stop requested", STOP),
        RunStatus::Done => format!("{}Done ({})", CHECK, format_progress(flags.progress)),
        RunStatus::Failed => format!("{}Failed: {}", CROSS, style(&flags.error).red()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_position_clamps() {
        assert_eq!(progress_position(0.0), 0);
        assert_eq!(progress_position(0.42), 420);
        assert_eq!(progress_position(1.0), 1000);
        assert_eq!(progress_position(-0.5), 0);
        assert_eq!(progress_position(7.0), 1000);
        assert_eq!(progress_position(f64::NAN), 0);
    }

    #[test]
    fn test_format_progress() {
        assert_eq!(format_progress(0.42), "42.0%");
        assert_eq!(format_progress(1.0), "100.0%");
    }

    #[test]
    fn test_status_line_mentions_error() {
        let mut flags = Flags::default();
        flags.error = "CUDA out of memory".to_string();
        assert!(status_line(&flags).contains("CUDA out of memory"));
    }

    #[test]
    fn test_status_line_for_done() {
        let mut flags = Flags::default();
        flags.done = true;
        flags.progress = 1.0;
        let line = status_line(&flags);
        assert!(line.contains("Done"));
        assert!(line.contains("100.0%"));
    }

    #[test]
    fn test_status_message_includes_epoch() {
        let mut flags = Flags::default();
        flags.epoch = 3;
        flags.started = true;
        assert_eq!(status_message(&flags), "epoch 3 | running");
    }
}
