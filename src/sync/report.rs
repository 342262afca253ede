use std::io::IsTerminal;
use std::time::Duration;

use chrono::NaiveDate;
use indicatif::{ProgressBar, ProgressStyle};

/// Running totals for one sync.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncReport {
    /// Records received from the feed.
    pub generations_downloaded: u64,
    /// Records written to disk.
    pub generations_saved: u64,
    pub images_saved: u64,
    pub images_skipped: u64,
    /// Oldest record date seen.
    pub from_date: Option<NaiveDate>,
    /// Newest record date seen.
    pub to_date: Option<NaiveDate>,
}

impl SyncReport {
    pub(crate) fn note_date(&mut self, date: NaiveDate) {
        self.from_date = Some(self.from_date.map_or(date, |d| d.min(date)));
        self.to_date = Some(self.to_date.map_or(date, |d| d.max(date)));
    }

    pub fn date_range(&self) -> Option<String> {
        match (self.from_date, self.to_date) {
            (Some(from), Some(to)) if from == to => Some(from.to_string()),
            (Some(from), Some(to)) => Some(format!("{} to {}", from, to)),
            _ => None,
        }
    }
}

/// Receives the running totals as a sync progresses.
pub trait ProgressSink: Send + Sync {
    fn on_progress(&self, report: &SyncReport);

    /// Run `f` (typically a log call) without tearing the progress display.
    fn suspend(&self, f: &mut dyn FnMut()) {
        f()
    }

    fn finish(&self) {}
}

/// Reports progress only through `debug!` lines.
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn on_progress(&self, report: &SyncReport) {
        tracing::debug!(
            downloaded = report.generations_downloaded,
            saved = report.generations_saved,
            images = report.images_saved,
            "progress"
        );
    }
}

/// Terminal spinner showing the running totals.
pub struct BarProgress {
    pb: ProgressBar,
}

impl BarProgress {
    /// A hidden bar when the user passed `--no-progress-bar` or stdout is not
    /// a TTY (piped output, cron jobs).
    pub fn new(no_progress_bar: bool) -> Self {
        if no_progress_bar || !std::io::stdout().is_terminal() {
            return Self {
                pb: ProgressBar::hidden(),
            };
        }
        let pb = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        pb.set_style(style);
        pb.enable_steady_tick(Duration::from_millis(120));
        Self { pb }
    }
}

impl ProgressSink for BarProgress {
    fn on_progress(&self, report: &SyncReport) {
        self.pb.set_message(format!(
            "{} generations ({} new), {} images",
            report.generations_downloaded, report.generations_saved, report.images_saved
        ));
    }

    fn suspend(&self, f: &mut dyn FnMut()) {
        self.pb.suspend(f)
    }

    fn finish(&self) {
        self.pb.finish_and_clear();
    }
}

pub fn format_duration(d: Duration) -> String {
    let total_secs = d.as_secs();
    let hours = total_secs / 3600;
    let mins = (total_secs % 3600) / 60;
    let secs = total_secs % 60;

    if hours > 0 {
        format!("{}h {:02}m {:02}s", hours, mins, secs)
    } else if mins > 0 {
        format!("{}m {:02}s", mins, secs)
    } else {
        format!("{}s", secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    #[test]
    fn test_note_date_tracks_range() {
        let mut report = SyncReport::default();
        assert_eq!(report.date_range(), None);
        report.note_date(day(9));
        assert_eq!(report.date_range(), Some("2024-03-09".into()));
        report.note_date(day(2));
        report.note_date(day(5));
        assert_eq!(report.from_date, Some(day(2)));
        assert_eq!(report.to_date, Some(day(9)));
        assert_eq!(report.date_range(), Some("2024-03-02 to 2024-03-09".into()));
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(7)), "7s");
        assert_eq!(format_duration(Duration::from_secs(125)), "2m 05s");
        assert_eq!(format_duration(Duration::from_secs(3723)), "1h 02m 03s");
    }

    #[test]
    fn test_hidden_bar_is_a_working_sink() {
        let bar = BarProgress::new(true);
        let mut called = false;
        bar.suspend(&mut || called = true);
        bar.on_progress(&SyncReport::default());
        bar.finish();
        assert!(called);
    }
}
