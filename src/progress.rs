//! Backfill progress on stderr, so stdout stays parseable.

use std::io::Write;

use serde_json::json;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BackfillProgressEvent {
    /// Listing the indexcards to backfill; total not yet known.
    Listing { strategy: String },
    /// `n` of `total` messages published to the strategy's queue.
    Publishing {
        strategy: String,
        n: u64,
        total: u64,
    },
}

impl BackfillProgressEvent {
    /// `backfill trovesearch_denorm  queued  1,234 / 5,000 cards (24%)`
    fn human_line(&self) -> String {
        match self {
            BackfillProgressEvent::Listing { strategy } => {
                format!("backfill {strategy}  listing indexcards...")
            }
            BackfillProgressEvent::Publishing { strategy, n, total } => {
                let percent = if *total == 0 { 100 } else { n * 100 / total };
                format!(
                    "backfill {strategy}  queued  {} / {} cards ({percent}%)",
                    format_number(*n),
                    format_number(*total)
                )
            }
        }
    }

    fn json_line(&self) -> serde_json::Value {
        match self {
            BackfillProgressEvent::Listing { strategy } => json!({
                "event": "backfill_progress",
                "strategy": strategy,
                "phase": "listing",
            }),
            BackfillProgressEvent::Publishing { strategy, n, total } => json!({
                "event": "backfill_progress",
                "strategy": strategy,
                "phase": "publishing",
                "n": n,
                "total": total,
            }),
        }
    }
}

pub trait BackfillProgressReporter: Send + Sync {
    fn report(&self, event: BackfillProgressEvent);
}

fn write_stderr_line(line: &str) {
    let mut stderr = std::io::stderr().lock();
    // progress is best-effort
    let _ = writeln!(stderr, "{line}");
    let _ = stderr.flush();
}

pub struct StderrProgress;

impl BackfillProgressReporter for StderrProgress {
    fn report(&self, event: BackfillProgressEvent) {
        write_stderr_line(&event.human_line());
    }
}

/// One JSON object per line.
pub struct JsonProgress;

impl BackfillProgressReporter for JsonProgress {
    fn report(&self, event: BackfillProgressEvent) {
        write_stderr_line(&event.json_line().to_string());
    }
}

pub struct NoProgress;

impl BackfillProgressReporter for NoProgress {
    fn report(&self, _event: BackfillProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let digits = n.to_string();
    let lead = digits.len() % 3;
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (i + 3 - lead) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Human progress when stderr is a terminal, otherwise none.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn BackfillProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
