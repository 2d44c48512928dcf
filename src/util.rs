//! Small shared helpers: byte formatting, progress-bar scaffolding, a
//! throttled progress-reporting helper, and the retry/backoff wrapper used
//! by the Packager and Dispatcher around object-store driver calls.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use anyhow::Result;
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};

#[cfg(windows)]
pub fn try_enable_ansi_on_windows() -> bool {
    enable_ansi_support::enable_ansi_support().is_ok()
}

#[cfg(not(windows))]
pub fn try_enable_ansi_on_windows() -> bool {
    false
}

/// Human-readable byte count using IEC units (KiB/MiB/GiB).
pub fn human_bytes(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    const GB: f64 = MB * 1024.0;
    let b = bytes as f64;
    if b >= GB {
        format!("{:.2} GiB", b / GB)
    } else if b >= MB {
        format!("{:.2} MiB", b / MB)
    } else if b >= KB {
        format!("{:.2} KiB", b / KB)
    } else {
        format!("{bytes} B")
    }
}

/// Builds a `MultiProgress` plus a total bar and a header spinner line, used
/// by the CLI's `job run` to show per-part and aggregate progress.
pub fn init_progress_and_mp(
    verbose: bool,
    total: u64,
    total_style: &ProgressStyle,
) -> (Arc<MultiProgress>, ProgressBar, ProgressBar) {
    let mp = Arc::new(if verbose {
        MultiProgress::with_draw_target(ProgressDrawTarget::stdout())
    } else {
        MultiProgress::new()
    });
    let header = mp.add(ProgressBar::new_spinner());
    header.set_style(ProgressStyle::with_template("{msg}").expect("valid header template"));
    let total_pb = mp.add(ProgressBar::new(total));
    total_pb.set_style(total_style.clone());
    let _ = try_enable_ansi_on_windows();
    (mp, total_pb, header)
}

/// Batches small, frequent progress increments (e.g. per-chunk bytes from an
/// object-store driver's stdout) so the progress bar and event bus aren't
/// hammered on every line. Flushes once 64 KiB has accumulated or 50ms has
/// elapsed since the last flush, whichever comes first.
pub struct Throttler {
    pending: u64,
    last_flush: Instant,
}

impl Throttler {
    pub fn new() -> Self {
        Self { pending: 0, last_flush: Instant::now() }
    }

    pub fn tick(&mut self, n: u64, bar: Option<&ProgressBar>, bytes_transferred: Option<&AtomicU64>) {
        self.pending += n;
        if self.pending >= 64 * 1024 || self.last_flush.elapsed() >= Duration::from_millis(50) {
            self.flush(bar, bytes_transferred);
        }
    }

    /// Like [`Throttler::tick`], but for callers that don't have a
    /// `ProgressBar`/byte counter to drive directly — returns whether this
    /// call crossed the flush threshold so the caller can gate its own
    /// side effect (e.g. publishing an event) instead.
    pub fn allow(&mut self, n: u64) -> bool {
        self.pending += n;
        if self.pending >= 64 * 1024 || self.last_flush.elapsed() >= Duration::from_millis(50) {
            self.pending = 0;
            self.last_flush = Instant::now();
            true
        } else {
            false
        }
    }

    pub fn flush(&mut self, bar: Option<&ProgressBar>, bytes_transferred: Option<&AtomicU64>) {
        if self.pending > 0 {
            if let Some(pb) = bar {
                pb.inc(self.pending);
            }
            if let Some(bytes) = bytes_transferred {
                bytes.fetch_add(self.pending, Ordering::SeqCst);
            }
            self.pending = 0;
            self.last_flush = Instant::now();
        }
    }
}

impl Default for Throttler {
    fn default() -> Self {
        Self::new()
    }
}

static BACKOFF_BASE_MS: AtomicU64 = AtomicU64::new(500);

pub fn set_backoff_ms(ms: u64) {
    BACKOFF_BASE_MS.store(ms, Ordering::SeqCst);
}

pub fn get_backoff_ms() -> u64 {
    BACKOFF_BASE_MS.load(Ordering::SeqCst)
}

/// Runs `op` up to `max_retries` times with a linearly increasing backoff
/// (`attempt * backoff_base_ms`) between attempts. Callers decide whether a
/// given error is worth retrying at all by checking `is_retriable()` on the
/// error they got back before calling this again — this helper itself
/// retries unconditionally up to the attempt budget.
pub fn retry_operation<F, T>(max_retries: usize, mut op: F) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    let mut last_err: Option<anyhow::Error> = None;
    for attempt in 0..max_retries {
        match op() {
            Ok(v) => return Ok(v),
            Err(e) => {
                last_err = Some(e);
                if attempt + 1 < max_retries {
                    let base = BACKOFF_BASE_MS.load(Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(base.saturating_mul(attempt as u64 + 1)));
                }
            }
        }
    }
    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("operation failed with no recorded error")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn human_bytes_picks_the_right_unit() {
        assert_eq!(human_bytes(512), "512 B");
        assert_eq!(human_bytes(2048), "2.00 KiB");
        assert_eq!(human_bytes(5 * 1024 * 1024), "5.00 MiB");
    }

    #[test]
    fn throttler_allow_flushes_once_byte_threshold_crossed() {
        let mut t = Throttler::new();
        assert!(!t.allow(10));
        assert!(t.allow(64 * 1024));
    }

    #[test]
    fn retry_operation_gives_up_after_max_attempts() {
        let mut calls = 0;
        set_backoff_ms(1);
        let result: Result<()> = retry_operation(3, || {
            calls += 1;
            anyhow::bail!("still failing")
        });
        assert!(result.is_err());
        assert_eq!(calls, 3);
    }

    #[test]
    fn retry_operation_returns_first_success() {
        let mut calls = 0;
        set_backoff_ms(1);
        let result = retry_operation(5, || {
            calls += 1;
            if calls < 2 { anyhow::bail!("not yet") } else { Ok(42) }
        });
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls, 2);
    }
}
