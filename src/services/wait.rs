//! Interruptible waits with visible progress.
//!
//! Rate-limit waits and retry backoff are the only places the orchestrator
//! sleeps on purpose. Both show a ticking spinner on a terminal and emit a
//! periodic log line, so a waiting agent never looks hung.

use std::time::Duration;

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::info;

const SPINNER_TEMPLATE: &str = "[{elapsed_precise}] {spinner:.yellow} {msg}";
const SPINNER_CHARS: &str = "⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏";

/// The wait was cut short by a cancellation request.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("wait interrupted by cancellation")]
pub struct Interrupted;

fn spinner() -> ProgressBar {
    let pb = ProgressBar::with_draw_target(None, ProgressDrawTarget::stderr());
    if let Ok(style) = ProgressStyle::default_spinner().template(SPINNER_TEMPLATE) {
        pb.set_style(style.tick_chars(SPINNER_CHARS));
    }
    pb
}

/// Sleep for `duration` unless `token` fires first.
///
/// `reason` is shown next to the remaining time; a log line is written every
/// `report_every`.
pub async fn countdown(
    reason: &str,
    duration: Duration,
    token: &CancellationToken,
    report_every: Duration,
) -> Result<(), Interrupted> {
    if token.is_cancelled() {
        return Err(Interrupted);
    }
    if duration.is_zero() {
        return Ok(());
    }

    let deadline = Instant::now() + duration;
    let report_every = report_every.max(Duration::from_secs(1));
    let pb = spinner();
    let mut tick = tokio::time::interval(Duration::from_secs(1));
    let mut next_report = Instant::now();

    info!(reason, wait_secs = duration.as_secs(), "waiting");
    let result = loop {
        let now = Instant::now();
        if now >= deadline {
            break Ok(());
        }
        let remaining = deadline - now;
        pb.set_message(format!("{reason}: {}s remaining", remaining.as_secs()));
        pb.tick();
        if now >= next_report {
            info!(reason, remaining_secs = remaining.as_secs(), "still waiting");
            next_report = now + report_every;
        }

        tokio::select! {
            () = token.cancelled() => break Err(Interrupted),
            () = tokio::time::sleep_until(deadline) => break Ok(()),
            _ = tick.tick() => {}
        }
    };
    pb.finish_and_clear();
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_countdown_completes() {
        let token = CancellationToken::new();
        let start = Instant::now();
        countdown("backoff", Duration::from_secs(5), &token, Duration::from_secs(2))
            .await
            .unwrap();
        assert!(start.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_countdown_is_cancellable() {
        let token = CancellationToken::new();
        let child = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(3)).await;
            child.cancel();
        });
        let start = Instant::now();
        let result = countdown("rate limit", Duration::from_secs(3600), &token, Duration::from_secs(30)).await;
        assert_eq!(result, Err(Interrupted));
        assert!(start.elapsed() < Duration::from_secs(3600));
    }

    #[tokio::test]
    async fn test_already_cancelled_returns_immediately() {
        let token = CancellationToken::new();
        token.cancel();
        assert_eq!(
            countdown("x", Duration::from_secs(60), &token, Duration::from_secs(1)).await,
            Err(Interrupted)
        );
    }
}
