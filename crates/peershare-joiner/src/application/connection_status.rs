//! Connection status countdown shown while a join is in progress.
//!
//! The tracker counts down from five minutes, re-evaluating once a second
//! and whenever the stage label changes.  Each evaluation yields
//! [`StatusEvent`]s on the receiver returned by
//! [`ConnectionStatusTracker::start`]:
//!
//! - `Update` with the current [`StatusSnapshot`],
//! - `Warning` once at 30 s remaining and once at 10 s,
//! - `TimedOut` when the countdown reaches zero, after which the tracker
//!   stops on its own.
//!
//! The countdown arithmetic lives in [`Countdown`], which has no timers so
//! the rules can be tested directly.

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;

/// Overall budget for one join attempt.
pub const JOIN_TIMEOUT: Duration = Duration::from_secs(5 * 60);
/// Re-evaluation period.
pub const TICK: Duration = Duration::from_secs(1);
/// Stage label before the first `set_stage`.
pub const INITIAL_STAGE: &str = "Initializing...";
/// Remaining seconds at or below which the status is flagged as a warning.
pub const WARNING_THRESHOLD_SECS: u64 = 30;
/// Remaining seconds of the final warning.
pub const FINAL_WARNING_SECS: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusTrackerConfig {
    pub timeout: Duration,
    pub tick: Duration,
}

impl Default for StatusTrackerConfig {
    fn default() -> Self {
        Self {
            timeout: JOIN_TIMEOUT,
            tick: TICK,
        }
    }
}

/// One evaluation of the countdown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusSnapshot {
    pub stage: String,
    pub elapsed_secs: u64,
    pub remaining_secs: u64,
    pub is_warning: bool,
}

impl StatusSnapshot {
    pub fn elapsed_label(&self) -> String {
        format_duration(self.elapsed_secs)
    }

    pub fn remaining_label(&self) -> String {
        format_duration(self.remaining_secs)
    }

    /// `"<stage> - Elapsed: <e> - Time remaining: <r>"`
    pub fn status_line(&self) -> String {
        format!(
            "{} - Elapsed: {} - Time remaining: {}",
            self.stage,
            self.elapsed_label(),
            self.remaining_label()
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusEvent {
    Update(StatusSnapshot),
    /// Seconds remaining when the warning fired: 30 or 10.
    Warning(u64),
    TimedOut,
}

/// `"Xm Ys"` from one minute up, `"Ys"` below.
pub fn format_duration(secs: u64) -> String {
    let mins = secs / 60;
    let rest = secs % 60;
    if mins > 0 {
        format!("{mins}m {rest}s")
    } else {
        format!("{rest}s")
    }
}

// ── Countdown ─────────────────────────────────────────────────────────────────

/// Timer-free countdown rules.
#[derive(Debug)]
pub struct Countdown {
    timeout_secs: u64,
    warned_30: bool,
    warned_10: bool,
    expired: bool,
}

impl Countdown {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout_secs: timeout.as_secs(),
            warned_30: false,
            warned_10: false,
            expired: false,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.expired
    }

    /// Evaluates the countdown `elapsed` after start.
    ///
    /// At most one warning fires per evaluation.  Reaching 10 s without
    /// having shown the 30 s warning skips it.  Once expired, evaluates to
    /// nothing.
    pub fn evaluate(&mut self, stage: &str, elapsed: Duration) -> Vec<StatusEvent> {
        if self.expired {
            return Vec::new();
        }

        let elapsed_secs = elapsed.as_secs();
        let remaining_secs = self.timeout_secs.saturating_sub(elapsed_secs);
        let mut events = Vec::new();

        if remaining_secs <= FINAL_WARNING_SECS && !self.warned_10 {
            self.warned_10 = true;
            self.warned_30 = true;
            events.push(StatusEvent::Warning(FINAL_WARNING_SECS));
        } else if remaining_secs <= WARNING_THRESHOLD_SECS && !self.warned_30 {
            self.warned_30 = true;
            events.push(StatusEvent::Warning(WARNING_THRESHOLD_SECS));
        }

        if remaining_secs == 0 {
            self.expired = true;
            events.push(StatusEvent::TimedOut);
            return events;
        }

        events.push(StatusEvent::Update(StatusSnapshot {
            stage: stage.to_string(),
            elapsed_secs,
            remaining_secs,
            is_warning: remaining_secs <= WARNING_THRESHOLD_SECS,
        }));
        events
    }
}

// ── Tracker ───────────────────────────────────────────────────────────────────

/// Running countdown for one join attempt.
///
/// Dropping the tracker stops it.
#[derive(Debug)]
pub struct ConnectionStatusTracker {
    stage: watch::Sender<String>,
    task: Option<JoinHandle<()>>,
}

impl ConnectionStatusTracker {
    /// Starts the countdown now.  The first `Update` is emitted immediately.
    pub fn start(config: StatusTrackerConfig) -> (Self, mpsc::UnboundedReceiver<StatusEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (stage_tx, stage_rx) = watch::channel(INITIAL_STAGE.to_string());
        let task = tokio::spawn(run_countdown(config, stage_rx, events_tx));
        (
            Self {
                stage: stage_tx,
                task: Some(task),
            },
            events_rx,
        )
    }

    /// Changes the stage label and re-evaluates right away.
    pub fn set_stage(&self, stage: impl Into<String>) {
        let stage = stage.into();
        debug!(%stage, "join stage");
        self.stage.send_replace(stage);
    }

    pub fn stage(&self) -> String {
        self.stage.borrow().clone()
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().map_or(false, |t| !t.is_finished())
    }

    /// Stops the countdown.  No events are emitted afterwards.  Idempotent.
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for ConnectionStatusTracker {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_countdown(
    config: StatusTrackerConfig,
    mut stage: watch::Receiver<String>,
    events: mpsc::UnboundedSender<StatusEvent>,
) {
    let started = Instant::now();
    let mut countdown = Countdown::new(config.timeout);
    let mut ticker = tokio::time::interval(config.tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut watching_stage = true;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            changed = stage.changed(), if watching_stage => {
                if changed.is_err() {
                    watching_stage = false;
                    continue;
                }
            }
        }

        let label = stage.borrow_and_update().clone();
        for event in countdown.evaluate(&label, started.elapsed()) {
            if events.send(event).is_err() {
                return;
            }
        }
        if countdown.is_expired() {
            debug!("join countdown expired");
            return;
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    // ── Formatting ────────────────────────────────────────────────────────────

    #[test]
    fn test_format_duration_below_a_minute_shows_seconds_only() {
        assert_eq!(format_duration(0), "0s");
        assert_eq!(format_duration(59), "59s");
    }

    #[test]
    fn test_format_duration_shows_minutes_and_seconds() {
        assert_eq!(format_duration(60), "1m 0s");
        assert_eq!(format_duration(299), "4m 59s");
    }

    #[test]
    fn test_status_line_layout() {
        let snapshot = StatusSnapshot {
            stage: "Waiting for host approval...".into(),
            elapsed_secs: 75,
            remaining_secs: 225,
            is_warning: false,
        };
        assert_eq!(
            snapshot.status_line(),
            "Waiting for host approval... - Elapsed: 1m 15s - Time remaining: 3m 45s"
        );
    }

    // ── Countdown ─────────────────────────────────────────────────────────────

    #[test]
    fn test_countdown_start_is_a_plain_update() {
        let mut countdown = Countdown::new(JOIN_TIMEOUT);

        let events = countdown.evaluate("Connecting", Duration::ZERO);

        assert_eq!(
            events,
            vec![StatusEvent::Update(StatusSnapshot {
                stage: "Connecting".into(),
                elapsed_secs: 0,
                remaining_secs: 300,
                is_warning: false,
            })]
        );
    }

    #[test]
    fn test_countdown_warns_once_at_thirty_and_once_at_ten() {
        // Arrange
        let mut countdown = Countdown::new(JOIN_TIMEOUT);
        let warnings = |events: Vec<StatusEvent>| {
            events
                .into_iter()
                .filter(|e| matches!(e, StatusEvent::Warning(_)))
                .collect::<Vec<_>>()
        };

        // Act
        let at_270 = warnings(countdown.evaluate("s", Duration::from_secs(270)));
        let at_271 = warnings(countdown.evaluate("s", Duration::from_secs(271)));
        let at_290 = warnings(countdown.evaluate("s", Duration::from_secs(290)));
        let at_295 = warnings(countdown.evaluate("s", Duration::from_secs(295)));

        // Assert
        assert_eq!(at_270, vec![StatusEvent::Warning(30)]);
        assert!(at_271.is_empty());
        assert_eq!(at_290, vec![StatusEvent::Warning(10)]);
        assert!(at_295.is_empty());
    }

    #[test]
    fn test_countdown_jumping_past_thirty_only_gives_final_warning() {
        let mut countdown = Countdown::new(JOIN_TIMEOUT);

        let first = countdown.evaluate("s", Duration::from_secs(295));
        let second = countdown.evaluate("s", Duration::from_secs(296));

        assert_eq!(first[0], StatusEvent::Warning(10));
        assert!(!second.iter().any(|e| matches!(e, StatusEvent::Warning(_))));
    }

    #[test]
    fn test_countdown_flags_warning_at_thirty_seconds_remaining() {
        let mut countdown = Countdown::new(JOIN_TIMEOUT);

        let events = countdown.evaluate("s", Duration::from_secs(270));

        let Some(StatusEvent::Update(snapshot)) = events.last() else {
            panic!("expected an update, got {events:?}");
        };
        assert!(snapshot.is_warning);
        assert_eq!(snapshot.remaining_secs, 30);
    }

    #[test]
    fn test_countdown_expires_exactly_once() {
        // Arrange
        let mut countdown = Countdown::new(Duration::from_secs(5));

        // Act
        let at_end = countdown.evaluate("s", Duration::from_secs(5));
        let later = countdown.evaluate("s", Duration::from_secs(6));

        // Assert
        assert_eq!(at_end.last(), Some(&StatusEvent::TimedOut));
        assert!(!at_end.iter().any(|e| matches!(e, StatusEvent::Update(_))));
        assert!(later.is_empty());
        assert!(countdown.is_expired());
    }

    // ── Tracker ───────────────────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn test_tracker_emits_initial_update_immediately() {
        // Arrange / Act
        let (_tracker, mut events) = ConnectionStatusTracker::start(StatusTrackerConfig::default());

        // Assert
        match events.recv().await {
            Some(StatusEvent::Update(snapshot)) => {
                assert_eq!(snapshot.stage, INITIAL_STAGE);
                assert_eq!(snapshot.remaining_secs, 300);
            }
            other => panic!("expected initial update, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_tracker_set_stage_updates_label() {
        // Arrange
        let (tracker, mut events) = ConnectionStatusTracker::start(StatusTrackerConfig::default());
        let _initial = events.recv().await;

        // Act
        tracker.set_stage("Verifying PIN...");

        // Assert
        match events.recv().await {
            Some(StatusEvent::Update(snapshot)) => assert_eq!(snapshot.stage, "Verifying PIN..."),
            other => panic!("expected stage update, got {other:?}"),
        }
        assert_eq!(tracker.stage(), "Verifying PIN...");
    }

    #[tokio::test(start_paused = true)]
    async fn test_tracker_times_out_and_stops_itself() {
        // Arrange
        let config = StatusTrackerConfig {
            timeout: Duration::from_secs(3),
            tick: TICK,
        };
        let (tracker, mut events) = ConnectionStatusTracker::start(config);

        // Act
        let mut seen = Vec::new();
        while let Some(event) = events.recv().await {
            seen.push(event);
        }

        // Assert
        assert_eq!(seen.last(), Some(&StatusEvent::TimedOut));
        assert_eq!(
            seen.iter().filter(|e| matches!(e, StatusEvent::Warning(10))).count(),
            1
        );
        assert!(!tracker.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_tracker_stop_is_idempotent_and_silences_events() {
        // Arrange
        let (mut tracker, mut events) = ConnectionStatusTracker::start(StatusTrackerConfig::default());
        let _initial = events.recv().await;

        // Act
        tracker.stop();
        tracker.stop();
        tokio::time::advance(Duration::from_secs(10)).await;

        // Assert
        assert!(!tracker.is_running());
        assert_eq!(events.recv().await, None);
    }
}
