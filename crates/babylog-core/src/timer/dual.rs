//! Left/right session coordinator.
//!
//! Both sides run independently and may run at the same time; starting one
//! never pauses the other.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::side::{Side, SideSnapshot, SideTimer};
use crate::error::ValidationError;
use crate::events::Event;
use crate::session::CompletedSession;

/// Which sides contributed time. Derived, never stored on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    Left,
    Right,
    Both,
}

impl Classification {
    /// Classify a pair of durations. Zero on both sides is an error: such a
    /// session cannot be labelled or saved.
    pub fn from_durations(left_secs: u64, right_secs: u64) -> Result<Self, ValidationError> {
        match (left_secs > 0, right_secs > 0) {
            (true, true) => Ok(Classification::Both),
            (true, false) => Ok(Classification::Left),
            (false, true) => Ok(Classification::Right),
            (false, false) => Err(ValidationError::NothingRecorded),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Classification::Left => "left",
            Classification::Right => "right",
            Classification::Both => "both",
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Classification {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "left" => Ok(Classification::Left),
            "right" => Ok(Classification::Right),
            "both" => Ok(Classification::Both),
            other => Err(format!("unknown classification: {other}")),
        }
    }
}

/// Thresholds for session warnings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationLimits {
    #[serde(default = "default_side_warning_secs")]
    pub side_warning_secs: u64,
    #[serde(default = "default_total_warning_secs")]
    pub total_warning_secs: u64,
    #[serde(default = "default_stale_start_hours")]
    pub stale_start_hours: u64,
}

fn default_side_warning_secs() -> u64 {
    3600
}
fn default_total_warning_secs() -> u64 {
    7200
}
fn default_stale_start_hours() -> u64 {
    24
}

impl Default for ValidationLimits {
    fn default() -> Self {
        Self {
            side_warning_secs: default_side_warning_secs(),
            total_warning_secs: default_total_warning_secs(),
            stale_start_hours: default_stale_start_hours(),
        }
    }
}

/// Outcome of validating a session before it is finalized.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn rejected(error: ValidationError) -> Self {
        Self {
            is_valid: false,
            errors: vec![error.to_string()],
            warnings: Vec::new(),
        }
    }

    fn error(&mut self, error: ValidationError) {
        self.errors.push(error.to_string());
    }

    fn seal(mut self) -> Self {
        self.is_valid = self.errors.is_empty();
        self
    }
}

/// Check a pair of durations and an optional start time.
///
/// The start-time rule compares `start_time + left + right` against `now`.
pub fn validate(
    left_secs: i64,
    right_secs: i64,
    start_time: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    limits: &ValidationLimits,
) -> ValidationReport {
    let mut report = check_durations(left_secs, right_secs, limits);
    if let Some(start) = start_time {
        let total = left_secs.max(0).saturating_add(right_secs.max(0));
        check_window(&mut report, start, total, now, limits);
    }
    report.seal()
}

fn check_durations(left_secs: i64, right_secs: i64, limits: &ValidationLimits) -> ValidationReport {
    let mut report = ValidationReport::default();

    if left_secs == 0 && right_secs == 0 {
        report.error(ValidationError::NothingRecorded);
    }
    for (side, secs) in [(Side::Left, left_secs), (Side::Right, right_secs)] {
        if secs < 0 {
            report.error(ValidationError::NegativeDuration {
                side: side.to_string(),
            });
        } else if secs as u64 > limits.side_warning_secs {
            report.warnings.push(format!(
                "{side} duration over {} minutes",
                limits.side_warning_secs / 60
            ));
        }
    }
    let total = left_secs.max(0).saturating_add(right_secs.max(0));
    if total as u64 > limits.total_warning_secs {
        report.warnings.push(format!(
            "total duration over {} minutes",
            limits.total_warning_secs / 60
        ));
    }
    report
}

fn check_window(
    report: &mut ValidationReport,
    start: DateTime<Utc>,
    span_secs: i64,
    now: DateTime<Utc>,
    limits: &ValidationLimits,
) {
    // An end instant past the representable range is in the future too.
    let end = Duration::try_seconds(span_secs).and_then(|span| start.checked_add_signed(span));
    if start > now {
        report.error(ValidationError::StartInFuture);
    } else if end.map_or(true, |end| end > now) {
        report.error(ValidationError::EndsInFuture);
    }
    let stale_after = i64::try_from(limits.stale_start_hours)
        .ok()
        .and_then(Duration::try_hours);
    if stale_after.is_some_and(|limit| now - start > limit) {
        report.warnings.push(format!(
            "start time more than {} hours ago",
            limits.stale_start_hours
        ));
    }
}

fn saturating_i64(secs: u64) -> i64 {
    i64::try_from(secs).unwrap_or(i64::MAX)
}

/// Owns the left and right timers of one session.
#[derive(Debug, Clone)]
pub struct DualTimer {
    left: SideTimer,
    right: SideTimer,
    current_side: Option<Side>,
    session_start: Option<DateTime<Utc>>,
    /// Wall-clock time during which at least one side was running, excluding
    /// the stretch still open at `span_since`.
    span_ms: i64,
    span_since: Option<DateTime<Utc>>,
}

impl Default for DualTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl DualTimer {
    pub fn new() -> Self {
        Self {
            left: SideTimer::new(Side::Left),
            right: SideTimer::new(Side::Right),
            current_side: None,
            session_start: None,
            span_ms: 0,
            span_since: None,
        }
    }

    /// Rebuild a session from persisted durations. When `running_since` is
    /// given, `current_side` resumes from that instant.
    pub fn restored(
        session_start: DateTime<Utc>,
        left_secs: u64,
        right_secs: u64,
        current_side: Side,
        running_since: Option<DateTime<Utc>>,
    ) -> Self {
        let mut timer = Self {
            left: SideTimer::restored(Side::Left, left_secs),
            right: SideTimer::restored(Side::Right, right_secs),
            current_side: Some(current_side),
            session_start: Some(session_start),
            // Overlap between the sides is unknown; the longer side is a
            // lower bound on the wall time they covered.
            span_ms: saturating_i64(left_secs.max(right_secs)).saturating_mul(1000),
            span_since: None,
        };
        if let Some(since) = running_since {
            timer.start(current_side, since);
        }
        timer
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn side(&self, side: Side) -> &SideTimer {
        match side {
            Side::Left => &self.left,
            Side::Right => &self.right,
        }
    }

    pub fn current_side(&self) -> Option<Side> {
        self.current_side
    }

    pub fn session_start(&self) -> Option<DateTime<Utc>> {
        self.session_start
    }

    pub fn elapsed(&self, side: Side, now: DateTime<Utc>) -> u64 {
        self.side(side).elapsed(now)
    }

    pub fn total(&self, now: DateTime<Utc>) -> u64 {
        self.left.elapsed(now) + self.right.elapsed(now)
    }

    pub fn is_running(&self, side: Side) -> bool {
        self.side(side).is_running()
    }

    pub fn any_running(&self) -> bool {
        self.left.is_running() || self.right.is_running()
    }

    pub fn running_sides(&self) -> impl Iterator<Item = Side> + '_ {
        Side::BOTH.into_iter().filter(|s| self.is_running(*s))
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> [SideSnapshot; 2] {
        [self.left.snapshot(now), self.right.snapshot(now)]
    }

    pub fn classification(&self, now: DateTime<Utc>) -> Result<Classification, ValidationError> {
        Classification::from_durations(self.left.elapsed(now), self.right.elapsed(now))
    }

    /// Seconds of wall time during which at least one side ran.
    pub fn span_secs(&self, now: DateTime<Utc>) -> i64 {
        let open = self
            .span_since
            .map(|since| (now - since).num_milliseconds().max(0))
            .unwrap_or(0);
        self.span_ms.saturating_add(open) / 1000
    }

    /// Validate the live durations. Because the sides may overlap, the
    /// end-time rule uses the wall-clock span instead of the summed total.
    pub fn validate(&self, now: DateTime<Utc>, limits: &ValidationLimits) -> ValidationReport {
        let left = saturating_i64(self.left.elapsed(now));
        let right = saturating_i64(self.right.elapsed(now));
        let mut report = check_durations(left, right, limits);
        if let Some(start) = self.session_start {
            check_window(&mut report, start, self.span_secs(now), now, limits);
        }
        report.seal()
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Start or resume one side. The other side is left as it is.
    pub fn start(&mut self, side: Side, now: DateTime<Utc>) -> Option<Event> {
        let was_running = self.any_running();
        let event = self.side_mut(side).start(now)?;
        if !was_running {
            self.span_since = Some(now);
        }
        self.session_start.get_or_insert(now);
        self.current_side = Some(side);
        Some(event)
    }

    pub fn pause(&mut self, side: Side, now: DateTime<Utc>) -> Option<Event> {
        let event = self.side_mut(side).pause(now)?;
        self.close_span_if_idle(now);
        Some(event)
    }

    /// Pause the other side and start `side`.
    pub fn switch_to(&mut self, side: Side, now: DateTime<Utc>) -> Vec<Event> {
        let mut events = Vec::new();
        events.extend(self.pause(side.other(), now));
        events.extend(self.start(side, now));
        events
    }

    /// Stop both sides and return their final durations.
    pub fn stop_all(&mut self, now: DateTime<Utc>) -> (u64, u64) {
        let left = self.left.stop(now);
        let right = self.right.stop(now);
        self.close_span_if_idle(now);
        (left, right)
    }

    /// Validate and stop the session, producing the record handed to external
    /// storage. On rejection nothing is changed.
    pub fn finalize(
        &mut self,
        notes: &str,
        now: DateTime<Utc>,
        limits: &ValidationLimits,
    ) -> Result<CompletedSession, ValidationReport> {
        let report = self.validate(now, limits);
        if !report.is_valid {
            return Err(report);
        }
        let breast_used = self
            .classification(now)
            .map_err(ValidationReport::rejected)?;
        let start_time = self.session_start.unwrap_or(now);
        let (left, right) = self.stop_all(now);
        Ok(CompletedSession {
            start_time,
            end_time: now,
            left_duration: left,
            right_duration: right,
            total_duration: left.saturating_add(right),
            breast_used,
            notes: notes.to_string(),
        })
    }

    // ── Internal ─────────────────────────────────────────────────────

    fn side_mut(&mut self, side: Side) -> &mut SideTimer {
        match side {
            Side::Left => &mut self.left,
            Side::Right => &mut self.right,
        }
    }

    fn close_span_if_idle(&mut self, now: DateTime<Utc>) {
        if self.any_running() {
            return;
        }
        if let Some(since) = self.span_since.take() {
            self.span_ms += (now - since).num_milliseconds().max(0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap()
    }

    fn secs(n: i64) -> DateTime<Utc> {
        t0() + Duration::seconds(n)
    }

    #[test]
    fn both_sides_run_concurrently() {
        let mut timer = DualTimer::new();
        timer.start(Side::Left, secs(0));
        timer.start(Side::Right, secs(10));
        assert!(timer.is_running(Side::Left));
        assert!(timer.is_running(Side::Right));
        assert_eq!(timer.elapsed(Side::Left, secs(30)), 30);
        assert_eq!(timer.elapsed(Side::Right, secs(30)), 20);
        assert_eq!(timer.current_side(), Some(Side::Right));
    }

    #[test]
    fn left_only_session_is_valid_to_save() {
        let mut timer = DualTimer::new();
        timer.start(Side::Left, secs(0));
        timer.pause(Side::Left, secs(30));
        assert_eq!(timer.elapsed(Side::Left, secs(30)), 30);

        let report = timer.validate(secs(30), &ValidationLimits::default());
        assert!(report.is_valid, "{:?}", report.errors);
        assert!(report.warnings.is_empty());
        assert_eq!(timer.classification(secs(30)), Ok(Classification::Left));
    }

    #[test]
    fn immediate_finalize_is_rejected() {
        let mut timer = DualTimer::new();
        timer.start(Side::Left, secs(0));
        timer.start(Side::Right, secs(0));

        let err = timer
            .finalize("", secs(0), &ValidationLimits::default())
            .unwrap_err();
        assert!(!err.is_valid);
        assert_eq!(err.errors, vec!["at least one timer must have recorded time"]);
        // Rejection leaves the timers running.
        assert!(timer.is_running(Side::Left));
    }

    #[test]
    fn finalize_emits_completed_payload() {
        let mut timer = DualTimer::new();
        timer.start(Side::Left, secs(0));
        timer.switch_to(Side::Right, secs(300));
        let done = timer
            .finalize("fussy", secs(480), &ValidationLimits::default())
            .unwrap();

        assert_eq!(done.start_time, secs(0));
        assert_eq!(done.end_time, secs(480));
        assert_eq!(done.left_duration, 300);
        assert_eq!(done.right_duration, 180);
        assert_eq!(done.total_duration, 480);
        assert_eq!(done.breast_used, Classification::Both);
        assert_eq!(done.notes, "fussy");
        assert!(!timer.any_running());
    }

    #[test]
    fn concurrent_sides_pass_the_end_time_rule() {
        let mut timer = DualTimer::new();
        timer.start(Side::Left, secs(0));
        timer.start(Side::Right, secs(0));
        // Summed total is 1200s but only 600s of wall time passed.
        let report = timer.validate(secs(600), &ValidationLimits::default());
        assert!(report.is_valid, "{:?}", report.errors);
        assert_eq!(timer.span_secs(secs(600)), 600);
    }

    #[test]
    fn validate_rejects_both_zero() {
        let report = validate(0, 0, None, t0(), &ValidationLimits::default());
        assert!(!report.is_valid);
        assert_eq!(report.errors, vec!["at least one timer must have recorded time"]);
    }

    #[test]
    fn validate_rejects_negative() {
        let report = validate(-5, 10, None, t0(), &ValidationLimits::default());
        assert!(!report.is_valid);
        assert_eq!(report.errors, vec!["left duration cannot be negative"]);
    }

    #[test]
    fn validate_warns_on_long_side() {
        let report = validate(4000, 0, None, t0(), &ValidationLimits::default());
        assert!(report.is_valid);
        assert!(report
            .warnings
            .contains(&"left duration over 60 minutes".to_string()));
    }

    #[test]
    fn validate_warns_on_long_total() {
        let report = validate(3600, 3601, None, t0(), &ValidationLimits::default());
        assert!(report.is_valid);
        assert_eq!(
            report.warnings,
            vec![
                "right duration over 60 minutes".to_string(),
                "total duration over 120 minutes".to_string()
            ]
        );
    }

    #[test]
    fn validate_checks_start_time() {
        let limits = ValidationLimits::default();
        let future = validate(10, 0, Some(secs(60)), secs(0), &limits);
        assert_eq!(future.errors, vec!["start time cannot be in the future"]);

        let overrun = validate(100, 0, Some(secs(0)), secs(50), &limits);
        assert_eq!(overrun.errors, vec!["session duration extends past the current time"]);

        let stale = validate(100, 0, Some(secs(0)), secs(25 * 3600), &limits);
        assert!(stale.is_valid);
        assert_eq!(stale.warnings, vec!["start time more than 24 hours ago"]);
    }

    #[test]
    fn validate_handles_out_of_range_values() {
        let limits = ValidationLimits {
            stale_start_hours: u64::MAX,
            ..ValidationLimits::default()
        };
        let report = validate(i64::MAX, i64::MAX, Some(secs(0)), secs(60), &limits);
        assert!(!report.is_valid);
        assert_eq!(report.errors, vec!["session duration extends past the current time"]);
        assert!(!report.warnings.iter().any(|w| w.starts_with("start time")));

        let timer = DualTimer::restored(secs(0), u64::MAX, 0, Side::Left, None);
        let report = timer.validate(secs(60), &ValidationLimits::default());
        assert!(!report.is_valid);
    }

    #[test]
    fn restored_timer_resumes_current_side() {
        let timer = DualTimer::restored(secs(0), 100, 40, Side::Right, Some(secs(200)));
        assert!(timer.is_running(Side::Right));
        assert!(!timer.is_running(Side::Left));
        assert_eq!(timer.elapsed(Side::Left, secs(260)), 100);
        assert_eq!(timer.elapsed(Side::Right, secs(260)), 100);
    }

    proptest! {
        #[test]
        fn classification_is_total(l in 0u64..100_000, r in 0u64..100_000) {
            match Classification::from_durations(l, r) {
                Ok(Classification::Left) => prop_assert!(l > 0 && r == 0),
                Ok(Classification::Right) => prop_assert!(l == 0 && r > 0),
                Ok(Classification::Both) => prop_assert!(l > 0 && r > 0),
                Err(e) => {
                    prop_assert!(l == 0 && r == 0);
                    prop_assert_eq!(e, ValidationError::NothingRecorded);
                }
            }
        }
    }
}
