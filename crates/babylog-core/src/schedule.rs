//! Next-feeding calculation.
//!
//! Pure functions over completed, timestamped events. No clock, no storage.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::session::CompletedSession;

/// Kind of a completed activity record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// Bottle feed (formula or expressed milk).
    Milk,
    /// Breastfeeding session from the dual timer.
    Nursing,
    /// Low-priority feed; counted only when configured.
    Solids,
    Pumping,
    Diaper,
    Sleep,
}

impl EventKind {
    pub const ALL: [EventKind; 6] = [
        EventKind::Milk,
        EventKind::Nursing,
        EventKind::Solids,
        EventKind::Pumping,
        EventKind::Diaper,
        EventKind::Sleep,
    ];

    /// Whether this kind counts toward the feeding interval.
    pub fn is_schedule_relevant(self, include_low_priority: bool) -> bool {
        match self {
            EventKind::Milk | EventKind::Nursing => true,
            EventKind::Solids => include_low_priority,
            EventKind::Pumping | EventKind::Diaper | EventKind::Sleep => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Milk => "milk",
            EventKind::Nursing => "nursing",
            EventKind::Solids => "solids",
            EventKind::Pumping => "pumping",
            EventKind::Diaper => "diaper",
            EventKind::Sleep => "sleep",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown event kind: {s}"))
    }
}

/// A completed, typed, timestamped record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedEvent {
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
}

impl CompletedEvent {
    pub fn new(kind: EventKind, timestamp: DateTime<Utc>) -> Self {
        Self { kind, timestamp }
    }
}

impl From<&CompletedSession> for CompletedEvent {
    /// A nursing session counts from its start.
    fn from(session: &CompletedSession) -> Self {
        Self::new(EventKind::Nursing, session.start_time)
    }
}

/// Time of the next expected feeding: the most recent schedule-relevant event
/// plus `interval_hours`. Events may be in any order.
///
/// Returns `None` when no relevant event exists or the interval is not a
/// finite, non-negative number.
pub fn calculate_next_time(
    events: &[CompletedEvent],
    interval_hours: f64,
    include_low_priority: bool,
) -> Option<DateTime<Utc>> {
    if !interval_hours.is_finite() || interval_hours < 0.0 {
        return None;
    }
    let last = events
        .iter()
        .filter(|e| e.kind.is_schedule_relevant(include_low_priority))
        .map(|e| e.timestamp)
        .max()?;
    let interval = Duration::try_milliseconds((interval_hours * 3_600_000.0).round() as i64)?;
    last.checked_add_signed(interval)
}

/// Per-entity feeding schedule settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedingSchedule {
    #[serde(default = "default_interval_hours")]
    pub interval_hours: f64,
    #[serde(default)]
    pub include_solids: bool,
}

fn default_interval_hours() -> f64 {
    3.0
}

impl Default for FeedingSchedule {
    fn default() -> Self {
        Self {
            interval_hours: default_interval_hours(),
            include_solids: false,
        }
    }
}

impl FeedingSchedule {
    pub fn next_feeding(&self, events: &[CompletedEvent]) -> Option<DateTime<Utc>> {
        calculate_next_time(events, self.interval_hours, self.include_solids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn next_time_is_last_relevant_plus_interval() {
        let events = vec![CompletedEvent::new(EventKind::Milk, t() - Duration::hours(1))];
        assert_eq!(
            calculate_next_time(&events, 3.0, false),
            Some(t() + Duration::hours(2))
        );
    }

    #[test]
    fn low_priority_event_ignored_unless_included() {
        let events = vec![
            CompletedEvent::new(EventKind::Solids, t() - Duration::minutes(10)),
            CompletedEvent::new(EventKind::Milk, t() - Duration::hours(1)),
        ];
        assert_eq!(
            calculate_next_time(&events, 3.0, false),
            Some(t() + Duration::hours(2))
        );
        assert_eq!(
            calculate_next_time(&events, 3.0, true),
            Some(t() - Duration::minutes(10) + Duration::hours(3))
        );
    }

    #[test]
    fn unrelated_kinds_do_not_count() {
        let events = vec![
            CompletedEvent::new(EventKind::Diaper, t()),
            CompletedEvent::new(EventKind::Sleep, t()),
            CompletedEvent::new(EventKind::Pumping, t()),
        ];
        assert_eq!(calculate_next_time(&events, 3.0, true), None);
        assert_eq!(calculate_next_time(&[], 3.0, true), None);
    }

    #[test]
    fn order_of_events_does_not_matter() {
        let older = CompletedEvent::new(EventKind::Nursing, t() - Duration::hours(4));
        let newer = CompletedEvent::new(EventKind::Milk, t() - Duration::hours(1));
        let a = calculate_next_time(&[older.clone(), newer.clone()], 2.5, false);
        let b = calculate_next_time(&[newer, older], 2.5, false);
        assert_eq!(a, b);
        assert_eq!(a, Some(t() + Duration::minutes(90)));
    }

    #[test]
    fn repeated_calls_are_identical() {
        let events = vec![CompletedEvent::new(EventKind::Milk, t())];
        let first = calculate_next_time(&events, 3.0, false);
        let second = calculate_next_time(&events, 3.0, false);
        assert_eq!(first, second);
    }

    #[test]
    fn invalid_interval_yields_none() {
        let events = vec![CompletedEvent::new(EventKind::Milk, t())];
        assert_eq!(calculate_next_time(&events, f64::NAN, false), None);
        assert_eq!(calculate_next_time(&events, -1.0, false), None);
    }

    #[test]
    fn event_kind_parses_from_str() {
        assert_eq!("solids".parse::<EventKind>(), Ok(EventKind::Solids));
        assert!("juice".parse::<EventKind>().is_err());
    }
}
