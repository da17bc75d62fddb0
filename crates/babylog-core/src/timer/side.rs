//! Single-side timer.
//!
//! The timer is a wall-clock-based state machine. It keeps no thread and never
//! counts ticks: elapsed time is always derived from the recorded start instant
//! and the accumulated pause time, so a host that froze or throttled its timers
//! reads the right value as soon as it asks again.
//!
//! ## State Transitions
//!
//! ```text
//! Stopped -> Running -> Paused -> Running -> ... -> Stopped
//! ```
//!
//! Out-of-sequence calls are ignored and return `None`.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::events::Event;

/// One of the two independently timed quantities in a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub const BOTH: [Side; 2] = [Side::Left, Side::Right];

    pub fn as_str(self) -> &'static str {
        match self {
            Side::Left => "left",
            Side::Right => "right",
        }
    }

    pub fn other(self) -> Side {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Side {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "left" => Ok(Side::Left),
            "right" => Ok(Side::Right),
            other => Err(format!("unknown side: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimerPhase {
    Stopped,
    Running,
    Paused,
}

/// Point-in-time view of one side, for display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SideSnapshot {
    pub side: Side,
    pub phase: TimerPhase,
    pub elapsed_secs: u64,
}

/// Timer for one side.
#[derive(Debug, Clone)]
pub struct SideTimer {
    side: Side,
    is_active: bool,
    is_paused: bool,
    start_time: Option<DateTime<Utc>>,
    /// Total paused time since `start_time`, in milliseconds. Never negative.
    paused_ms: i64,
    /// Only set while paused.
    last_pause_start: Option<DateTime<Utc>>,
    /// Seconds recorded by an earlier process for this side.
    carried_secs: u64,
    /// Value reported while stopped.
    last_elapsed_secs: u64,
}

impl SideTimer {
    pub fn new(side: Side) -> Self {
        Self {
            side,
            is_active: false,
            is_paused: false,
            start_time: None,
            paused_ms: 0,
            last_pause_start: None,
            carried_secs: 0,
            last_elapsed_secs: 0,
        }
    }

    /// A stopped timer that already holds `secs` from a persisted session.
    /// Starting it continues from that value.
    pub fn restored(side: Side, secs: u64) -> Self {
        Self {
            carried_secs: secs,
            last_elapsed_secs: secs,
            ..Self::new(side)
        }
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn phase(&self) -> TimerPhase {
        match (self.is_active, self.is_paused) {
            (false, _) => TimerPhase::Stopped,
            (true, true) => TimerPhase::Paused,
            (true, false) => TimerPhase::Running,
        }
    }

    pub fn is_running(&self) -> bool {
        self.phase() == TimerPhase::Running
    }

    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.start_time
    }

    /// Whole seconds of active time.
    ///
    /// Running: derived from `now`. Paused: frozen at the pause instant.
    /// Stopped: the last computed value. Never negative, even when `now` is
    /// earlier than the recorded start.
    pub fn elapsed(&self, now: DateTime<Utc>) -> u64 {
        match self.phase() {
            TimerPhase::Stopped => self.last_elapsed_secs,
            TimerPhase::Paused => self.active_secs_at(self.last_pause_start.unwrap_or(now)),
            TimerPhase::Running => self.active_secs_at(now),
        }
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> SideSnapshot {
        SideSnapshot {
            side: self.side,
            phase: self.phase(),
            elapsed_secs: self.elapsed(now),
        }
    }

    // ── Commands ─────────────────────────────────────────────────────

    pub fn start(&mut self, now: DateTime<Utc>) -> Option<Event> {
        match self.phase() {
            TimerPhase::Stopped => {
                self.is_active = true;
                self.is_paused = false;
                self.start_time = Some(now);
                self.paused_ms = 0;
                self.last_pause_start = None;
                Some(Event::SideStarted {
                    side: self.side,
                    at: now,
                })
            }
            TimerPhase::Paused => {
                if let Some(paused_at) = self.last_pause_start.take() {
                    let pause_ms = (now - paused_at).num_milliseconds().max(0);
                    self.paused_ms = self.paused_ms.saturating_add(pause_ms);
                }
                self.is_paused = false;
                Some(Event::SideResumed {
                    side: self.side,
                    elapsed_secs: self.elapsed(now),
                    at: now,
                })
            }
            TimerPhase::Running => None,
        }
    }

    pub fn pause(&mut self, now: DateTime<Utc>) -> Option<Event> {
        if self.phase() != TimerPhase::Running {
            return None;
        }
        // A pause stamped before the start would freeze a negative span.
        let paused_at = self.start_time.map_or(now, |start| now.max(start));
        self.last_elapsed_secs = self.active_secs_at(paused_at);
        self.last_pause_start = Some(paused_at);
        self.is_paused = true;
        Some(Event::SidePaused {
            side: self.side,
            elapsed_secs: self.last_elapsed_secs,
            at: now,
        })
    }

    /// Stop from any state. Returns the final duration and resets the timer;
    /// a later `start` begins again from zero.
    pub fn stop(&mut self, now: DateTime<Utc>) -> u64 {
        let final_secs = self.elapsed(now);
        *self = Self::new(self.side);
        self.last_elapsed_secs = final_secs;
        final_secs
    }

    // ── Internal ─────────────────────────────────────────────────────

    fn active_secs_at(&self, at: DateTime<Utc>) -> u64 {
        let Some(start) = self.start_time else {
            return self.last_elapsed_secs;
        };
        let active_ms = (at - start).num_milliseconds() - self.paused_ms;
        let run_secs = (active_ms.max(0) / 1000) as u64;
        self.carried_secs.saturating_add(run_secs)
    }
}
