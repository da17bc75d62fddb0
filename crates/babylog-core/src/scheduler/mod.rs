//! Background scheduler.
//!
//! Two periodic activities over the session manager:
//!
//! - **duration tick**: report running sides whose displayed second changed;
//! - **persistence tick**: write the full session map.
//!
//! The scheduler never counts ticks. Every value comes from the timers, which
//! derive elapsed time from wall-clock timestamps, so a host that throttled or
//! froze the ticks while suspended reads correct values on the next call.
//! The caller (see [`runner`]) decides when ticks fire.

pub mod runner;

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};

use crate::clock::Clock;
use crate::events::Event;
use crate::session::SessionManager;
use crate::storage::{KvStore, TimerConfig};
use crate::timer::Side;

#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerConfig {
    pub tick_interval: Duration,
    pub persist_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::from(&TimerConfig::default())
    }
}

impl From<&TimerConfig> for SchedulerConfig {
    fn from(cfg: &TimerConfig) -> Self {
        Self {
            tick_interval: interval_ms(cfg.tick_interval_ms),
            persist_interval: interval_ms(cfg.persist_interval_ms),
        }
    }
}

fn interval_ms(ms: u64) -> Duration {
    Duration::milliseconds(i64::try_from(ms.max(1)).unwrap_or(i64::MAX))
}

#[derive(Debug)]
pub struct BackgroundScheduler {
    config: SchedulerConfig,
    running: bool,
    last_persist: Option<DateTime<Utc>>,
    /// Last value reported per running side.
    displayed: HashMap<(String, Side), u64>,
    suspended_at: Option<DateTime<Utc>>,
}

impl BackgroundScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            running: false,
            last_persist: None,
            displayed: HashMap::new(),
            suspended_at: None,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended_at.is_some()
    }

    /// Start when sessions exist, stop when none remain.
    pub fn sync_lifecycle<S: KvStore, C: Clock>(
        &mut self,
        manager: &SessionManager<S, C>,
    ) -> Option<Event> {
        let at = manager.now();
        match (self.running, manager.has_active_sessions()) {
            (false, true) => {
                self.running = true;
                self.last_persist = Some(at);
                tracing::debug!("Background scheduler started");
                Some(Event::SchedulerStarted { at })
            }
            (true, false) => {
                self.running = false;
                self.displayed.clear();
                tracing::debug!("Background scheduler stopped");
                Some(Event::SchedulerStopped { at })
            }
            _ => None,
        }
    }

    /// Duration tick: changed displayed values of running sides.
    pub fn tick_durations<S: KvStore, C: Clock>(
        &mut self,
        manager: &mut SessionManager<S, C>,
    ) -> Vec<Event> {
        if !self.running || self.is_suspended() {
            return Vec::new();
        }
        let at = manager.now();
        let running = manager.refresh_durations();

        let mut events = Vec::new();
        let mut seen = HashMap::with_capacity(running.len());
        for (entity_id, side, elapsed_secs) in running {
            let key = (entity_id, side);
            if self.displayed.get(&key) != Some(&elapsed_secs) {
                events.push(Event::DurationChanged {
                    entity_id: key.0.clone(),
                    side,
                    elapsed_secs,
                    at,
                });
            }
            seen.insert(key, elapsed_secs);
        }
        self.displayed = seen;
        events
    }

    /// Persistence tick: write the full map. Each write is a complete
    /// snapshot, so a tick never needs to wait for an earlier one.
    pub fn tick_persist<S: KvStore, C: Clock>(
        &mut self,
        manager: &mut SessionManager<S, C>,
    ) -> Option<Event> {
        if !self.running || self.is_suspended() {
            return None;
        }
        Some(self.flush(manager))
    }

    /// Run whatever is due at the manager's current time: lifecycle, the
    /// duration tick, and the persistence tick once its interval has passed.
    pub fn poll<S: KvStore, C: Clock>(&mut self, manager: &mut SessionManager<S, C>) -> Vec<Event> {
        let mut events: Vec<Event> = self.sync_lifecycle(manager).into_iter().collect();
        events.extend(self.tick_durations(manager));

        let now = manager.now();
        let persist_due = self
            .last_persist
            .map_or(true, |last| now - last >= self.config.persist_interval);
        if persist_due {
            events.extend(self.tick_persist(manager));
        }
        events
    }

    /// Host is about to be suspended: flush while we still can.
    pub fn on_suspend<S: KvStore, C: Clock>(&mut self, manager: &mut SessionManager<S, C>) -> Vec<Event> {
        if self.is_suspended() {
            return Vec::new();
        }
        let events = if self.running {
            vec![self.flush(manager)]
        } else {
            Vec::new()
        };
        self.suspended_at = Some(manager.now());
        tracing::debug!("Host suspended");
        events
    }

    /// Host is back. Elapsed values are recomputed from wall-clock timestamps
    /// and every running side is reported again.
    pub fn on_resume<S: KvStore, C: Clock>(&mut self, manager: &mut SessionManager<S, C>) -> Vec<Event> {
        let Some(since) = self.suspended_at.take() else {
            return Vec::new();
        };
        let at = manager.now();
        let suspended_secs = (at - since).num_seconds().max(0) as u64;
        tracing::info!("Host resumed after {suspended_secs}s");

        let mut events = vec![Event::Resumed { suspended_secs, at }];
        events.extend(self.sync_lifecycle(manager));
        self.displayed.clear();
        events.extend(self.tick_durations(manager));
        events.extend(self.tick_persist(manager));
        events
    }

    /// Final flush, then stop.
    pub fn shutdown<S: KvStore, C: Clock>(&mut self, manager: &mut SessionManager<S, C>) -> Vec<Event> {
        let at = manager.now();
        let mut events = Vec::new();
        match manager.cleanup() {
            Ok(count) => events.push(Event::SessionsPersisted { count, at }),
            Err(e) => events.push(Event::PersistFailed {
                reason: e.to_string(),
                at,
            }),
        }
        if self.running {
            self.running = false;
            events.push(Event::SchedulerStopped { at });
        }
        self.displayed.clear();
        self.suspended_at = None;
        events
    }

    fn flush<S: KvStore, C: Clock>(&mut self, manager: &mut SessionManager<S, C>) -> Event {
        let at = manager.now();
        self.last_persist = Some(at);
        match manager.persist() {
            Ok(count) => Event::SessionsPersisted { count, at },
            Err(e) => Event::PersistFailed {
                reason: e.to_string(),
                at,
            },
        }
    }
}

impl Default for BackgroundScheduler {
    fn default() -> Self {
        Self::new(SchedulerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::storage::MemoryKvStore;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap()
    }

    fn setup() -> (
        SessionManager<MemoryKvStore, ManualClock>,
        ManualClock,
        BackgroundScheduler,
    ) {
        let clock = ManualClock::new(t0());
        let mgr = SessionManager::with_defaults(MemoryKvStore::new(), clock.clone());
        (mgr, clock, BackgroundScheduler::default())
    }

    fn durations(events: &[Event]) -> Vec<u64> {
        events
            .iter()
            .filter_map(|e| match e {
                Event::DurationChanged { elapsed_secs, .. } => Some(*elapsed_secs),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn interval_config_is_clamped() {
        let cfg = SchedulerConfig::from(&TimerConfig {
            tick_interval_ms: 0,
            persist_interval_ms: u64::MAX,
        });
        assert_eq!(cfg.tick_interval, Duration::milliseconds(1));
        assert_eq!(cfg.persist_interval, Duration::milliseconds(i64::MAX));
    }

    #[test]
    fn idle_scheduler_does_nothing() {
        let (mut mgr, _, mut sched) = setup();
        assert!(sched.poll(&mut mgr).is_empty());
        assert!(!sched.is_running());
    }

    #[test]
    fn starts_with_first_session_and_stops_with_last() {
        let (mut mgr, clock, mut sched) = setup();
        mgr.start_side("baby", Side::Left);
        let events = sched.poll(&mut mgr);
        assert!(matches!(events[0], Event::SchedulerStarted { .. }));
        assert!(sched.is_running());

        clock.advance_secs(30);
        mgr.finalize_session("baby", None).unwrap();
        let events = sched.poll(&mut mgr);
        assert!(matches!(events[0], Event::SchedulerStopped { .. }));
        assert!(!sched.is_running());
    }

    #[test]
    fn duration_tick_only_reports_changes() {
        let (mut mgr, clock, mut sched) = setup();
        mgr.start_side("baby", Side::Left);
        sched.poll(&mut mgr);

        clock.advance(Duration::milliseconds(1_000));
        assert_eq!(durations(&sched.tick_durations(&mut mgr)), vec![1]);
        clock.advance(Duration::milliseconds(400));
        assert!(sched.tick_durations(&mut mgr).is_empty());
        clock.advance(Duration::milliseconds(600));
        assert_eq!(durations(&sched.tick_durations(&mut mgr)), vec![2]);
    }

    #[test]
    fn paused_side_is_not_reported() {
        let (mut mgr, clock, mut sched) = setup();
        mgr.start_side("baby", Side::Left);
        sched.poll(&mut mgr);
        clock.advance_secs(3);
        mgr.pause_side("baby", Side::Left).unwrap();
        clock.advance_secs(3);
        assert!(sched.tick_durations(&mut mgr).is_empty());
    }

    #[test]
    fn persistence_tick_waits_for_interval() {
        let (mut mgr, clock, mut sched) = setup();
        mgr.start_side("baby", Side::Left);
        sched.poll(&mut mgr);

        clock.advance_secs(2);
        let events = sched.poll(&mut mgr);
        assert!(!events.iter().any(|e| matches!(e, Event::SessionsPersisted { .. })));

        clock.advance_secs(3);
        let events = sched.poll(&mut mgr);
        assert!(events
            .iter()
            .any(|e| matches!(e, Event::SessionsPersisted { count: 1, .. })));
    }

    #[test]
    fn resume_recomputes_from_wall_clock() {
        let (mut mgr, clock, mut sched) = setup();
        mgr.start_side("baby", Side::Right);
        sched.poll(&mut mgr);
        clock.advance_secs(2);
        sched.tick_durations(&mut mgr);

        let suspend = sched.on_suspend(&mut mgr);
        assert!(matches!(suspend[0], Event::SessionsPersisted { .. }));
        // No ticks are delivered while suspended.
        clock.advance_secs(600);
        assert!(sched.tick_durations(&mut mgr).is_empty());

        let events = sched.on_resume(&mut mgr);
        assert!(matches!(events[0], Event::Resumed { suspended_secs: 600, .. }));
        assert_eq!(durations(&events), vec![602]);
        assert_eq!(mgr.get_active_session("baby").unwrap().right_duration, 602);
    }

    #[test]
    fn shutdown_flushes_once() {
        let (mut mgr, clock, mut sched) = setup();
        mgr.start_side("baby", Side::Left);
        sched.poll(&mut mgr);
        clock.advance_secs(7);
        let events = sched.shutdown(&mut mgr);
        assert!(matches!(events[0], Event::SessionsPersisted { count: 1, .. }));
        assert!(matches!(events[1], Event::SchedulerStopped { .. }));
        assert!(!sched.is_running());
    }
}
