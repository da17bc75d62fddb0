//! Async driver for [`BackgroundScheduler`].
//!
//! Ticks on a tokio interval and reacts to host lifecycle signals. The
//! interval only decides *when* to look; values always come from the clock,
//! so skipped or delayed ticks cost nothing but display latency.

use std::time::Duration as StdDuration;

use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};

use super::BackgroundScheduler;
use crate::clock::Clock;
use crate::events::Event;
use crate::session::SessionManager;
use crate::storage::KvStore;

/// Lifecycle notifications from the host process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostSignal {
    Suspend,
    Resume,
    Shutdown,
}

/// Why [`run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunExit {
    /// A shutdown signal arrived or every sender was dropped.
    Shutdown,
    /// No active sessions remain.
    Idle,
}

/// Drive the scheduler until shutdown or until no sessions remain. Both exits
/// perform a final flush.
pub async fn run<S, C, F>(
    manager: &mut SessionManager<S, C>,
    scheduler: &mut BackgroundScheduler,
    signals: &mut mpsc::UnboundedReceiver<HostSignal>,
    mut on_event: F,
) -> RunExit
where
    S: KvStore,
    C: Clock,
    F: FnMut(&Event),
{
    let period = scheduler
        .config()
        .tick_interval
        .to_std()
        .unwrap_or(StdDuration::from_secs(1));
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut emit = |events: Vec<Event>| events.iter().for_each(&mut on_event);

    loop {
        tokio::select! {
            biased;

            signal = signals.recv() => match signal {
                Some(HostSignal::Suspend) => emit(scheduler.on_suspend(manager)),
                Some(HostSignal::Resume) => emit(scheduler.on_resume(manager)),
                Some(HostSignal::Shutdown) | None => {
                    emit(scheduler.shutdown(manager));
                    return RunExit::Shutdown;
                }
            },

            _ = ticker.tick() => {
                if scheduler.is_suspended() {
                    continue;
                }
                emit(scheduler.poll(manager));
                if !scheduler.is_running() {
                    emit(scheduler.shutdown(manager));
                    return RunExit::Idle;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::storage::{MemoryKvStore, SESSIONS_KEY};
    use crate::timer::Side;
    use chrono::{TimeZone, Utc};
    use tokio::time::sleep;

    fn manager() -> (SessionManager<MemoryKvStore, ManualClock>, ManualClock) {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap());
        (
            SessionManager::with_defaults(MemoryKvStore::new(), clock.clone()),
            clock,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn exits_idle_without_sessions() {
        let (mut mgr, _) = manager();
        let mut sched = BackgroundScheduler::default();
        let (_tx, mut rx) = mpsc::unbounded_channel();

        let exit = run(&mut mgr, &mut sched, &mut rx, |_| {}).await;
        assert_eq!(exit, RunExit::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_signal_flushes_sessions() {
        let (mut mgr, clock) = manager();
        mgr.start_side("baby", Side::Left);
        let mut sched = BackgroundScheduler::default();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut events = Vec::new();

        let sender = async {
            sleep(StdDuration::from_secs(3)).await;
            clock.advance_secs(3);
            tx.send(HostSignal::Shutdown).unwrap();
        };
        let (exit, ()) = tokio::join!(
            run(&mut mgr, &mut sched, &mut rx, |e| events.push(e.clone())),
            sender
        );

        assert_eq!(exit, RunExit::Shutdown);
        assert!(matches!(events[0], Event::SchedulerStarted { .. }));
        assert!(events
            .iter()
            .any(|e| matches!(e, Event::DurationChanged { elapsed_secs: 0, .. })));
        assert!(matches!(
            events[events.len() - 2],
            Event::SessionsPersisted { count: 1, .. }
        ));
        assert!(mgr.store().contains(SESSIONS_KEY));
        assert_eq!(mgr.get_active_session("baby").unwrap().left_duration, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn suspend_and_resume_are_reported() {
        let (mut mgr, clock) = manager();
        mgr.start_side("baby", Side::Right);
        let mut sched = BackgroundScheduler::default();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut events = Vec::new();

        let host_clock = clock.clone();
        let sender = async move {
            sleep(StdDuration::from_secs(1)).await;
            tx.send(HostSignal::Suspend).unwrap();
            sleep(StdDuration::from_secs(1)).await;
            host_clock.advance_secs(60);
            tx.send(HostSignal::Resume).unwrap();
            sleep(StdDuration::from_secs(1)).await;
            drop(tx);
        };
        let (exit, ()) = tokio::join!(
            run(&mut mgr, &mut sched, &mut rx, |e| events.push(e.clone())),
            sender
        );

        assert_eq!(exit, RunExit::Shutdown);
        assert!(events
            .iter()
            .any(|e| matches!(e, Event::Resumed { suspended_secs: 60, .. })));
        assert!(events
            .iter()
            .any(|e| matches!(e, Event::DurationChanged { elapsed_secs: 60, .. })));
    }
}
