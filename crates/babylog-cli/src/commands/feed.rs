use babylog_core::{CompletedEvent, Config, EventKind, FeedingLog, SqliteFeedingLog};
use chrono::{DateTime, Utc};
use clap::Subcommand;
use serde_json::json;

use super::{print_json, CliResult};

#[derive(Subcommand)]
pub enum FeedAction {
    /// Record a completed event (milk, nursing, solids, pumping, diaper, sleep)
    Log {
        kind: EventKind,
        /// RFC 3339 timestamp, defaults to now
        #[arg(long)]
        at: Option<DateTime<Utc>>,
    },
    /// Print when the next feeding is expected
    Next {
        /// Override the configured interval
        #[arg(long)]
        interval_hours: Option<f64>,
        /// Count solids toward the schedule
        #[arg(long)]
        include_solids: bool,
    },
    /// List recorded events, most recent first
    History {
        #[arg(long, default_value = "20")]
        limit: usize,
    },
}

pub fn run(entity: &str, action: FeedAction) -> CliResult {
    let mut log = SqliteFeedingLog::open_default()?;

    match action {
        FeedAction::Log { kind, at } => {
            let event = CompletedEvent::new(kind, at.unwrap_or_else(Utc::now));
            let id = log.record_event(entity, &event)?;
            print_json(&json!({ "id": id, "event": event }))?;
        }
        FeedAction::Next {
            interval_hours,
            include_solids,
        } => {
            let mut schedule = Config::load_or_default().schedule;
            if let Some(hours) = interval_hours {
                schedule.interval_hours = hours;
            }
            schedule.include_solids |= include_solids;
            let events = log.events(entity)?;
            print_json(&json!({
                "entity_id": entity,
                "next": schedule.next_feeding(&events),
                "interval_hours": schedule.interval_hours,
            }))?;
        }
        FeedAction::History { limit } => {
            let events = log.events(entity)?;
            print_json(&events.into_iter().take(limit).collect::<Vec<_>>())?;
        }
    }
    Ok(())
}
