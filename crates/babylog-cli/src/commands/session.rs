use babylog_core::{Config, FinalizeError, Side, SqliteFeedingLog};
use clap::Subcommand;
use serde_json::json;

use super::{open_manager, print_json, CliResult};

#[derive(Subcommand)]
pub enum SessionAction {
    /// Start or resume a side (creates the session if needed)
    Start {
        /// left or right
        side: Side,
    },
    /// Pause one side, or every running side when omitted
    Pause {
        side: Option<Side>,
    },
    /// Pause the other side and start this one
    Switch {
        side: Side,
    },
    /// Print the active session with live durations
    Status,
    /// Validate, stop and record the session
    Finish {
        /// Replace the session notes
        #[arg(long)]
        notes: Option<String>,
    },
    /// Discard the active session without recording it
    Cancel,
    /// List every active session
    List,
}

pub fn run(entity: &str, action: SessionAction) -> CliResult {
    let config = Config::load_or_default();
    let mut manager = open_manager(&config)?;

    match action {
        SessionAction::Start { side } => {
            let event = manager.start_side(entity, side);
            print_json(&json!({
                "event": event,
                "session": manager.get_active_session(entity),
            }))?;
        }
        SessionAction::Pause { side } => {
            let events = match side {
                Some(side) => manager.pause_side(entity, side)?.into_iter().collect(),
                None => manager.pause_all(entity)?,
            };
            print_json(&events)?;
        }
        SessionAction::Switch { side } => {
            let events = manager.switch_side(entity, side)?;
            print_json(&events)?;
        }
        SessionAction::Status => {
            let Some(session) = manager.get_active_session(entity) else {
                return Err(format!("no active session for {entity}").into());
            };
            let now = manager.now();
            let timers = manager.timer(entity).map(|timer| timer.snapshot(now));
            print_json(&json!({
                "session": session,
                "timers": timers,
                "validation": manager.validate_session(entity),
            }))?;
        }
        SessionAction::Finish { notes } => {
            let mut log = SqliteFeedingLog::open_default()?;
            match manager.finalize_into(entity, notes.as_deref(), &mut log) {
                Ok((id, completed)) => {
                    print_json(&json!({ "id": id, "session": completed }))?;
                }
                Err(FinalizeError::Rejected(report)) => {
                    print_json(&report)?;
                    manager.cleanup()?;
                    return Err(format!("session for {entity} was not saved").into());
                }
                Err(e @ FinalizeError::Record(_)) => {
                    manager.cleanup()?;
                    return Err(format!("session for {entity} is still active: {e}").into());
                }
            }
        }
        SessionAction::Cancel => {
            if !manager.remove_active_session(entity) {
                return Err(format!("no active session for {entity}").into());
            }
            print_json(&json!({ "type": "session_cancelled", "entity_id": entity }))?;
        }
        SessionAction::List => {
            print_json(&manager.active_sessions())?;
        }
    }

    manager.cleanup()?;
    Ok(())
}
