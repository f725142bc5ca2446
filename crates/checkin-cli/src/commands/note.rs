use clap::Subcommand;
use serde_json::json;

use crate::context::{open_session, report_events, CliResult};

#[derive(Subcommand)]
pub enum NoteAction {
    /// Print today's note for a task
    Get {
        task: String,
    },
    /// Replace today's note for a task; empty text clears it
    Set {
        task: String,
        text: String,
    },
}

pub async fn run(user: &str, action: NoteAction) -> CliResult {
    let (_ctx, session) = open_session(user).await?;
    let out = match action {
        NoteAction::Get { task } => {
            let note = session.engine().note(&task).await?;
            json!({ "task": task, "note": note })
        }
        NoteAction::Set { task, text } => {
            let outcome = session.set_note(&task, &text).await;
            report_events(&session);
            json!({ "task": task, "outcome": outcome? })
        }
    };
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}
