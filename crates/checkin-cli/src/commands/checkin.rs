use checkin_core::{DayRecord, ItemKey, Level, TaskCatalog};
use clap::Args;
use serde_json::json;

use crate::context::{open_session, report_events, AppContext, CliResult};

#[derive(Args)]
pub struct LevelArgs {
    /// Task id (e.g. "reading")
    task: String,
    /// Level 0-3
    level: Level,
    /// Activity id for tasks that have activities
    #[arg(long)]
    activity: Option<String>,
}

pub async fn status(user: &str, table: bool) -> CliResult {
    let (_ctx, session) = open_session(user).await?;
    let record = session.engine().snapshot();
    let catalog = session.engine().catalog();

    if table {
        print_table(catalog, &record);
    } else {
        let completed: Vec<&str> = catalog
            .tasks()
            .iter()
            .filter(|t| record.is_task_completed(&t.id))
            .map(|t| t.id.as_str())
            .collect();
        let out = json!({
            "user": user,
            "date": record.date(),
            "status": record.status_for(catalog),
            "notes": record.notes(),
            "total_stars": record.total_stars(),
            "completed": completed,
            "sync": session.engine().status(),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    }
    report_events(&session);
    Ok(())
}

fn stars(level: Level) -> String {
    let filled = usize::from(level);
    format!("{}{}", "★".repeat(filled), "☆".repeat(3usize.saturating_sub(filled)))
}

fn print_table(catalog: &TaskCatalog, record: &DayRecord) {
    println!("{}  ({} stars)", record.date(), record.total_stars());
    for task in catalog.tasks() {
        let mark = if record.is_task_completed(&task.id) { "x" } else { " " };
        if task.is_flat() {
            let item = ItemKey::flat(task.id.as_str());
            let level = record.level_of(&item);
            let label = catalog.level_label(&item, level).unwrap_or("");
            println!("[{mark}] {:<16} {}  {label}", task.display_title(), stars(level));
        } else {
            println!("[{mark}] {}", task.display_title());
            for activity in &task.activities {
                let level = record.level(&task.id, Some(&activity.id));
                let title = activity.title.as_deref().unwrap_or(&activity.id);
                println!("      {title:<14} {}", stars(level));
            }
        }
        if let Some(note) = record.note(&task.id) {
            println!("      note: {note}");
        }
    }
}

pub async fn toggle(user: &str, args: LevelArgs) -> CliResult {
    let (_ctx, session) = open_session(user).await?;
    let result = session
        .toggle_level(&args.task, args.activity.as_deref(), args.level)
        .await;
    report_events(&session);
    println!("{}", serde_json::to_string_pretty(&result?)?);
    Ok(())
}

pub async fn set(user: &str, args: LevelArgs) -> CliResult {
    let (_ctx, session) = open_session(user).await?;
    let result = session
        .apply_level_change(&args.task, args.activity.as_deref(), args.level)
        .await;
    report_events(&session);
    println!("{}", serde_json::to_string_pretty(&result?)?);
    Ok(())
}

/// Drop the local warm-start cache and achievement ledger for `user`.
/// Stored levels are untouched.
pub fn forget(user: &str) -> CliResult {
    let mut ctx = AppContext::load(user)?;
    let removed = ctx.forget(user)?;
    println!("{}", json!({ "user": user, "removed": removed }));
    Ok(())
}
