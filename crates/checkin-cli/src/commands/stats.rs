use checkin_core::{AchievementRule, RollupPeriod};
use clap::ValueEnum;
use serde::Serialize;
use serde_json::json;

use crate::context::{open_session, report_events, CliResult};

#[derive(Clone, Copy, ValueEnum)]
pub enum Period {
    Day,
    Week,
    Month,
    Year,
}

impl From<Period> for RollupPeriod {
    fn from(period: Period) -> Self {
        match period {
            Period::Day => RollupPeriod::Day,
            Period::Week => RollupPeriod::Week,
            Period::Month => RollupPeriod::Month,
            Period::Year => RollupPeriod::Year,
        }
    }
}

pub async fn streak(user: &str) -> CliResult {
    let (_ctx, session) = open_session(user).await?;
    let summary = session.streak().await;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    report_events(&session);
    Ok(())
}

pub async fn calendar(user: &str, period: Period, rolling: bool) -> CliResult {
    let (_ctx, session) = open_session(user).await?;
    let summary = if rolling {
        session.rollup(period.into()).await
    } else {
        session.calendar(period.into()).await
    };
    let out = json!({
        "summary": summary,
        "completion_rate": summary.completion_rate(),
    });
    println!("{}", serde_json::to_string_pretty(&out)?);
    report_events(&session);
    Ok(())
}

pub async fn breakdown(user: &str, period: Period) -> CliResult {
    let (_ctx, session) = open_session(user).await?;
    let parts = session.breakdown(period.into()).await;
    let out: Vec<_> = parts
        .iter()
        .map(|part| {
            json!({
                "summary": part,
                "completion_rate": part.completion_rate(),
            })
        })
        .collect();
    println!("{}", serde_json::to_string_pretty(&out)?);
    report_events(&session);
    Ok(())
}

pub async fn history(user: &str, days: u32) -> CliResult {
    let (_ctx, session) = open_session(user).await?;
    let window = session.engine().history(days).await?;
    let records: Vec<_> = window.iter_desc().collect();
    println!("{}", serde_json::to_string_pretty(&records)?);
    report_events(&session);
    Ok(())
}

#[derive(Serialize)]
struct AchievementRow<'a> {
    #[serde(flatten)]
    rule: &'a AchievementRule,
    unlocked: bool,
}

pub async fn achievements(user: &str) -> CliResult {
    let (ctx, session) = open_session(user).await?;
    let ledger = session.ledger();
    let rows: Vec<_> = ctx
        .config
        .achievements
        .iter()
        .map(|rule| AchievementRow {
            rule,
            unlocked: ledger.contains(&rule.id),
        })
        .collect();
    println!("{}", serde_json::to_string_pretty(&rows)?);
    report_events(&session);
    Ok(())
}
