//! Wiring shared by every command that touches a user's day.

use std::sync::Arc;

use checkin_core::storage::{CompletionDb, Config, LocalCache};
use checkin_core::sync::HttpRemote;
use checkin_core::{
    validate_user_id, Event, SessionManager, SessionSettings, SystemClock, UserSession,
};
use tracing::debug;

pub type CliResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

pub struct AppContext {
    pub config: Config,
    manager: SessionManager,
}

impl AppContext {
    /// Build a session manager from the config file: the HTTP remote when
    /// `remote.base_url` is set, the local SQLite store otherwise.
    pub fn load(user: &str) -> CliResult<Self> {
        validate_user_id(user)?;
        let config = Config::load_or_default();
        let settings = SessionSettings::from_config(&config)?;
        let catalog = config.catalog();
        let clock = Arc::new(SystemClock);
        let cache = Arc::new(LocalCache::open()?);

        let manager = match &config.remote.base_url {
            Some(url) => {
                debug!(url = %url, "using remote completion store");
                let remote = Arc::new(HttpRemote::new(url, config.request_timeout())?);
                SessionManager::new(remote.clone(), catalog, clock, settings)
                    .with_catalog_source(remote)
            }
            None => {
                let db = Arc::new(CompletionDb::open()?);
                let today = settings.zone.today(&SystemClock);
                let created = db.ensure_today_rows(user, today, &catalog)?;
                debug!(created, "using local completion store");
                SessionManager::new(db, catalog, clock, settings)
            }
        };

        Ok(Self {
            config,
            manager: manager.with_cache(cache),
        })
    }

    pub async fn session(&mut self, user: &str) -> CliResult<Arc<UserSession>> {
        let session = self.manager.switch_to(user).await?;
        Ok(session)
    }

    pub fn forget(&mut self, user: &str) -> CliResult<usize> {
        Ok(self.manager.forget(user)?)
    }
}

/// Open `user`'s session in one step.
pub async fn open_session(user: &str) -> CliResult<(AppContext, Arc<UserSession>)> {
    let mut ctx = AppContext::load(user)?;
    let session = ctx.session(user).await?;
    Ok((ctx, session))
}

/// Print the notices worth a human's attention to stderr.
pub fn report_events(session: &UserSession) {
    for event in session.engine().drain_events() {
        match event {
            Event::AchievementUnlocked { title, .. } => eprintln!("achievement unlocked: {title}"),
            Event::LevelReverted { task, reason, .. } => {
                eprintln!("{task}: change rolled back ({reason})")
            }
            Event::Reconciled { degraded: true, .. } => {
                eprintln!("remote unreachable, showing cached state")
            }
            other => debug!(event = ?other, "event"),
        }
    }
}
