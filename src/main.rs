use std::sync::Arc;

use crate::config::{Mode, Settings};
use crate::db::{init_db, Database};
use crate::mailer::{BrevoMailer, LogNotifier, Notifier};
use crate::scheduler::Scheduler;
use crate::shutdown::Shutdown;

mod config;
mod db;
mod domain;
mod fetchers;
mod mailer;
mod report;
mod scheduler;
mod shutdown;

#[cfg(test)]
mod tests;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let settings = Settings::from_env();

    // Config problems are the only thing allowed to stop the process.
    let cfg = match config::load_config(&settings.config_path) {
        Ok(c) => c,
        Err(e) => {
            log::error!("{e}");
            std::process::exit(1);
        }
    };

    let db = Database::new(settings.db_path.clone());
    if let Err(e) = init_db(&db) {
        log::error!("Database initialization failed: {e}");
        std::process::exit(1);
    }

    let shutdown = Shutdown::new();
    {
        let shutdown = Arc::clone(&shutdown);
        if let Err(e) = ctrlc::set_handler(move || {
            log::info!("Shutdown requested; finishing in-flight commits");
            shutdown.trigger();
        }) {
            log::warn!("Failed to install ctrl-c handler: {e}");
        }
    }

    let notifier: Arc<dyn Notifier> =
        if settings.brevo_api_key.is_empty() || settings.email_from.is_empty() {
            log::warn!(
                "Email not fully configured (BREVO_API_KEY/EMAIL_FROM); changes will only be logged"
            );
            Arc::new(LogNotifier)
        } else {
            Arc::new(BrevoMailer::new(
                settings.brevo_api_key.clone(),
                settings.email_from.clone(),
                settings.email_from_name.clone(),
                settings.global_recipients.clone(),
            ))
        };

    let mode = settings.mode;
    let scheduler = Scheduler::new(db, settings, notifier, shutdown);
    match mode {
        Mode::Daemon => scheduler.run_daemon(cfg.wishlists),
        Mode::Once => scheduler.run_once(cfg.wishlists),
    }

    log::info!("Watcher shut down cleanly.");
}
