use chrono::{DateTime, Duration, Utc};
use cron::Schedule;
use std::sync::{Arc, Mutex};
use tokio::time::{sleep, Duration as TokioDuration};

use crate::services::notifier::{broadcast, Notifier};
use crate::services::reporter::ReportService;
use crate::utils::config::SchedulerConfig;

/// A slot older than this when first noticed is not run (service was down)
const CATCH_UP_MINUTES: i64 = 10;

pub struct ReportScheduler {
    reports: Arc<ReportService>,
    notifiers: Vec<Arc<dyn Notifier>>,
    usernames: Vec<String>,
    config: SchedulerConfig,
    check_interval_seconds: u64,
    last_slot: Mutex<Option<DateTime<Utc>>>,
}

impl ReportScheduler {
    pub fn new(
        reports: Arc<ReportService>,
        notifiers: Vec<Arc<dyn Notifier>>,
        usernames: Vec<String>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            reports,
            notifiers,
            usernames,
            config,
            check_interval_seconds: 60,
            last_slot: Mutex::new(None),
        }
    }

    /// Start the background scheduler
    pub async fn start(self: Arc<Self>) {
        log::info!(
            "⏰ Starting report scheduler: '{}' (UTC) for {} user(s) (checking every {} seconds)",
            self.config.cron,
            self.usernames.len(),
            self.check_interval_seconds
        );

        loop {
            if let Some(slot) = self.claim_slot(Utc::now()) {
                self.run_scheduled_reports(slot).await;
            }

            sleep(TokioDuration::from_secs(self.check_interval_seconds)).await;
        }
    }

    /// Returns the slot to run at `now`, at most once per slot
    fn claim_slot(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut last = self.last_slot.lock().unwrap_or_else(|e| e.into_inner());

        let horizon = now - Duration::minutes(CATCH_UP_MINUTES);
        let from = match *last {
            Some(claimed) if claimed > horizon => claimed,
            _ => horizon,
        };

        let slot = next_slot(&self.config.schedule, from).filter(|slot| *slot <= now)?;
        *last = Some(slot);
        Some(slot)
    }

    async fn run_scheduled_reports(&self, slot: DateTime<Utc>) {
        log::info!("🗓️ Running scheduled reports for slot {}", slot.to_rfc3339());
        let (since, until) = self.reports.default_window(slot);

        for (username, outcome) in self.reports.generate_all(&self.usernames, since, until).await {
            match outcome {
                Ok(report) => {
                    let failures = broadcast(&self.notifiers, &report.content).await;
                    if failures > 0 {
                        log::warn!("⚠️ {} notification(s) failed for {}", failures, username);
                    }
                }
                Err(e) => log::error!("❌ Scheduled report for {} failed: {}", username, e),
            }
        }
    }
}

/// First fire time strictly after `from`
pub fn next_slot(schedule: &Schedule, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
    schedule.after(&from).next()
}
