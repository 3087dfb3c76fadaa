//! Cron-style scheduler owning the daily report job.
//!
//! The trigger lives in a watch channel; reconfiguration swaps the whole
//! spec atomically, so the loop either sees the old trigger or the new one,
//! never a mix. A persisted last-fire timestamp gives the job a misfire
//! grace window across restarts.

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use diesel::PgConnection;
use log::{error, info, warn};
use std::str::FromStr;
use tokio::sync::watch;

use crate::notify::Notifier;
use crate::reports;
use crate::shared::error::ApiError;
use crate::shared::models::SystemSettings;
use crate::shared::settings::{load_settings, record_report_fire};
use crate::shared::utils::DbPool;

fn misfire_grace() -> Duration {
    Duration::hours(1)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerSpec {
    pub enabled: bool,
    pub hour: u32,
    pub minute: u32,
    pub timezone: String,
}

impl TriggerSpec {
    pub fn from_settings(settings: &SystemSettings) -> Self {
        Self {
            enabled: settings.daily_reports_enabled,
            hour: settings.report_hour.clamp(0, 23) as u32,
            minute: settings.report_minute.clamp(0, 59) as u32,
            timezone: settings.report_timezone.clone(),
        }
    }

    fn tz(&self) -> Tz {
        self.timezone.parse().unwrap_or_else(|_| {
            warn!("invalid timezone {:?}, scheduling in UTC", self.timezone);
            Tz::UTC
        })
    }

    fn cron_expr(&self) -> String {
        format!("0 {} {} * * *", self.minute, self.hour)
    }

    /// Next fire strictly after `after`.
    pub fn next_fire(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let schedule = Schedule::from_str(&self.cron_expr()).ok()?;
        schedule
            .after(&after.with_timezone(&self.tz()))
            .next()
            .map(|dt| dt.with_timezone(&Utc))
    }

    /// Most recent fire at or before `before`.
    pub fn previous_fire(&self, before: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let tz = self.tz();
        let local = before.with_timezone(&tz);
        let candidate = tz
            .from_local_datetime(
                &local
                    .date_naive()
                    .and_hms_opt(self.hour, self.minute, 0)?,
            )
            .earliest()?
            .with_timezone(&Utc);
        if candidate <= before {
            Some(candidate)
        } else {
            Some(candidate - Duration::days(1))
        }
    }
}

pub struct ReportScheduler {
    pool: DbPool,
    notifier: Notifier,
    tx: watch::Sender<TriggerSpec>,
}

impl ReportScheduler {
    pub fn new(pool: DbPool, notifier: Notifier, initial: TriggerSpec) -> Arc<Self> {
        let (tx, _) = watch::channel(initial);
        Arc::new(Self { pool, notifier, tx })
    }

    pub fn current(&self) -> TriggerSpec {
        self.tx.borrow().clone()
    }

    /// Atomically replace the trigger. The running loop picks the new spec
    /// up at its next suspension point; a partially-applied trigger is not
    /// observable.
    pub fn reconfigure(&self, spec: TriggerSpec) {
        if spec != self.current() {
            info!(
                "daily report trigger now {}:{:02} {} (enabled: {})",
                spec.hour, spec.minute, spec.timezone, spec.enabled
            );
            self.tx.send_replace(spec);
        }
    }

    /// Check the registered trigger against persisted settings; repair
    /// drift by reapplying the persisted spec. Returns true when they
    /// already matched.
    pub fn verify(&self, conn: &mut PgConnection) -> Result<bool, ApiError> {
        let persisted = TriggerSpec::from_settings(&load_settings(conn)?);
        if persisted == self.current() {
            Ok(true)
        } else {
            warn!("daily report trigger drifted from settings, repairing");
            self.reconfigure(persisted);
            Ok(false)
        }
    }

    /// Spawn the scheduler loop. Call once at startup.
    pub fn start(self: &Arc<Self>) {
        let this = self.clone();
        tokio::spawn(async move {
            this.check_misfire();
            this.run_loop().await;
        });
    }

    /// Run the job once if the process slept through the last scheduled
    /// instant but woke within the grace window.
    fn check_misfire(&self) {
        let spec = self.current();
        if !spec.enabled {
            return;
        }
        let now = Utc::now();
        let Some(previous) = spec.previous_fire(now) else {
            return;
        };
        if now - previous > misfire_grace() {
            return;
        }
        let last_fire = self
            .pool
            .get()
            .ok()
            .and_then(|mut conn| load_settings(&mut conn).ok())
            .and_then(|s| s.report_last_fire);
        if last_fire.map_or(true, |lf| lf < previous) {
            info!("running missed daily report from {previous}");
            self.fire();
        }
    }

    async fn run_loop(self: Arc<Self>) {
        let mut rx = self.tx.subscribe();
        loop {
            let spec = rx.borrow_and_update().clone();
            if !spec.enabled {
                if rx.changed().await.is_err() {
                    break;
                }
                continue;
            }
            let Some(next) = spec.next_fire(Utc::now()) else {
                if rx.changed().await.is_err() {
                    break;
                }
                continue;
            };
            let wait = (next - Utc::now()).to_std().unwrap_or_default();
            tokio::select! {
                _ = tokio::time::sleep(wait) => self.fire(),
                changed = rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
    }

    fn fire(&self) {
        let fired_at = Utc::now();
        match reports::run_daily_reports(&self.pool, &self.notifier) {
            Ok(sent) => {
                if let Ok(mut conn) = self.pool.get() {
                    if let Err(e) = record_report_fire(&mut conn, fired_at) {
                        error!("failed to persist report fire time: {e}");
                    }
                }
                info!("daily report job fired, {sent} digests queued");
            }
            Err(e) => error!("daily report job failed: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    fn spec(hour: u32, minute: u32, tz: &str) -> TriggerSpec {
        TriggerSpec {
            enabled: true,
            hour,
            minute,
            timezone: tz.to_string(),
        }
    }

    #[test]
    fn test_next_fire_lands_on_configured_local_time() {
        let s = spec(18, 0, "America/New_York");
        let next = s.next_fire(Utc::now()).unwrap();
        let local = next.with_timezone(&"America/New_York".parse::<Tz>().unwrap());
        assert_eq!(local.hour(), 18);
        assert_eq!(local.minute(), 0);
        assert!(next > Utc::now() - Duration::seconds(1));
    }

    #[test]
    fn test_previous_fire_is_at_most_a_day_back() {
        let s = spec(6, 30, "UTC");
        let now = Utc::now();
        let previous = s.previous_fire(now).unwrap();
        assert!(previous <= now);
        assert!(now - previous <= Duration::days(1));
        assert_eq!(previous.hour(), 6);
        assert_eq!(previous.minute(), 30);
    }

    #[test]
    fn test_identical_spec_round_trips_next_fire() {
        // Disabling and re-enabling with identical settings yields the same
        // next fire instant.
        let now = Utc::now();
        let a = spec(18, 0, "America/New_York");
        let b = spec(18, 0, "America/New_York");
        assert_eq!(a.next_fire(now), b.next_fire(now));
    }

    #[test]
    fn test_invalid_timezone_falls_back_to_utc() {
        let s = spec(12, 0, "Mars/Olympus");
        assert!(s.next_fire(Utc::now()).is_some());
    }
}
