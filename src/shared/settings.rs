//! Single-row system settings: transport credentials, enable flags, and the
//! daily-report schedule. The row is seeded from the environment on first
//! boot and mutated only through the super_admin settings API.

use chrono::Utc;
use diesel::prelude::*;

use crate::config::AppConfig;
use crate::shared::error::ApiError;
use crate::shared::models::SystemSettings;
use crate::shared::schema::system_settings;

pub fn load_settings(conn: &mut PgConnection) -> Result<SystemSettings, ApiError> {
    system_settings::table
        .filter(system_settings::id.eq(SystemSettings::ROW_ID))
        .first(conn)
        .map_err(|_| ApiError::Unexpected("system settings row missing".to_string()))
}

/// Seed the settings row from environment defaults if it does not exist yet.
pub fn ensure_settings(
    conn: &mut PgConnection,
    config: &AppConfig,
) -> Result<SystemSettings, ApiError> {
    if let Ok(existing) = system_settings::table
        .filter(system_settings::id.eq(SystemSettings::ROW_ID))
        .first::<SystemSettings>(conn)
    {
        return Ok(existing);
    }

    let row = SystemSettings {
        id: SystemSettings::ROW_ID,
        email_enabled: !config.email.smtp_host.is_empty(),
        smtp_host: config.email.smtp_host.clone(),
        smtp_port: i32::from(config.email.smtp_port),
        smtp_username: config.email.username.clone(),
        smtp_password: config.email.password.clone(),
        smtp_from: config.email.from.clone(),
        sms_enabled: !config.sms.api_url.is_empty(),
        sms_api_url: config.sms.api_url.clone(),
        sms_api_key: config.sms.api_key.clone(),
        sms_from: config.sms.from.clone(),
        attachments_enabled: false,
        daily_reports_enabled: true,
        report_hour: config.report.hour as i32,
        report_minute: config.report.minute as i32,
        report_timezone: config.report.timezone.clone(),
        report_last_fire: None,
        updated_at: Utc::now(),
    };

    diesel::insert_into(system_settings::table)
        .values(&row)
        .execute(conn)?;
    Ok(row)
}

pub fn record_report_fire(
    conn: &mut PgConnection,
    fired_at: chrono::DateTime<Utc>,
) -> Result<(), ApiError> {
    diesel::update(
        system_settings::table.filter(system_settings::id.eq(SystemSettings::ROW_ID)),
    )
    .set((
        system_settings::report_last_fire.eq(Some(fired_at)),
        system_settings::updated_at.eq(Utc::now()),
    ))
    .execute(conn)?;
    Ok(())
}
