//! System settings API (super_admin only). Saving reschedules the daily
//! report job so schedule changes take effect without a restart.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use diesel::prelude::*;
use serde::Deserialize;

use crate::access::{self, Identity};
use crate::scheduler::TriggerSpec;
use crate::shared::error::ApiError;
use crate::shared::models::SystemSettings;
use crate::shared::schema::system_settings;
use crate::shared::settings::load_settings;
use crate::shared::state::AppState;
use crate::shared::utils::get_conn;

#[derive(Debug, Default, Deserialize)]
pub struct UpdateSystemSettings {
    pub email_enabled: Option<bool>,
    pub smtp_host: Option<String>,
    pub smtp_port: Option<i32>,
    pub smtp_username: Option<String>,
    pub smtp_password: Option<String>,
    pub smtp_from: Option<String>,
    pub sms_enabled: Option<bool>,
    pub sms_api_url: Option<String>,
    pub sms_api_key: Option<String>,
    pub sms_from: Option<String>,
    pub attachments_enabled: Option<bool>,
    pub daily_reports_enabled: Option<bool>,
    pub report_hour: Option<i32>,
    pub report_minute: Option<i32>,
    pub report_timezone: Option<String>,
}

async fn get_settings(
    State(state): State<Arc<AppState>>,
    identity: Identity,
) -> Result<Json<SystemSettings>, ApiError> {
    access::require(identity.is_super_admin(), "read system settings")?;
    let mut conn = get_conn(&state.conn)?;
    Ok(Json(load_settings(&mut conn)?))
}

async fn update_settings(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Json(patch): Json<UpdateSystemSettings>,
) -> Result<Json<SystemSettings>, ApiError> {
    access::require(identity.is_super_admin(), "modify system settings")?;
    if let Some(hour) = patch.report_hour {
        if !(0..=23).contains(&hour) {
            return Err(ApiError::validation("report_hour must be 0-23"));
        }
    }
    if let Some(minute) = patch.report_minute {
        if !(0..=59).contains(&minute) {
            return Err(ApiError::validation("report_minute must be 0-59"));
        }
    }
    if let Some(tz) = patch.report_timezone.as_deref() {
        if tz.parse::<chrono_tz::Tz>().is_err() {
            return Err(ApiError::validation(format!("unknown timezone {tz}")));
        }
    }

    let mut conn = get_conn(&state.conn)?;
    let mut settings = load_settings(&mut conn)?;
    if let Some(v) = patch.email_enabled {
        settings.email_enabled = v;
    }
    if let Some(v) = patch.smtp_host {
        settings.smtp_host = v;
    }
    if let Some(v) = patch.smtp_port {
        settings.smtp_port = v;
    }
    if let Some(v) = patch.smtp_username {
        settings.smtp_username = v;
    }
    if let Some(v) = patch.smtp_password {
        settings.smtp_password = v;
    }
    if let Some(v) = patch.smtp_from {
        settings.smtp_from = v;
    }
    if let Some(v) = patch.sms_enabled {
        settings.sms_enabled = v;
    }
    if let Some(v) = patch.sms_api_url {
        settings.sms_api_url = v;
    }
    if let Some(v) = patch.sms_api_key {
        settings.sms_api_key = v;
    }
    if let Some(v) = patch.sms_from {
        settings.sms_from = v;
    }
    if let Some(v) = patch.attachments_enabled {
        settings.attachments_enabled = v;
    }
    if let Some(v) = patch.daily_reports_enabled {
        settings.daily_reports_enabled = v;
    }
    if let Some(v) = patch.report_hour {
        settings.report_hour = v;
    }
    if let Some(v) = patch.report_minute {
        settings.report_minute = v;
    }
    if let Some(v) = patch.report_timezone {
        settings.report_timezone = v;
    }
    settings.updated_at = Utc::now();

    diesel::update(system_settings::table.filter(system_settings::id.eq(SystemSettings::ROW_ID)))
        .set(&settings)
        .execute(&mut conn)?;

    state
        .scheduler
        .reconfigure(TriggerSpec::from_settings(&settings));
    Ok(Json(settings))
}

/// Compare the live report trigger with persisted settings, repairing the
/// trigger when they disagree.
async fn verify_schedule(
    State(state): State<Arc<AppState>>,
    identity: Identity,
) -> Result<Json<serde_json::Value>, ApiError> {
    access::require(identity.is_super_admin(), "verify the report schedule")?;
    let mut conn = get_conn(&state.conn)?;
    let in_sync = state.scheduler.verify(&mut conn)?;
    Ok(Json(serde_json::json!({ "in_sync": in_sync })))
}

pub fn configure_settings_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/api/settings/system",
            get(get_settings).post(update_settings),
        )
        .route(
            "/api/settings/system/verify-schedule",
            axum::routing::post(verify_schedule),
        )
}
