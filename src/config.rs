use anyhow::{Context, Result};

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database_url: String,
    pub jwt_secret: String,
    pub email: EmailConfig,
    pub sms: SmsConfig,
    pub report: ReportConfig,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Clone, Debug)]
pub struct EmailConfig {
    pub smtp_host: String,
    pub smtp_port: u16,
    pub username: String,
    pub password: String,
    pub from: String,
}

#[derive(Clone, Debug)]
pub struct SmsConfig {
    pub api_url: String,
    pub api_key: String,
    pub from: String,
}

#[derive(Clone, Debug)]
pub struct ReportConfig {
    pub hour: u32,
    pub minute: u32,
    pub timezone: String,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
        let jwt_secret = std::env::var("JWT_SECRET").context("JWT_SECRET must be set")?;

        Ok(Self {
            server: ServerConfig {
                host: env_or("SERVER_HOST", "0.0.0.0"),
                port: env_or("SERVER_PORT", "8080")
                    .parse()
                    .context("SERVER_PORT must be a port number")?,
            },
            database_url,
            jwt_secret,
            email: EmailConfig {
                smtp_host: env_or("SMTP_HOST", "localhost"),
                smtp_port: env_or("SMTP_PORT", "587")
                    .parse()
                    .context("SMTP_PORT must be a port number")?,
                username: env_or("SMTP_USER", ""),
                password: env_or("SMTP_PASS", ""),
                from: env_or("SMTP_FROM", "noreply@propserver.local"),
            },
            sms: SmsConfig {
                api_url: env_or("SMS_API_URL", ""),
                api_key: env_or("SMS_API_KEY", ""),
                from: env_or("SMS_FROM", ""),
            },
            report: ReportConfig {
                hour: env_or("DAILY_REPORT_HOUR", "18")
                    .parse()
                    .context("DAILY_REPORT_HOUR must be 0-23")?,
                minute: env_or("DAILY_REPORT_MINUTE", "0")
                    .parse()
                    .context("DAILY_REPORT_MINUTE must be 0-59")?,
                timezone: env_or("DAILY_REPORT_TIMEZONE", "America/New_York"),
            },
        })
    }
}
