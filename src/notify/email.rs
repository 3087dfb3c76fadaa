//! SMTP transport, configured from the settings row on every send so
//! credential changes apply without a restart.

use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use log::debug;

use crate::shared::models::SystemSettings;

pub fn send(settings: &SystemSettings, to: &str, subject: &str, html: &str) -> anyhow::Result<()> {
    let message = Message::builder()
        .from(settings.smtp_from.parse()?)
        .to(to.parse()?)
        .subject(subject)
        .header(ContentType::TEXT_HTML)
        .body(html.to_string())?;

    let mailer = build_mailer(settings)?;
    mailer.send(&message)?;
    debug!("sent email to {to}: {subject}");
    Ok(())
}

fn build_mailer(settings: &SystemSettings) -> anyhow::Result<SmtpTransport> {
    let port = u16::try_from(settings.smtp_port).unwrap_or(587);
    if settings.smtp_username.is_empty() {
        // Local relay without auth, used in development.
        Ok(SmtpTransport::builder_dangerous(&settings.smtp_host)
            .port(port)
            .build())
    } else {
        Ok(SmtpTransport::relay(&settings.smtp_host)?
            .port(port)
            .credentials(Credentials::new(
                settings.smtp_username.clone(),
                settings.smtp_password.clone(),
            ))
            .build())
    }
}
