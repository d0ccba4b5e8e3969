//! Booking confirmation emails.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use lettre::{
    AsyncFileTransport, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{Mailbox, header::ContentType},
    transport::smtp::authentication::Credentials,
};
use std::path::Path;

use crate::config::{EmailConfig, EmailTransportConfig};
use crate::errors::Error;

/// Human-facing time format, e.g. "Tuesday, February 10, 2026 at 10:00 AM".
const HUMAN_TIME_FORMAT: &str = "%A, %B %-d, %Y at %-I:%M %p";

/// Everything needed to tell a user their room is booked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Confirmation {
    pub to_email: String,
    pub to_name: String,
    pub room_name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    /// False for the no-op mailer; callers skip dispatching work to it.
    fn enabled(&self) -> bool {
        true
    }

    async fn send_confirmation(&self, confirmation: &Confirmation) -> Result<(), Error>;
}

/// Used when no `email` section is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledMailer;

#[async_trait]
impl Mailer for DisabledMailer {
    fn enabled(&self) -> bool {
        false
    }

    async fn send_confirmation(&self, _confirmation: &Confirmation) -> Result<(), Error> {
        Ok(())
    }
}

pub struct EmailService {
    transport: EmailTransport,
    from_email: String,
    from_name: String,
    subject: String,
    timezone: Tz,
}

enum EmailTransport {
    Smtp(AsyncSmtpTransport<Tokio1Executor>),
    File(AsyncFileTransport<Tokio1Executor>),
}

impl EmailService {
    /// Build the transport described by `config`. Times in emails are shown in `timezone`.
    pub fn new(config: &EmailConfig, timezone: Tz) -> Result<Self, Error> {
        let transport = match &config.transport {
            EmailTransportConfig::Smtp {
                host,
                port,
                username,
                password,
                use_tls,
            } => {
                if !use_tls {
                    tracing::warn!("SMTP TLS is disabled - this is not recommended for production");
                }

                let smtp_builder = if *use_tls {
                    AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
                } else {
                    Ok(AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host))
                }
                .map_err(|e| Error::Internal {
                    operation: format!("create SMTP transport: {e}"),
                })?
                .port(*port)
                .credentials(Credentials::new(username.clone(), password.clone()));

                EmailTransport::Smtp(smtp_builder.build())
            }
            EmailTransportConfig::File { path } => {
                let emails_dir = Path::new(path);
                if !emails_dir.exists() {
                    std::fs::create_dir_all(emails_dir).map_err(|e| Error::Internal {
                        operation: format!("create emails directory: {e}"),
                    })?;
                }
                EmailTransport::File(AsyncFileTransport::<Tokio1Executor>::new(emails_dir))
            }
        };

        Ok(Self {
            transport,
            from_email: config.from_email.clone(),
            from_name: config.from_name.clone(),
            subject: config.subject.clone(),
            timezone,
        })
    }

    fn format_time(&self, at: DateTime<Utc>) -> String {
        at.with_timezone(&self.timezone).format(HUMAN_TIME_FORMAT).to_string()
    }

    fn create_confirmation_body(&self, confirmation: &Confirmation) -> String {
        let room = &confirmation.room_name;
        let name = &confirmation.to_name;
        let start = self.format_time(confirmation.start_time);
        let end = self.format_time(confirmation.end_time);

        format!(
            r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <title>Meeting Room Confirmation</title>
    <style>
        body {{ font-family: Arial, sans-serif; line-height: 1.6; color: #333; }}
        .container {{ max-width: 600px; margin: 0 auto; padding: 20px; }}
        .booking {{ background: #f5f5f5; padding: 12px 16px; border-radius: 4px; }}
        .footer {{ margin-top: 30px; font-size: 12px; color: #666; }}
    </style>
</head>
<body>
    <div class="container">
        <h2>Your meeting room is booked</h2>

        <p>Hi {name},</p>

        <p>The <strong>{room}</strong> meeting room has been reserved for you.</p>

        <div class="booking">
            <p><strong>From:</strong> {start}</p>
            <p><strong>To:</strong> {end}</p>
        </div>

        <p>If you no longer need the room, please cancel the reservation so others can use it.</p>

        <div class="footer">
            <p>This is an automated message, please do not reply to this email.</p>
        </div>
    </div>
</body>
</html>"#
        )
    }

    async fn send_email(&self, to_email: &str, to_name: &str, body: String) -> Result<(), Error> {
        let from = format!("{} <{}>", self.from_name, self.from_email)
            .parse::<Mailbox>()
            .map_err(|e| Error::Internal {
                operation: format!("parse from email: {e}"),
            })?;

        let to = format!("{to_name} <{to_email}>").parse::<Mailbox>().map_err(|e| Error::Internal {
            operation: format!("parse to email: {e}"),
        })?;

        let message = Message::builder()
            .from(from)
            .to(to)
            .subject(&self.subject)
            .header(ContentType::TEXT_HTML)
            .body(body)
            .map_err(|e| Error::Internal {
                operation: format!("build email message: {e}"),
            })?;

        match &self.transport {
            EmailTransport::Smtp(smtp) => {
                smtp.send(message).await.map_err(|e| Error::Internal {
                    operation: format!("send SMTP email: {e}"),
                })?;
            }
            EmailTransport::File(file) => {
                file.send(message).await.map_err(|e| Error::Internal {
                    operation: format!("send file email: {e}"),
                })?;
            }
        }

        Ok(())
    }
}

#[async_trait]
impl Mailer for EmailService {
    #[tracing::instrument(skip(self, confirmation), fields(room = %confirmation.room_name), err)]
    async fn send_confirmation(&self, confirmation: &Confirmation) -> Result<(), Error> {
        let body = self.create_confirmation_body(confirmation);
        self.send_email(&confirmation.to_email, &confirmation.to_name, body).await
    }
}
