use crate::config::EmailConfig;
use crate::error::app_error::AppError;
use async_trait::async_trait;
use chrono::Duration;
use lettre::message::header::ContentType;
use lettre::message::{MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};

/// Delivers account unlock links.
#[async_trait]
pub trait UnlockMailer: Send + Sync {
    async fn send_unlock_email(&self, to_email: &str, unlock_link: &str) -> Result<(), AppError>;
}

/// Human wording for a link lifetime: "1 hour", "45 minutes", "2 days".
pub(crate) fn describe_expiry(ttl: Duration) -> String {
    let minutes = ttl.num_minutes().max(1);
    let (count, unit) = if minutes % (24 * 60) == 0 {
        (minutes / (24 * 60), "day")
    } else if minutes % 60 == 0 {
        (minutes / 60, "hour")
    } else {
        (minutes, "minute")
    };

    if count == 1 { format!("1 {}", unit) } else { format!("{} {}s", count, unit) }
}

pub struct EmailService {
    config: EmailConfig,
    link_expiry: String,
}

impl EmailService {
    pub fn new(config: EmailConfig, link_ttl: Duration) -> Self {
        Self {
            config,
            link_expiry: describe_expiry(link_ttl),
        }
    }

    fn generate_unlock_email_html(&self, unlock_link: &str) -> String {
        format!(
            r##"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Unlock your SalesPulse account</title>
    <style>
        body {{ margin: 0; padding: 0; background-color: #F5F7FA; font-family: Inter, -apple-system, 'Segoe UI', Roboto, Arial, sans-serif; color: #1A1D21; }}
        .card {{ max-width: 560px; margin: 32px auto; background: #FFFFFF; border: 1px solid #E3E6EA; border-radius: 12px; padding: 28px 24px; }}
        .title {{ margin: 0 0 12px; font-size: 24px; }}
        .body-text {{ margin: 0 0 14px; font-size: 15px; line-height: 1.6; }}
        .button {{ display: inline-block; background: #2563EB; color: #FFFFFF !important; text-decoration: none; font-weight: 700; border-radius: 8px; padding: 12px 20px; }}
        .link-box {{ margin: 18px 0 0; padding: 10px 12px; background: #F1F3F5; border-radius: 8px; font-size: 12px; word-break: break-all; color: #5C5F66; }}
        .footer {{ margin-top: 20px; font-size: 12px; color: #5C5F66; }}
    </style>
</head>
<body>
    <div class="card">
        <h1 class="title">Your account is temporarily locked</h1>
        <p class="body-text">We locked your SalesPulse account after several failed sign-in attempts.</p>
        <p class="body-text">If these attempts were yours, unlock the account now. The link expires in {}.</p>
        <p><a href="{}" class="button">Unlock my account</a></p>
        <p class="link-box">{}</p>
        <p class="footer">If you did not try to sign in, someone may be guessing your password. Consider changing it after you unlock the account.</p>
    </div>
</body>
</html>
"##,
            self.link_expiry, unlock_link, unlock_link
        )
    }

    fn generate_unlock_email_text(&self, unlock_link: &str) -> String {
        format!(
            r#"SalesPulse | Account locked

We locked your SalesPulse account after several failed sign-in attempts.

If these attempts were yours, unlock the account with the link below. It expires in {}.
{}

If you did not try to sign in, someone may be guessing your password. Consider changing it after you unlock the account.

SalesPulse Security
"#,
            self.link_expiry, unlock_link
        )
    }

    async fn send_email(&self, to_email: &str, subject: &str, html_body: &str, text_body: &str) -> Result<(), AppError> {
        let email = Message::builder()
            .from(
                format!("{} <{}>", self.config.from_name, self.config.from_address)
                    .parse()
                    .map_err(|e| AppError::email(format!("Invalid from address: {}", e)))?,
            )
            .to(to_email.parse().map_err(|e| AppError::email(format!("Invalid to address: {}", e)))?)
            .subject(subject)
            .multipart(
                MultiPart::alternative()
                    .singlepart(SinglePart::builder().header(ContentType::TEXT_PLAIN).body(text_body.to_string()))
                    .singlepart(SinglePart::builder().header(ContentType::TEXT_HTML).body(html_body.to_string())),
            )
            .map_err(|e| AppError::email(format!("Failed to build email: {}", e)))?;

        let creds = Credentials::new(self.config.smtp_username.clone(), self.config.smtp_password.clone());

        let mailer = SmtpTransport::relay(&self.config.smtp_host)
            .map_err(|e| AppError::email(format!("Failed to create SMTP transport: {}", e)))?
            .credentials(creds)
            .port(self.config.smtp_port)
            .build();

        // SmtpTransport is blocking
        let result = tokio::task::spawn_blocking(move || mailer.send(&email))
            .await
            .map_err(|e| AppError::email(format!("Failed to spawn email sending task: {}", e)))?;

        result.map_err(|e| AppError::email(format!("Failed to send email: {}", e)))?;
        Ok(())
    }
}

#[async_trait]
impl UnlockMailer for EmailService {
    async fn send_unlock_email(&self, to_email: &str, unlock_link: &str) -> Result<(), AppError> {
        if !self.config.enabled {
            tracing::warn!("Email service is disabled, skipping account unlock email");
            return Ok(());
        }

        let html_body = self.generate_unlock_email_html(unlock_link);
        let text_body = self.generate_unlock_email_text(unlock_link);
        self.send_email(to_email, "Unlock your SalesPulse account", &html_body, &text_body).await?;

        tracing::info!(email_domain = to_email.rsplit('@').next().unwrap_or("-"), "account unlock email sent");
        Ok(())
    }
}
