use async_trait::async_trait;
use serde::Serialize;
use std::sync::Mutex;

use crate::error::{AppError, EmailError};
use crate::store::User;
use crate::validators::is_valid_email;

/// A validated email address.
#[derive(Debug, Clone, PartialEq)]
pub struct EmailAddress(String);

impl EmailAddress {
    pub fn parse(s: &str) -> Result<Self, EmailError> {
        is_valid_email(s)
            .map(Self)
            .map_err(|e| EmailError::InvalidRecipient(e.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// An outgoing message, already rendered.
#[derive(Debug, Clone, PartialEq)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub html_body: String,
    pub text_body: String,
}

impl EmailMessage {
    /// Link asking the user to confirm their address.
    pub fn verification(user: &User, api_host_url: &str, token: &str) -> Self {
        let url = format!("{}/auth/verify-email?token={}", api_host_url, token);
        Self {
            to: user.email.clone(),
            subject: "Verify your email address".to_string(),
            html_body: format!(
                "<p>Hi {},</p><p>Please confirm your email address by following \
                 <a href=\"{}\">this link</a>.</p>",
                user.first_name, url
            ),
            text_body: format!(
                "Hi {},\nPlease confirm your email address by visiting:\n{}\n",
                user.first_name, url
            ),
        }
    }

    /// Link carrying a reset-password token.
    pub fn reset_password(user: &User, api_host_url: &str, token: &str) -> Self {
        let url = format!("{}/auth/reset-password?token={}", api_host_url, token);
        Self {
            to: user.email.clone(),
            subject: "Reset your password".to_string(),
            html_body: format!(
                "<p>Hi {},</p><p>You can choose a new password by following \
                 <a href=\"{}\">this link</a>. If you did not ask for this, ignore this email.</p>",
                user.first_name, url
            ),
            text_body: format!(
                "Hi {},\nYou can choose a new password by visiting:\n{}\n\
                 If you did not ask for this, ignore this email.\n",
                user.first_name, url
            ),
        }
    }
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, message: &EmailMessage) -> Result<(), AppError>;
}

/// HTTP email API client.
#[derive(Clone)]
pub struct EmailClient {
    http_client: reqwest::Client,
    base_url: String,
    sender: EmailAddress,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct SendEmailRequest<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    html_body: &'a str,
    text_body: &'a str,
}

impl EmailClient {
    pub fn new(base_url: String, sender: EmailAddress, http_client: reqwest::Client) -> Self {
        Self {
            http_client,
            base_url,
            sender,
        }
    }
}

#[async_trait]
impl Mailer for EmailClient {
    async fn send(&self, message: &EmailMessage) -> Result<(), AppError> {
        let recipient = EmailAddress::parse(&message.to)?;
        let url = format!("{}/email", self.base_url.trim_end_matches('/'));
        let request = SendEmailRequest {
            from: self.sender.as_str(),
            to: recipient.as_str(),
            subject: &message.subject,
            html_body: &message.html_body,
            text_body: &message.text_body,
        };

        self.http_client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                tracing::error!("Failed to send email: {}", e);
                EmailError::SendFailed(e.to_string())
            })?
            .error_for_status()
            .map_err(|e| {
                tracing::error!("Email service returned error: {}", e);
                EmailError::SendFailed(e.to_string())
            })?;

        tracing::info!(subject = %message.subject, "Email sent");
        Ok(())
    }
}

/// Keeps every message in memory instead of sending it.
#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<EmailMessage>>,
    fail: bool,
}

impl RecordingMailer {
    pub fn new() -> Self {
        Self::default()
    }

    /// A mailer whose every send fails.
    pub fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn sent(&self) -> Vec<EmailMessage> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Token from the link in the most recent message to `to`.
    pub fn last_token_for(&self, to: &str) -> Option<String> {
        self.sent()
            .into_iter()
            .rev()
            .find(|m| m.to == to)
            .and_then(|m| {
                m.text_body
                    .split("token=")
                    .nth(1)
                    .and_then(|rest| rest.split_whitespace().next())
                    .map(str::to_string)
            })
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, message: &EmailMessage) -> Result<(), AppError> {
        if self.fail {
            return Err(EmailError::SendFailed("mailer disabled".to_string()).into());
        }
        self.sent
            .lock()
            .map_err(|_| AppError::Internal("mailer lock poisoned".to_string()))?
            .push(message.clone());
        Ok(())
    }
}
