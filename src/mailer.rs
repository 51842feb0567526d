// src/mailer.rs

use reqwest::blocking::Client;
use serde::Serialize;
use std::error::Error;
use std::fmt;

use crate::config::WishlistConfig;
use crate::domain::{Event, Platform, Snapshot};
use crate::report;

#[derive(Debug)]
pub enum MailerError {
    RequestFailed(String),
    ApiError(String),
}

impl fmt::Display for MailerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MailerError::RequestFailed(msg) => write!(f, "Request failed: {}", msg),
            MailerError::ApiError(msg) => write!(f, "API error: {}", msg),
        }
    }
}

impl Error for MailerError {}

/// Downstream seam for a completed diff cycle. The watcher always produces
/// and persists events; whether anyone hears about them is this trait's
/// problem, and a notification failure never rolls anything back.
pub trait Notifier: Send + Sync {
    fn notify(
        &self,
        wishlist: &WishlistConfig,
        platform: Platform,
        events: &[Event],
        snapshot: &Snapshot,
        previous_count: usize,
        new_count: usize,
    ) -> Result<(), MailerError>;
}

/// Per-wishlist recipients win when any survive trimming; otherwise the
/// global default list.
pub fn resolve_recipients(per_wishlist: &[String], global: &[String]) -> Vec<String> {
    let cleaned: Vec<String> = per_wishlist
        .iter()
        .map(|r| r.trim())
        .filter(|r| !r.is_empty())
        .map(String::from)
        .collect();
    if cleaned.is_empty() {
        global.to_vec()
    } else {
        cleaned
    }
}

pub struct BrevoMailer {
    api_key: String,
    sender_email: String,
    sender_name: String,
    global_recipients: Vec<String>,
    api_base: String,
    client: Client,
}

#[derive(Serialize)]
struct BrevoSender<'a> {
    name: &'a str,
    email: &'a str,
}

#[derive(Serialize)]
struct BrevoRecipient<'a> {
    email: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BrevoPayload<'a> {
    sender: BrevoSender<'a>,
    to: Vec<BrevoRecipient<'a>>,
    subject: &'a str,
    html_content: String,
    text_content: String,
}

impl BrevoMailer {
    pub fn new(
        api_key: String,
        sender_email: String,
        sender_name: String,
        global_recipients: Vec<String>,
    ) -> Self {
        Self {
            api_key,
            sender_email,
            sender_name,
            global_recipients,
            api_base: "https://api.brevo.com".to_string(),
            client: Client::new(),
        }
    }

    #[cfg(test)]
    pub(crate) fn with_api_base(mut self, api_base: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }

    fn send(
        &self,
        subject: &str,
        html_content: String,
        text_content: String,
        recipients: &[String],
    ) -> Result<(), MailerError> {
        let payload = BrevoPayload {
            sender: BrevoSender {
                name: &self.sender_name,
                email: &self.sender_email,
            },
            to: recipients
                .iter()
                .map(|email| BrevoRecipient {
                    email: email.as_str(),
                })
                .collect(),
            subject,
            html_content,
            text_content,
        };

        let resp = self
            .client
            .post(format!("{}/v3/smtp/email", self.api_base))
            .header("api-key", &self.api_key)
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .map_err(|e| MailerError::RequestFailed(e.to_string()))?;

        if !resp.status().is_success() {
            let error_body = resp.text().unwrap_or_else(|_| "Unknown error".to_string());
            return Err(MailerError::ApiError(format!(
                "Failed to send email: {}",
                error_body
            )));
        }

        Ok(())
    }
}

impl Notifier for BrevoMailer {
    fn notify(
        &self,
        wishlist: &WishlistConfig,
        platform: Platform,
        events: &[Event],
        snapshot: &Snapshot,
        previous_count: usize,
        new_count: usize,
    ) -> Result<(), MailerError> {
        let recipients = resolve_recipients(&wishlist.recipients, &self.global_recipients);
        if recipients.is_empty() {
            log::warn!(
                "No recipients defined for wishlist '{}' (platform={platform}); \
                 EMAIL_TO is empty and no 'recipients' set in config. Skipping email.",
                wishlist.name
            );
            return Ok(());
        }

        let subject = format!(
            "[{}] Changes detected for {}",
            platform.display_name(),
            wishlist.name
        );
        let html_body = report::build_html_report(
            platform,
            &wishlist.name,
            &wishlist.identifier,
            events,
            snapshot,
            previous_count,
            new_count,
        );
        let text_body = report::build_plaintext_report(
            platform,
            &wishlist.name,
            &wishlist.identifier,
            events,
            snapshot,
            previous_count,
            new_count,
        );

        self.send(&subject, html_body, text_body, &recipients)?;
        log::info!("Email sent to {recipients:?}: {subject}");
        Ok(())
    }
}

/// Fallback when mail is not configured: changes end up in the log and
/// nowhere else.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(
        &self,
        wishlist: &WishlistConfig,
        platform: Platform,
        events: &[Event],
        snapshot: &Snapshot,
        previous_count: usize,
        new_count: usize,
    ) -> Result<(), MailerError> {
        let text = report::build_plaintext_report(
            platform,
            &wishlist.name,
            &wishlist.identifier,
            events,
            snapshot,
            previous_count,
            new_count,
        );
        for line in text.lines().filter(|l| !l.is_empty()) {
            log::info!("{line}");
        }
        Ok(())
    }
}
