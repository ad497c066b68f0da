//! Webhook delivery
//!
//! Builds the JSON payload for a normalized message and POSTs it with
//! bounded retries. Delivery failures are reported to the caller but
//! never kill the monitor; at-least-once is the contract, so a retry
//! after reconnect can deliver the same UID twice.

use crate::config::MonitorConfig;
use crate::error::{Error, Result};
use crate::fetch::NormalizedMessage;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(15);

/// Longest preview carried in a payload, in characters.
const PREVIEW_MAX_CHARS: usize = 140;

/// At most this many attachment names are listed in a fallback preview.
const PREVIEW_MAX_ATTACHMENTS: usize = 5;

/// JSON body POSTed for each new message.
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct Payload {
    pub uid: u32,
    pub subject: String,
    pub from: String,
    pub date: String,
    pub body: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub body_lines: Vec<String>,
    pub preview: String,
    pub word_count: usize,
    pub mailbox: String,
    pub timestamp: String,
    pub has_attachments: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<String>,
    pub attachment_count: usize,
}

/// Assemble the payload for one message.
#[must_use]
pub fn build_payload(msg: &NormalizedMessage, mailbox: &str) -> Payload {
    let body_lines: Vec<String> = msg
        .body
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect();

    Payload {
        uid: msg.uid,
        subject: msg.subject.clone(),
        from: msg.from.clone(),
        date: msg.date.clone(),
        body: msg.body.clone(),
        preview: preview(&msg.body, &body_lines, &msg.attachments),
        word_count: word_count(&msg.body),
        body_lines,
        mailbox: mailbox.to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        has_attachments: !msg.attachments.is_empty(),
        attachments: msg.attachments.clone(),
        attachment_count: msg.attachments.len(),
    }
}

/// First semantic line of the body, skipping style/template noise that
/// HTML-heavy senders leak into the text part. When every line is
/// noise the collapsed raw body is previewed instead; the attachment
/// list only stands in for an entirely empty body. Caps the result.
fn preview(body: &str, body_lines: &[String], attachments: &[String]) -> String {
    let picked = match body_lines.iter().find(|line| !is_noise_line(line)) {
        Some(line) => line.clone(),
        None => {
            let joined = body.replace('\n', " ");
            let collapsed = joined.trim();
            if collapsed.is_empty() && !attachments.is_empty() {
                let listed: Vec<&str> = attachments
                    .iter()
                    .take(PREVIEW_MAX_ATTACHMENTS)
                    .map(String::as_str)
                    .collect();
                let extra = attachments.len().saturating_sub(PREVIEW_MAX_ATTACHMENTS);
                if extra > 0 {
                    format!("Attachments: {} (+{extra} more)", listed.join(", "))
                } else {
                    format!("Attachments: {}", listed.join(", "))
                }
            } else {
                collapsed.to_string()
            }
        }
    };

    if picked.chars().count() > PREVIEW_MAX_CHARS {
        let capped: String = picked.chars().take(PREVIEW_MAX_CHARS).collect();
        format!("{capped}...")
    } else {
        picked
    }
}

fn is_noise_line(line: &str) -> bool {
    let low = line.to_ascii_lowercase();
    low.starts_with("@media")
        || low.starts_with("table ")
        || low.contains("font-family")
        || low.contains('{')
}

/// Word count for mixed-script bodies: whitespace-separated words,
/// plus one per CJK ideograph since those scripts do not use spaces.
#[must_use]
pub fn word_count(text: &str) -> usize {
    let mut count = 0;
    for token in text.split_whitespace() {
        let cjk = token.chars().filter(|c| is_cjk(*c)).count();
        count += cjk;
        if token.chars().any(|c| !is_cjk(c)) {
            count += 1;
        }
    }
    count
}

const fn is_cjk(c: char) -> bool {
    matches!(c, '\u{4E00}'..='\u{9FFF}')
}

/// Parse `Name=value;Other=value` into header pairs, skipping
/// malformed entries.
#[must_use]
pub fn parse_headers(raw: &str) -> Vec<(String, String)> {
    raw.split(';')
        .filter_map(|entry| {
            let (name, value) = entry.split_once('=')?;
            let name = name.trim();
            if name.is_empty() {
                return None;
            }
            Some((name.to_string(), value.trim().to_string()))
        })
        .collect()
}

/// POSTs payloads to the configured webhook endpoint.
pub struct WebhookSender {
    client: reqwest::Client,
    url: String,
    headers: Vec<(String, String)>,
    retry_max: u32,
    retry_backoff: Duration,
}

impl WebhookSender {
    /// # Errors
    ///
    /// Returns [`Error::Delivery`] if the HTTP client cannot be built.
    pub fn new(config: &Arc<MonitorConfig>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(WEBHOOK_TIMEOUT)
            .build()
            .map_err(|e| Error::Delivery(format!("building HTTP client: {e}")))?;
        Ok(Self {
            client,
            url: config.webhook_url.clone(),
            headers: parse_headers(&config.webhook_headers),
            retry_max: config.retry_max,
            retry_backoff: config.retry_backoff,
        })
    }

    /// Deliver one payload, retrying on any non-2xx outcome with
    /// doubling backoff.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Delivery`] once all attempts are exhausted.
    pub async fn send_with_retry(&self, payload: &Payload) -> Result<()> {
        let mut backoff = self.retry_backoff;
        let mut last_failure = String::new();

        for attempt in 0..=self.retry_max {
            if attempt > 0 {
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }

            let mut request = self.client.post(&self.url).json(payload);
            for (name, value) in &self.headers {
                request = request.header(name, value);
            }

            match request.send().await {
                Ok(response) if response.status().is_success() => {
                    info!(uid = payload.uid, status = %response.status(), "webhook delivered");
                    return Ok(());
                }
                Ok(response) => {
                    last_failure = format!("unexpected status {}", response.status());
                }
                Err(e) => {
                    last_failure = e.to_string();
                }
            }
            warn!(uid = payload.uid, attempt, error = %last_failure, "webhook attempt failed");
        }

        Err(Error::Delivery(format!(
            "uid {}: {last_failure}",
            payload.uid
        )))
    }
}
