//! Message retrieval and normalization
//!
//! One UID FETCH of the full body (BODY.PEEK, so the message keeps its
//! unseen state), then `mail-parser` turns the raw RFC 2822 bytes into
//! the fields the webhook payload needs.

use crate::error::{Error, Result};
use crate::executor::CommandExecutor;
use futures::{FutureExt, TryStreamExt};
use mail_parser::{MessageParser, MimeHeaders};

/// Truncation marker appended when a body exceeds the configured limit.
pub const TRUNCATION_MARKER: &str = "...<truncated>";

/// A fetched message reduced to payload-ready fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedMessage {
    pub uid: u32,
    pub subject: String,
    pub from: String,
    /// RFC 3339 date header, empty when the message carries none.
    pub date: String,
    pub body: String,
    pub attachments: Vec<String>,
}

/// Fetch the message with `uid` and normalize it.
///
/// # Errors
///
/// Propagates executor errors (no session, timeout, wire failures) and
/// returns [`Error::Parse`] when the raw bytes are not a parseable
/// message.
pub async fn fetch_and_normalize(
    executor: &CommandExecutor,
    uid: u32,
    body_limit: usize,
) -> Result<NormalizedMessage> {
    let raw = executor
        .execute("fetch", move |session| {
            async move {
                let uid_set = uid.to_string();
                let stream = session.uid_fetch(&uid_set, "(BODY.PEEK[])").await?;
                let fetches: Vec<_> = stream.try_collect().await?;
                fetches
                    .iter()
                    .find_map(|f| f.body().map(<[u8]>::to_vec))
                    .ok_or_else(|| Error::Imap(format!("no body returned for uid {uid}")))
            }
            .boxed()
        })
        .await?;

    normalize(uid, &raw, body_limit)
}

/// Normalize raw message bytes. Pure; split out for testing.
///
/// # Errors
///
/// Returns [`Error::Parse`] when the bytes are not a parseable message.
pub fn normalize(uid: u32, raw: &[u8], body_limit: usize) -> Result<NormalizedMessage> {
    let message = MessageParser::default()
        .parse(raw)
        .ok_or_else(|| Error::Parse(format!("unparseable message for uid {uid}")))?;

    let subject = message.subject().unwrap_or_default().to_string();

    let from = message
        .from()
        .and_then(|addrs| addrs.first())
        .map(|addr| {
            let email = addr.address().unwrap_or_default();
            match addr.name() {
                Some(name) if !name.is_empty() && !name.eq_ignore_ascii_case(email) => {
                    format!("{name} <{email}>")
                }
                _ => email.to_string(),
            }
        })
        .unwrap_or_default();

    let date = message
        .date()
        .map(mail_parser::DateTime::to_rfc3339)
        .unwrap_or_default();

    let body = message
        .body_text(0)
        .map(|text| truncate_body(&text, body_limit))
        .unwrap_or_default();

    let mut attachments = Vec::new();
    for part in message.attachments() {
        if let Some(name) = part.attachment_name() {
            if !attachments.iter().any(|n| n == name) {
                attachments.push(name.to_string());
            }
        }
    }

    Ok(NormalizedMessage {
        uid,
        subject,
        from,
        date,
        body,
        attachments,
    })
}

/// Cap the body at `limit` bytes on a char boundary and mark the cut.
fn truncate_body(text: &str, limit: usize) -> String {
    if limit == 0 || text.len() <= limit {
        return text.to_string();
    }
    let mut cut = limit;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}{}", &text[..cut], TRUNCATION_MARKER)
}
