//! FETCH command handler (by sequence number).
//!
//! The monitor resolves growth with `FETCH lo:hi (UID)`, mapping the
//! 1-based positions of new messages to their stable UIDs. The
//! response carries no body:
//!
//! ```text
//! * <seq> FETCH (UID <uid>)
//! ```

use crate::fake_imap::io::write_line;
use crate::fake_imap::mailbox::Mailbox;
use imap_codec::imap_types::sequence::{SeqOrUid, Sequence, SequenceSet};
use tokio::io::{AsyncRead, AsyncWrite, BufReader};

fn resolve(seq: &SeqOrUid, max: u32) -> Option<u32> {
    match seq {
        SeqOrUid::Value(v) => Some(v.get()),
        SeqOrUid::Asterisk => (max > 0).then_some(max),
    }
}

/// Expand a sequence set (singles and ranges, `*` as the last
/// message) into 1-based sequence numbers.
fn expand(seq_set: &SequenceSet, max: u32) -> Vec<u32> {
    let mut out = Vec::new();
    for seq in seq_set.0.as_ref() {
        match seq {
            Sequence::Single(s) => {
                if let Some(v) = resolve(s, max) {
                    out.push(v);
                }
            }
            Sequence::Range(a, b) => {
                if let (Some(lo), Some(hi)) = (resolve(a, max), resolve(b, max)) {
                    let (lo, hi) = if lo <= hi { (lo, hi) } else { (hi, lo) };
                    out.extend(lo..=hi);
                }
            }
        }
    }
    out
}

/// Handle the FETCH command, answering each in-range sequence number
/// with the corresponding UID.
pub async fn handle_fetch<S: AsyncRead + AsyncWrite + Unpin>(
    tag: &str,
    sequence_set: &SequenceSet,
    mailbox: &Mailbox,
    selected_folder: Option<&str>,
    stream: &mut BufReader<S>,
) {
    let Some(folder_name) = selected_folder else {
        let resp = format!("{tag} BAD No folder selected\r\n");
        let _ = write_line(stream, &resp).await;
        return;
    };

    let Some(folder) = mailbox.get_folder(folder_name) else {
        let resp = format!("{tag} BAD Folder not found\r\n");
        let _ = write_line(stream, &resp).await;
        return;
    };

    let max = u32::try_from(folder.emails.len()).unwrap_or(u32::MAX);
    for seq in expand(sequence_set, max) {
        let Some(email) = folder.emails.get(seq as usize - 1) else {
            continue;
        };
        let line = format!("* {seq} FETCH (UID {})\r\n", email.uid);
        if write_line(stream, &line).await.is_err() {
            return;
        }
    }

    let resp = format!("{tag} OK FETCH completed\r\n");
    let _ = write_line(stream, &resp).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake_imap::mailbox::MailboxBuilder;
    use std::num::NonZeroU32;
    use tokio::io::BufReader;

    fn seq_range(lo: u32, hi: u32) -> SequenceSet {
        SequenceSet(
            vec![Sequence::Range(
                SeqOrUid::Value(NonZeroU32::new(lo).unwrap()),
                SeqOrUid::Value(NonZeroU32::new(hi).unwrap()),
            )]
            .try_into()
            .unwrap(),
        )
    }

    async fn run(
        tag: &str,
        sequence_set: &SequenceSet,
        mailbox: &Mailbox,
        selected: Option<&str>,
    ) -> String {
        let (client, server) = tokio::io::duplex(4096);
        let mut stream = BufReader::new(server);

        handle_fetch(tag, sequence_set, mailbox, selected, &mut stream).await;
        drop(stream);

        let mut buf = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut BufReader::new(client), &mut buf)
            .await
            .unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[tokio::test]
    async fn range_maps_sequence_numbers_to_uids() {
        let raw = b"Subject: t\r\n\r\nx";
        let mailbox = MailboxBuilder::new()
            .folder("INBOX")
            .email(10, raw)
            .email(20, raw)
            .email(30, raw)
            .build();

        let output = run("A1", &seq_range(2, 3), &mailbox, Some("INBOX")).await;

        assert!(!output.contains("UID 10"));
        assert!(output.contains("* 2 FETCH (UID 20)"));
        assert!(output.contains("* 3 FETCH (UID 30)"));
        assert!(output.contains("A1 OK FETCH completed"));
    }

    #[tokio::test]
    async fn out_of_range_sequences_are_skipped() {
        let raw = b"Subject: t\r\n\r\nx";
        let mailbox = MailboxBuilder::new().folder("INBOX").email(10, raw).build();

        let output = run("A1", &seq_range(2, 5), &mailbox, Some("INBOX")).await;

        assert!(!output.contains("FETCH (UID"));
        assert!(output.contains("A1 OK FETCH completed"));
    }

    #[tokio::test]
    async fn no_folder_selected_returns_bad() {
        let mailbox = MailboxBuilder::new().folder("INBOX").build();
        let output = run("A1", &seq_range(1, 1), &mailbox, None).await;
        assert!(output.contains("A1 BAD No folder selected"));
    }
}
