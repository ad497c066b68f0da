//! Test data model for the fake IMAP server
//!
//! Builder-style construction of the initial mailbox state:
//!
//! ```ignore
//! let mailbox = MailboxBuilder::new()
//!     .folder("INBOX")
//!         .email(1, raw_rfc2822_bytes)
//!         .email(2, raw_rfc2822_bytes)
//!     .build();
//! ```
//!
//! The `Mailbox` is shared with the server behind a mutex; tests mutate
//! it through [`FakeImapServer::deliver`](super::FakeImapServer::deliver),
//! which appends a message and triggers an IDLE push.

/// All folders the fake server knows about.
#[derive(Debug, Clone)]
pub struct Mailbox {
    pub folders: Vec<Folder>,
}

impl Mailbox {
    /// Look up a folder by name (case-sensitive, matching real IMAP).
    pub fn get_folder(&self, name: &str) -> Option<&Folder> {
        self.folders.iter().find(|f| f.name == name)
    }

    /// Append a message to a folder, assigning the next free UID.
    /// Returns the assigned UID, or `None` for an unknown folder.
    pub fn append(&mut self, folder_name: &str, raw: &[u8]) -> Option<u32> {
        let folder = self.folders.iter_mut().find(|f| f.name == folder_name)?;
        let uid = folder.emails.iter().map(|e| e.uid).max().unwrap_or(0) + 1;
        folder.emails.push(TestEmail {
            uid,
            raw: raw.to_vec(),
        });
        Some(uid)
    }
}

/// A single IMAP folder (e.g. "INBOX").
#[derive(Debug, Clone)]
pub struct Folder {
    pub name: String,
    pub emails: Vec<TestEmail>,
}

/// A message stored in a folder.
///
/// - `uid`: unique-per-folder number that never changes (unlike
///   sequence numbers, which are 1-based positions).
/// - `raw`: the complete RFC 2822 message (headers + body), returned
///   verbatim in UID FETCH BODY[] responses.
#[derive(Debug, Clone)]
pub struct TestEmail {
    pub uid: u32,
    pub raw: Vec<u8>,
}

/// Builder for the initial `Mailbox` state.
pub struct MailboxBuilder {
    folders: Vec<Folder>,
}

impl MailboxBuilder {
    pub fn new() -> Self {
        Self {
            folders: Vec::new(),
        }
    }

    /// Add a new folder. Subsequent `.email()` calls add to this folder.
    pub fn folder(mut self, name: &str) -> Self {
        self.folders.push(Folder {
            name: name.to_string(),
            emails: Vec::new(),
        });
        self
    }

    /// Add a message to the most recently added folder.
    ///
    /// # Panics
    ///
    /// Panics if called before any `.folder()` call.
    pub fn email(mut self, uid: u32, raw: &[u8]) -> Self {
        self.folders
            .last_mut()
            .expect("call .folder() before .email()")
            .emails
            .push(TestEmail {
                uid,
                raw: raw.to_vec(),
            });
        self
    }

    /// Consume the builder and return the finished `Mailbox`.
    pub fn build(self) -> Mailbox {
        Mailbox {
            folders: self.folders,
        }
    }
}
