//! LOGIN command handler.
//!
//! Any credentials pass. The monitor tests care about what happens
//! after authentication, not authentication itself, so the handler
//! only has to move the client into the authenticated state.

use crate::fake_imap::io::write_line;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};

/// Accept the LOGIN unconditionally. Returns whether the response
/// could be written, so the caller can drop dead connections.
pub async fn handle_login<S: AsyncRead + AsyncWrite + Unpin>(
    tag: &str,
    stream: &mut BufReader<S>,
) -> bool {
    let resp = format!("{tag} OK logged in\r\n");
    write_line(stream, &resp).await.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn any_credentials_get_a_tagged_ok() {
        let (mut client, server) = tokio::io::duplex(256);
        let mut stream = BufReader::new(server);

        let ok = handle_login("w3", &mut stream).await;
        drop(stream);
        assert!(ok);

        let mut out = String::new();
        client.read_to_string(&mut out).await.unwrap();
        assert_eq!(out, "w3 OK logged in\r\n");
    }

    #[tokio::test]
    async fn dead_stream_reports_failure() {
        let (client, server) = tokio::io::duplex(256);
        drop(client);
        let mut stream = BufReader::new(server);
        assert!(!handle_login("w4", &mut stream).await);
    }
}
