//! Handshake codec for the Mimic protocol
//!
//! One handshake is exchanged per physical connection. The client
//! sends a pseudo-ClientHello carrying the fronting domain (the SNI
//! label) and the logical session id; the server answers with a fixed
//! marker. This is a plaintext facade, not TLS: it leaks both fields
//! and authenticates nothing.

use std::str;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::constants::DIAL_TIMEOUT;

/// Literal prefix of every client hello
pub const HELLO_PREFIX: &str = "MIMIC_HELLO_SNI:";

/// Separator between the SNI field and the session id field
pub const HELLO_SEPARATOR: u8 = b'|';

/// Tag introducing the session id after the separator
pub const HELLO_SID_TAG: &str = "SID:";

/// Exact server reply on a successful handshake
pub const HELLO_OK: &[u8] = b"MIMIC_HELLO_OK";

/// Upper bound for a single handshake read
pub const MAX_HELLO_SIZE: usize = 1024;

/// Errors produced while framing or parsing the handshake.
///
/// Any of these is fatal for the offending connection: the server
/// closes without replying, the client abandons the new socket.
#[derive(Error, Debug)]
pub enum HandshakeError {
    /// Underlying IO error while exchanging hello messages.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Peer closed the connection before the handshake completed.
    #[error("connection closed during handshake")]
    UnexpectedEof,
    /// Client hello does not start with the `MIMIC_HELLO_SNI:` prefix.
    #[error("invalid handshake format")]
    BadPrefix,
    /// Client hello carries an empty SNI field.
    #[error("empty domain in client hello")]
    EmptyDomain,
    /// SNI or session id field is not valid UTF-8.
    #[error("non-text field in client hello")]
    BadEncoding,
    /// Server replied with something other than `MIMIC_HELLO_OK`.
    #[error("invalid server response: {0:?}")]
    BadReply(Vec<u8>),
}

/// Parsed fields of a client hello
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientHello {
    /// Fronting domain label
    pub sni: String,
    /// Logical session id; empty means a legacy hello without one,
    /// and the server will open a fresh session
    pub session_id: String,
}

/// Build the wire bytes of a client hello.
///
/// Format: `MIMIC_HELLO_SNI:<sni>|SID:<session_id>`, sent in a single
/// write with no length prefix.
pub fn encode_client_hello(sni: &str, session_id: &str) -> Vec<u8> {
    format!("{HELLO_PREFIX}{sni}{}{HELLO_SID_TAG}{session_id}", HELLO_SEPARATOR as char).into_bytes()
}

/// Parse a client hello.
///
/// Rules, applied to the first (bounded) read:
/// 1. The message must start with the literal prefix.
/// 2. Without a `|` separator the entire remainder is the domain and
///    the session id is empty (legacy clients).
/// 3. After `|`, the remainder is the session id only when it starts
///    with `SID:`; anything else also yields an empty session id.
pub fn parse_client_hello(data: &[u8]) -> Result<ClientHello, HandshakeError> {
    let rest = data
        .strip_prefix(HELLO_PREFIX.as_bytes())
        .ok_or(HandshakeError::BadPrefix)?;

    let (sni_bytes, sid_bytes) = match rest.iter().position(|&b| b == HELLO_SEPARATOR) {
        Some(i) => {
            let after = &rest[i + 1..];
            let sid = after.strip_prefix(HELLO_SID_TAG.as_bytes()).unwrap_or(b"");
            (&rest[..i], sid)
        }
        None => (rest, &b""[..]),
    };

    if sni_bytes.is_empty() {
        return Err(HandshakeError::EmptyDomain);
    }

    let sni = str::from_utf8(sni_bytes)
        .map_err(|_| HandshakeError::BadEncoding)?
        .to_string();
    let session_id = str::from_utf8(sid_bytes)
        .map_err(|_| HandshakeError::BadEncoding)?
        .to_string();

    Ok(ClientHello { sni, session_id })
}

/// Dial the server with the standard connect timeout
pub async fn dial(addr: &str) -> std::io::Result<TcpStream> {
    match timeout(DIAL_TIMEOUT, TcpStream::connect(addr)).await {
        Ok(res) => res,
        Err(_) => Err(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            format!("dial {addr} timed out after {DIAL_TIMEOUT:?}"),
        )),
    }
}

/// Client side of the handshake: send the hello, require the exact
/// `MIMIC_HELLO_OK` reply.
pub async fn client_handshake<S>(
    conn: &mut S,
    sni: &str,
    session_id: &str,
) -> Result<(), HandshakeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    conn.write_all(&encode_client_hello(sni, session_id)).await?;

    let mut buf = [0u8; MAX_HELLO_SIZE];
    let n = conn.read(&mut buf).await?;
    if n == 0 {
        return Err(HandshakeError::UnexpectedEof);
    }
    if &buf[..n] != HELLO_OK {
        return Err(HandshakeError::BadReply(buf[..n].to_vec()));
    }
    Ok(())
}

/// Server side of the handshake, read half: one bounded read, parse.
///
/// No reply is sent here. The caller decides whether to admit the
/// connection and answers with [`server_send_ok`]; on a framing
/// failure or a rejection it simply drops the socket, so the client
/// never sees a reply.
pub async fn server_read_hello<S>(conn: &mut S) -> Result<ClientHello, HandshakeError>
where
    S: AsyncRead + Unpin,
{
    let mut buf = [0u8; MAX_HELLO_SIZE];
    let n = conn.read(&mut buf).await?;
    if n == 0 {
        return Err(HandshakeError::UnexpectedEof);
    }
    parse_client_hello(&buf[..n])
}

/// Server side of the handshake, reply half: confirm adoption of the
/// connection with the exact `MIMIC_HELLO_OK` bytes.
pub async fn server_send_ok<S>(conn: &mut S) -> Result<(), HandshakeError>
where
    S: AsyncWrite + Unpin,
{
    conn.write_all(HELLO_OK).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_encode_exact_bytes() {
        assert_eq!(
            encode_client_hello("vk.com", "A"),
            b"MIMIC_HELLO_SNI:vk.com|SID:A".to_vec()
        );
    }

    #[test]
    fn test_parse_full_hello() {
        let hello = parse_client_hello(b"MIMIC_HELLO_SNI:rutube.ru|SID:12345").unwrap();
        assert_eq!(hello.sni, "rutube.ru");
        assert_eq!(hello.session_id, "12345");
    }

    #[test]
    fn test_parse_legacy_hello_without_separator() {
        let hello = parse_client_hello(b"MIMIC_HELLO_SNI:vk.com").unwrap();
        assert_eq!(hello.sni, "vk.com");
        assert_eq!(hello.session_id, "");
    }

    #[test]
    fn test_parse_separator_without_sid_tag() {
        let hello = parse_client_hello(b"MIMIC_HELLO_SNI:vk.com|XID:abc").unwrap();
        assert_eq!(hello.sni, "vk.com");
        assert_eq!(hello.session_id, "");
    }

    #[test]
    fn test_parse_empty_session_id() {
        let hello = parse_client_hello(b"MIMIC_HELLO_SNI:vk.com|SID:").unwrap();
        assert_eq!(hello.session_id, "");
    }

    #[test]
    fn test_reject_missing_prefix() {
        assert!(matches!(
            parse_client_hello(b"HELLO"),
            Err(HandshakeError::BadPrefix)
        ));
    }

    #[test]
    fn test_reject_empty_domain() {
        assert!(matches!(
            parse_client_hello(b"MIMIC_HELLO_SNI:"),
            Err(HandshakeError::EmptyDomain)
        ));
    }

    #[tokio::test]
    async fn test_handshake_over_duplex() {
        let (mut client, mut server) = tokio::io::duplex(1024);

        let server_task = tokio::spawn(async move {
            let hello = server_read_hello(&mut server).await.unwrap();
            assert_eq!(hello.sni, "telegram.org");
            assert_eq!(hello.session_id, "abc-123");
            server_send_ok(&mut server).await.unwrap();
        });

        client_handshake(&mut client, "telegram.org", "abc-123")
            .await
            .unwrap();
        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_client_rejects_bad_reply() {
        let (mut client, mut server) = tokio::io::duplex(1024);

        tokio::spawn(async move {
            let mut buf = [0u8; MAX_HELLO_SIZE];
            let _ = server.read(&mut buf).await.unwrap();
            server.write_all(b"NOPE").await.unwrap();
        });

        let err = client_handshake(&mut client, "vk.com", "sid").await;
        assert!(matches!(err, Err(HandshakeError::BadReply(_))));
    }

    proptest! {
        #[test]
        fn test_hello_roundtrip(
            sni in "[a-z0-9][a-z0-9.-]{0,40}",
            sid in "[a-zA-Z0-9-]{0,40}",
        ) {
            let wire = encode_client_hello(&sni, &sid);
            let parsed = parse_client_hello(&wire).unwrap();
            prop_assert_eq!(parsed.sni, sni);
            prop_assert_eq!(parsed.session_id, sid);
        }

        #[test]
        fn test_parse_arbitrary_data_doesnt_panic(data in prop::collection::vec(any::<u8>(), 0..MAX_HELLO_SIZE)) {
            let _ = parse_client_hello(&data);
        }
    }
}
