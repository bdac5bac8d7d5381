//! GP Amendment B HTTP admin codec
//!
//! Frames APDUs in the remote-administration envelope: the agent POSTs to
//! `/admin` with the card-content-mgt-response media type (empty body on the
//! first request, an R-APDU afterwards); the server answers 200 with the
//! next C-APDU, or 204 when the session is complete. Connections are kept
//! alive across the whole exchange and carry exactly one outstanding
//! request at a time. Content-Length framing only; no chunked encoding.

use std::io::{self, Read, Write};

use bytes::Bytes;
use tracing::trace;

use crate::error::ProtocolError;

/// Media type of agent requests (card → server direction carries responses)
pub const REQUEST_CONTENT_TYPE: &str =
    "application/vnd.globalplatform.card-content-mgt-response;version=1.0";
/// Media type of server responses (server → card direction carries commands)
pub const RESPONSE_CONTENT_TYPE: &str =
    "application/vnd.globalplatform.card-content-mgt;version=1.0";
/// The admin endpoint path
pub const ADMIN_PATH: &str = "/admin";

const MAX_BODY: usize = 64 * 1024;

/// A parsed agent request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminRequest {
    /// R-APDU bytes; empty on the session-opening request
    pub body: Bytes,
}

/// A parsed server response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminResponse {
    /// 200: the next C-APDU to process
    Next(Bytes),
    /// 204: session complete, no further requests
    Complete,
}

/// Read one CRLF-terminated line; `None` means clean EOF before any byte
fn read_line<R: Read>(stream: &mut R) -> Result<Option<String>, ProtocolError> {
    let mut line = Vec::with_capacity(64);
    let mut byte = [0u8; 1];
    loop {
        match stream.read(&mut byte) {
            Ok(0) => {
                if line.is_empty() {
                    return Ok(None);
                }
                return Err(ProtocolError::Truncated);
            }
            Ok(_) => {
                if byte[0] == b'\n' {
                    if line.last() == Some(&b'\r') {
                        line.pop();
                    }
                    return Ok(Some(String::from_utf8_lossy(&line).into_owned()));
                }
                if line.len() > 8 * 1024 {
                    return Err(ProtocolError::Malformed("header line too long".into()));
                }
                line.push(byte[0]);
            }
            Err(e) => return Err(ProtocolError::Io(e)),
        }
    }
}

/// Header block after the start line: (content-type, content-length)
fn read_headers<R: Read>(
    stream: &mut R,
) -> Result<(Option<String>, Option<usize>), ProtocolError> {
    let mut content_type = None;
    let mut content_length = None;

    loop {
        let line = read_line(stream)?.ok_or(ProtocolError::Truncated)?;
        if line.is_empty() {
            return Ok((content_type, content_length));
        }
        let Some((name, value)) = line.split_once(':') else {
            return Err(ProtocolError::Malformed(format!("bad header: {line}")));
        };
        let value = value.trim();
        match name.trim().to_ascii_lowercase().as_str() {
            "content-type" => content_type = Some(value.to_string()),
            "content-length" => {
                let len: usize = value
                    .parse()
                    .map_err(|_| ProtocolError::Malformed(format!("bad length: {value}")))?;
                if len > MAX_BODY {
                    return Err(ProtocolError::Malformed(format!("body too large: {len}")));
                }
                content_length = Some(len);
            }
            _ => {}
        }
    }
}

fn read_body<R: Read>(stream: &mut R, length: usize) -> Result<Bytes, ProtocolError> {
    let mut body = vec![0u8; length];
    stream.read_exact(&mut body).map_err(|e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            ProtocolError::Truncated
        } else {
            ProtocolError::Io(e)
        }
    })?;
    Ok(Bytes::from(body))
}

/// Server side: read and validate the next agent request
///
/// `Ok(None)` is a clean connection close between exchanges. A wrong method
/// or media type is an error the caller answers with
/// [`write_error_response`] (405 / 415) before dropping the connection.
pub fn read_request<R: Read>(stream: &mut R) -> Result<Option<AdminRequest>, ProtocolError> {
    let Some(request_line) = read_line(stream)? else {
        return Ok(None);
    };

    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let path = parts.next().unwrap_or_default().to_string();

    let (content_type, content_length) = read_headers(stream)?;
    let body = read_body(stream, content_length.unwrap_or(0))?;

    if method != "POST" {
        return Err(ProtocolError::MethodNotAllowed(method));
    }
    if path != ADMIN_PATH {
        return Err(ProtocolError::UnknownPath(path));
    }
    match content_type.as_deref() {
        Some(REQUEST_CONTENT_TYPE) => {}
        other => {
            return Err(ProtocolError::UnsupportedContentType(
                other.unwrap_or_default().to_string(),
            ));
        }
    }

    trace!(body_len = body.len(), "admin request received");
    Ok(Some(AdminRequest { body }))
}

/// Server side: 200 + C-APDU while the script continues, 204 when done
pub fn write_response<W: Write>(stream: &mut W, c_apdu: Option<&[u8]>) -> io::Result<()> {
    match c_apdu {
        Some(body) => {
            write!(
                stream,
                "HTTP/1.1 200 OK\r\nContent-Type: {RESPONSE_CONTENT_TYPE}\r\n\
                 Content-Length: {}\r\nConnection: keep-alive\r\n\r\n",
                body.len()
            )?;
            stream.write_all(body)?;
        }
        None => {
            write!(stream, "HTTP/1.1 204 No Content\r\n\r\n")?;
        }
    }
    stream.flush()
}

/// Server side: terminal error response with a diagnostic body
pub fn write_error_response<W: Write>(
    stream: &mut W,
    status: u16,
    reason: &str,
    body: &str,
) -> io::Result<()> {
    write!(
        stream,
        "HTTP/1.1 {status} {reason}\r\nContent-Type: text/plain\r\n\
         Content-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    )?;
    stream.flush()
}

/// Agent side: POST the previous R-APDU (or nothing, to open the session)
pub fn write_request<W: Write>(
    stream: &mut W,
    host: &str,
    r_apdu: Option<&[u8]>,
) -> io::Result<()> {
    let body = r_apdu.unwrap_or(&[]);
    write!(
        stream,
        "POST {ADMIN_PATH} HTTP/1.1\r\nHost: {host}\r\n\
         Content-Type: {REQUEST_CONTENT_TYPE}\r\nContent-Length: {}\r\n\
         Connection: keep-alive\r\n\r\n",
        body.len()
    )?;
    stream.write_all(body)?;
    stream.flush()
}

/// Agent side: read the server's verdict for the last request
pub fn read_response<R: Read>(stream: &mut R) -> Result<AdminResponse, ProtocolError> {
    let status_line = read_line(stream)?.ok_or(ProtocolError::Truncated)?;
    let status: u16 = status_line
        .split_whitespace()
        .nth(1)
        .and_then(|code| code.parse().ok())
        .ok_or_else(|| ProtocolError::Malformed(format!("bad status line: {status_line}")))?;

    let (content_type, content_length) = read_headers(stream)?;

    match status {
        200 => {
            let body = read_body(stream, content_length.unwrap_or(0))?;
            match content_type.as_deref() {
                Some(RESPONSE_CONTENT_TYPE) => {}
                other => {
                    return Err(ProtocolError::UnsupportedContentType(
                        other.unwrap_or_default().to_string(),
                    ));
                }
            }
            trace!(body_len = body.len(), "C-APDU received");
            Ok(AdminResponse::Next(body))
        }
        204 => Ok(AdminResponse::Complete),
        _ => {
            let body = read_body(stream, content_length.unwrap_or(0))?;
            Err(ProtocolError::UnexpectedStatus {
                status,
                body: String::from_utf8_lossy(&body).into_owned(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;
    use std::io::Cursor;

    #[test]
    fn request_round_trip() {
        let mut wire = Vec::new();
        write_request(&mut wire, "admin.example", Some(hex!("9000").as_slice())).unwrap();

        let parsed = read_request(&mut Cursor::new(wire)).unwrap().unwrap();
        assert_eq!(parsed.body.as_ref(), hex!("9000"));
    }

    #[test]
    fn opening_request_has_empty_body() {
        let mut wire = Vec::new();
        write_request(&mut wire, "admin.example", None).unwrap();

        let parsed = read_request(&mut Cursor::new(wire)).unwrap().unwrap();
        assert!(parsed.body.is_empty());
    }

    #[test]
    fn clean_eof_yields_none() {
        assert!(read_request(&mut Cursor::new(Vec::new())).unwrap().is_none());
    }

    #[test]
    fn wrong_content_type_is_rejected() {
        let wire = b"POST /admin HTTP/1.1\r\nHost: x\r\nContent-Type: text/plain\r\nContent-Length: 0\r\n\r\n";
        assert!(matches!(
            read_request(&mut Cursor::new(wire.to_vec())),
            Err(ProtocolError::UnsupportedContentType(t)) if t == "text/plain"
        ));
    }

    #[test]
    fn wrong_method_is_rejected() {
        let wire = b"GET /admin HTTP/1.1\r\nHost: x\r\nContent-Length: 0\r\n\r\n";
        assert!(matches!(
            read_request(&mut Cursor::new(wire.to_vec())),
            Err(ProtocolError::MethodNotAllowed(m)) if m == "GET"
        ));
    }

    #[test]
    fn response_with_command_round_trip() {
        let c_apdu = hex!("00A4040008A000000151000000");
        let mut wire = Vec::new();
        write_response(&mut wire, Some(c_apdu.as_slice())).unwrap();

        let parsed = read_response(&mut Cursor::new(wire)).unwrap();
        assert_eq!(parsed, AdminResponse::Next(Bytes::copy_from_slice(&c_apdu)));
    }

    #[test]
    fn completion_is_204() {
        let mut wire = Vec::new();
        write_response(&mut wire, None).unwrap();
        assert!(String::from_utf8_lossy(&wire).starts_with("HTTP/1.1 204"));

        let parsed = read_response(&mut Cursor::new(wire)).unwrap();
        assert_eq!(parsed, AdminResponse::Complete);
    }

    #[test]
    fn error_status_carries_diagnostics() {
        let mut wire = Vec::new();
        write_error_response(&mut wire, 415, "Unsupported Media Type", "bad media type").unwrap();

        match read_response(&mut Cursor::new(wire)) {
            Err(ProtocolError::UnexpectedStatus { status, body }) => {
                assert_eq!(status, 415);
                assert_eq!(body, "bad media type");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn keep_alive_carries_multiple_exchanges() {
        let mut wire = Vec::new();
        write_request(&mut wire, "h", None).unwrap();
        write_request(&mut wire, "h", Some(hex!("6F009000").as_slice())).unwrap();

        let mut cursor = Cursor::new(wire);
        let first = read_request(&mut cursor).unwrap().unwrap();
        let second = read_request(&mut cursor).unwrap().unwrap();
        assert!(first.body.is_empty());
        assert_eq!(second.body.as_ref(), hex!("6F009000"));
        assert!(read_request(&mut cursor).unwrap().is_none());
    }

    #[test]
    fn truncated_body_is_detected() {
        let wire = b"POST /admin HTTP/1.1\r\nContent-Type: application/vnd.globalplatform.card-content-mgt-response;version=1.0\r\nContent-Length: 10\r\n\r\nabc";
        assert!(matches!(
            read_request(&mut Cursor::new(wire.to_vec())),
            Err(ProtocolError::Truncated)
        ));
    }
}
