//! Just enough HTTP/1.1 for the command endpoints.
//!
//! Every connection carries exactly one request and is closed after the
//! response, so there is no keep-alive or chunked transfer handling.

use std::collections::HashMap;

use duobot_types::{ErrorClass, RoverError};
use serde::Serialize;
use serde_json::json;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on the request line plus headers.
const MAX_HEAD_BYTES: usize = 8 * 1024;

pub const CONTENT_JSON: &str = "application/json";
pub const CONTENT_NDJSON: &str = "application/x-ndjson";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: String,
    pub path: String,
    pub query: HashMap<String, String>,
}

impl HttpRequest {
    /// Path without the leading slash.
    pub fn action(&self) -> &str {
        self.path.trim_start_matches('/')
    }
}

fn io_error(e: std::io::Error) -> RoverError {
    RoverError::Io(e.to_string())
}

/// Read one line of at most `budget` bytes, newline included.  An empty
/// vector means end of stream.
async fn read_head_line<R>(reader: &mut R, budget: usize) -> Result<Vec<u8>, RoverError>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    (&mut *reader)
        .take(budget as u64)
        .read_until(b'\n', &mut line)
        .await
        .map_err(io_error)?;
    if line.len() == budget && !line.ends_with(b"\n") {
        return Err(RoverError::InvalidInput("request head too large".to_string()));
    }
    Ok(line)
}

/// Read the request head.  Returns `Ok(None)` if the peer closed the
/// connection before sending anything.
///
/// No more than [`MAX_HEAD_BYTES`] are consumed from `reader`, whether or
/// not a line ending ever arrives.
///
/// # Errors
///
/// - [`RoverError::InvalidInput`] for a malformed, non-UTF-8 or oversized
///   head.
/// - [`RoverError::Io`] when the read fails.
pub async fn read_request<R>(reader: &mut R) -> Result<Option<HttpRequest>, RoverError>
where
    R: AsyncBufRead + Unpin,
{
    let raw = read_head_line(reader, MAX_HEAD_BYTES).await?;
    if raw.is_empty() {
        return Ok(None);
    }
    let mut consumed = raw.len();
    let line = String::from_utf8(raw)
        .map_err(|_| RoverError::InvalidInput("request line is not valid UTF-8".to_string()))?;

    let mut parts = line.split_whitespace();
    let (method, target) = match (parts.next(), parts.next(), parts.next()) {
        (Some(method), Some(target), Some(version)) if version.starts_with("HTTP/") => {
            (method.to_string(), target.to_string())
        }
        _ => {
            return Err(RoverError::InvalidInput(format!(
                "malformed request line '{}'",
                line.trim_end()
            )));
        }
    };

    // Headers are not needed; drain them up to the blank line.
    loop {
        let header = read_head_line(reader, MAX_HEAD_BYTES - consumed).await?;
        consumed += header.len();
        if header.trim_ascii().is_empty() {
            break;
        }
    }

    let (path, query) = parse_target(&target);
    Ok(Some(HttpRequest {
        method,
        path,
        query,
    }))
}

/// Split `/path?a=1&b=2` into the decoded path and query map.  Later
/// duplicates of a key win.
pub fn parse_target(target: &str) -> (String, HashMap<String, String>) {
    let (path, query) = target.split_once('?').unwrap_or((target, ""));
    let params = query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (percent_decode(key), percent_decode(value))
        })
        .collect();
    (percent_decode(path), params)
}

/// Decode `%XX` escapes and `+` (as space).  Invalid escapes are kept
/// verbatim.
pub fn percent_decode(input: &str) -> String {
    fn hex(byte: u8) -> Option<u8> {
        char::from(byte).to_digit(16).map(|d| d as u8)
    }

    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => out.push(b' '),
            b'%' => {
                let escaped = bytes
                    .get(i + 1)
                    .zip(bytes.get(i + 2))
                    .and_then(|(hi, lo)| Some(hex(*hi)? << 4 | hex(*lo)?));
                match escaped {
                    Some(byte) => {
                        out.push(byte);
                        i += 2;
                    }
                    None => out.push(b'%'),
                }
            }
            byte => out.push(byte),
        }
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        409 => "Conflict",
        _ => "Internal Server Error",
    }
}

pub fn status_for(class: ErrorClass) -> u16 {
    match class {
        ErrorClass::Client => 400,
        ErrorClass::NotFound => 404,
        ErrorClass::Conflict => 409,
        ErrorClass::Server => 500,
    }
}

/// Write a status line and headers for a body of unknown length.
pub async fn write_head<W>(
    writer: &mut W,
    status: u16,
    content_type: &str,
) -> Result<(), RoverError>
where
    W: AsyncWrite + Unpin,
{
    let head = format!(
        "HTTP/1.1 {status} {}\r\n\
         Content-Type: {content_type}\r\n\
         Cache-Control: no-cache\r\n\
         Connection: close\r\n\
         \r\n",
        reason(status)
    );
    writer.write_all(head.as_bytes()).await.map_err(io_error)?;
    writer.flush().await.map_err(io_error)
}

/// Write a complete JSON response.
pub async fn write_json<W, T>(writer: &mut W, status: u16, body: &T) -> Result<(), RoverError>
where
    W: AsyncWrite + Unpin,
    T: Serialize + ?Sized,
{
    let body = serde_json::to_string(body).map_err(|e| RoverError::Io(e.to_string()))?;
    let retry = if status == 409 { "Retry-After: 1\r\n" } else { "" };
    let response = format!(
        "HTTP/1.1 {status} {}\r\n\
         Content-Type: {CONTENT_JSON}\r\n\
         Content-Length: {}\r\n\
         {retry}\
         Connection: close\r\n\
         \r\n\
         {body}",
        reason(status),
        body.len(),
    );
    writer.write_all(response.as_bytes()).await.map_err(io_error)?;
    writer.flush().await.map_err(io_error)
}

/// Write `err` as `{"status": "error", "message": ...}` with its class's
/// status code.
pub async fn write_error<W>(writer: &mut W, err: &RoverError) -> Result<(), RoverError>
where
    W: AsyncWrite + Unpin,
{
    let body = json!({ "status": "error", "message": err.to_string() });
    write_json(writer, status_for(err.class()), &body).await
}

/// Append one newline-terminated JSON value to a streaming body.
pub async fn write_ndjson_line<W, T>(writer: &mut W, value: &T) -> Result<(), RoverError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut line = serde_json::to_vec(value).map_err(|e| RoverError::Io(e.to_string()))?;
    line.push(b'\n');
    writer.write_all(&line).await.map_err(io_error)?;
    writer.flush().await.map_err(io_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    async fn parse(raw: &str) -> Result<Option<HttpRequest>, RoverError> {
        let mut reader = BufReader::new(raw.as_bytes());
        read_request(&mut reader).await
    }

    #[tokio::test]
    async fn parses_get_with_query() {
        let req = parse("GET /move?direction=forward&speed=60 HTTP/1.1\r\nHost: robot\r\n\r\n")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(req.method, "GET");
        assert_eq!(req.action(), "move");
        assert_eq!(req.query.get("direction").map(String::as_str), Some("forward"));
        assert_eq!(req.query.get("speed").map(String::as_str), Some("60"));
    }

    #[tokio::test]
    async fn empty_connection_is_none() {
        assert_eq!(parse("").await.unwrap(), None);
    }

    #[tokio::test]
    async fn garbage_is_client_error() {
        let err = parse("hello\r\n\r\n").await.unwrap_err();
        assert_eq!(err.class(), ErrorClass::Client);
    }

    #[tokio::test]
    async fn oversized_head_is_rejected() {
        let raw = format!("GET / HTTP/1.1\r\nX-Pad: {}\r\n\r\n", "a".repeat(MAX_HEAD_BYTES));
        assert!(parse(&raw).await.is_err());
    }

    #[tokio::test]
    async fn endless_line_stops_at_head_limit() {
        const STREAM: u64 = 4 * 1024 * 1024;
        let mut reader = BufReader::new(tokio::io::repeat(b'a').take(STREAM));
        let err = read_request(&mut reader).await.unwrap_err();
        assert_eq!(err.class(), ErrorClass::Client);

        // Only the head budget plus one buffer fill may have been pulled.
        let pulled = STREAM - reader.get_ref().limit();
        assert!(pulled <= (MAX_HEAD_BYTES + 8 * 1024) as u64, "pulled {pulled} bytes");
    }

    #[tokio::test]
    async fn endless_header_stops_at_head_limit() {
        const STREAM: u64 = 4 * 1024 * 1024;
        let head = b"GET /state HTTP/1.1\r\nX-Pad: ".as_slice();
        let mut reader = BufReader::new(head.chain(tokio::io::repeat(b'a').take(STREAM)));
        let err = read_request(&mut reader).await.unwrap_err();
        assert_eq!(err.class(), ErrorClass::Client);

        let pulled = STREAM - reader.get_ref().get_ref().1.limit();
        assert!(pulled <= (MAX_HEAD_BYTES + 8 * 1024) as u64, "pulled {pulled} bytes");
    }

    #[tokio::test]
    async fn non_utf8_request_line_is_client_error() {
        let raw: &[u8] = b"GET /\xff\xfe HTTP/1.1\r\n\r\n";
        let mut reader = BufReader::new(raw);
        let err = read_request(&mut reader).await.unwrap_err();
        assert!(matches!(err, RoverError::InvalidInput(_)));
        assert_eq!(status_for(err.class()), 400);
    }

    #[test]
    fn decodes_escapes() {
        assert_eq!(percent_decode("close%5Farm"), "close_arm");
        assert_eq!(percent_decode("a+b"), "a b");
        assert_eq!(percent_decode("100%"), "100%");
        assert_eq!(percent_decode("%zz"), "%zz");

        let (path, query) = parse_target("/move?direction=&speed");
        assert_eq!(path, "/move");
        assert_eq!(query.get("direction").map(String::as_str), Some(""));
        assert_eq!(query.get("speed").map(String::as_str), Some(""));
    }

    #[test]
    fn error_classes_map_to_status() {
        assert_eq!(status_for(ErrorClass::Client), 400);
        assert_eq!(status_for(ErrorClass::NotFound), 404);
        assert_eq!(status_for(ErrorClass::Conflict), 409);
        assert_eq!(status_for(ErrorClass::Server), 500);
    }

    #[tokio::test]
    async fn error_response_shape() {
        let mut out = Vec::new();
        write_error(&mut out, &RoverError::NotFound("unknown arm action 'wave'".into()))
            .await
            .unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("HTTP/1.1 404 Not Found\r\n"));
        let body = text.split("\r\n\r\n").nth(1).unwrap();
        let value: serde_json::Value = serde_json::from_str(body).unwrap();
        assert_eq!(value["status"], "error");
        assert!(value["message"].as_str().unwrap().contains("wave"));
    }
}
