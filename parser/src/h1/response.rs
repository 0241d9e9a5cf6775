//! HTTP/1.1 Response head construction
//!
//! Every response this server writes goes through [`Response`]: status line,
//! the fixed header set (`Content-Type`, `Content-Length`, `Server`,
//! `Connection: close`), any extra headers, and an optional in-memory body.
//! Bodies streamed from disk bypass the struct; callers set the
//! `Content-Length` explicitly and write the bytes after the head.

use std::fmt::Write as _;
use std::io::{self, Write};

use crate::status::Status;

/// Server identity advertised on every response.
pub const SERVER_NAME: &str = concat!("sluse/", env!("CARGO_PKG_VERSION"));

/// A response head plus an optional in-memory body.
#[derive(Debug)]
pub struct Response {
    status: Status,
    content_type: &'static str,
    headers: Vec<(&'static str, String)>,
    body: Vec<u8>,
    content_length: Option<u64>,
}

impl Response {
    /// Creates an empty response with the given status and content type.
    pub fn new(status: Status, content_type: &'static str) -> Self {
        Response {
            status,
            content_type,
            headers: Vec::new(),
            body: Vec::new(),
            content_length: None,
        }
    }

    /// The minimal HTML error page for `status`. 503 pages carry the
    /// `Retry-After: 1` backpressure header.
    pub fn error_page(status: Status) -> Self {
        let body = format!("<h1>{} {}</h1>\n", status.code(), status.reason());
        let response = Response::new(status, "text/html").with_body(body);

        match status {
            Status::ServiceUnavailable => response.with_header("Retry-After", "1"),
            _ => response,
        }
    }

    /// Attaches an in-memory body.
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Appends an extra header.
    pub fn with_header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }

    /// Overrides `Content-Length` for a body the caller streams itself.
    pub fn with_content_length(mut self, len: u64) -> Self {
        self.content_length = Some(len);
        self
    }

    /// Response status.
    #[inline]
    pub fn status(&self) -> Status {
        self.status
    }

    /// The advertised `Content-Length`.
    #[inline]
    pub fn content_length(&self) -> u64 {
        self.content_length.unwrap_or(self.body.len() as u64)
    }

    /// Serializes the status line and headers, terminated by the empty line.
    pub fn head(&self) -> String {
        let mut head = String::with_capacity(160);
        let _ = write!(
            head,
            "HTTP/1.1 {} {}\r\n",
            self.status.code(),
            self.status.reason()
        );
        let _ = write!(head, "Content-Type: {}\r\n", self.content_type);
        let _ = write!(head, "Content-Length: {}\r\n", self.content_length());
        let _ = write!(head, "Server: {SERVER_NAME}\r\n");
        for (name, value) in &self.headers {
            let _ = write!(head, "{name}: {value}\r\n");
        }
        head.push_str("Connection: close\r\n\r\n");

        head
    }

    /// Writes the head, then the body unless `head_only`. Returns the number
    /// of body bytes written.
    pub fn send(&self, stream: &mut impl Write, head_only: bool) -> io::Result<u64> {
        stream.write_all(self.head().as_bytes())?;
        if head_only || self.body.is_empty() {
            stream.flush()?;
            return Ok(0);
        }

        stream.write_all(&self.body)?;
        stream.flush()?;
        Ok(self.body.len() as u64)
    }
}
