// Copyright 2026 The sluse Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! HTTP/1.1 Request line
//! IETF RFC 9112 Section 3

use std::str::from_utf8;

use super::ParseError;
use crate::raw_request::RawRequest;
use crate::{Method, Version};

/// A parsed request line: method, origin-form target, version.
///
/// The server reads each request in a single shot, so only the first line is
/// tokenized; everything after the version is left untouched.
#[derive(Debug, PartialEq, Eq)]
pub struct RequestLine<'buf> {
    /// Request method.
    pub method: Method,
    /// Request target in origin form (`/path?query`).
    pub target: &'buf str,
    /// Protocol version.
    pub version: Version,
}

impl<'b> RequestLine<'b> {
    /// Parses the request line at the start of `buf`.
    ///
    /// # Example
    /// ```
    /// # use parser::h1::ParseError;
    /// # use parser::h1::request::RequestLine;
    /// # use parser::{Method, Version};
    /// # fn main() -> Result<(), ParseError> {
    /// let line = RequestLine::parse(b"GET /index.html HTTP/1.1\r\nHost: a\r\n\r\n")?;
    /// assert_eq!(Method::Get, line.method);
    /// assert_eq!("/index.html", line.target);
    /// assert_eq!(Version::H1_1, line.version);
    /// # Ok(())
    /// # }
    /// ```
    pub fn parse(buf: &'b [u8]) -> Result<Self, ParseError> {
        let mut req = RawRequest::new(buf);
        let method = parse_method(&mut req)?;
        let target = parse_target(&mut req)?;
        let version = parse_version(&mut req)?;

        Ok(RequestLine {
            method,
            target,
            version,
        })
    }
}

fn parse_method(buf: &mut RawRequest<'_>) -> Result<Method, ParseError> {
    for &b in &mut *buf {
        if b == b' ' {
            let token = buf.slice_skip(1).map_err(|_| ParseError::Method)?;
            return match token {
                b"GET" => Ok(Method::Get),
                b"HEAD" => Ok(Method::Head),
                b"POST" => Ok(Method::Post),
                b"PUT" => Ok(Method::Put),
                b"DELETE" => Ok(Method::Delete),
                b"CONNECT" => Ok(Method::Connect),
                b"OPTIONS" => Ok(Method::Options),
                b"TRACE" => Ok(Method::Trace),
                _ => Err(ParseError::Method),
            };
        }

        if !b.is_ascii_uppercase() {
            break;
        }
    }

    Err(ParseError::Method)
}

fn parse_target<'a>(buf: &mut RawRequest<'a>) -> Result<&'a str, ParseError> {
    for &b in &mut *buf {
        if b == b' ' {
            let token = buf.slice_skip(1).map_err(|_| ParseError::Target)?;
            if token.is_empty() || token[0] != b'/' {
                return Err(ParseError::Target);
            }

            // Every byte has been checked against the visible-ASCII token
            // range, so this cannot fail.
            return from_utf8(token).map_err(|_| ParseError::Target);
        }

        if !is_request_target_token(b) {
            break;
        }
    }

    Err(ParseError::Target)
}

fn parse_version(buf: &mut RawRequest<'_>) -> Result<Version, ParseError> {
    if !buf.take(5).eq(b"HTTP/".iter()) {
        return Err(ParseError::Version);
    }

    let version = match (buf.next(), buf.next(), buf.next()) {
        (Some(b'1'), Some(b'.'), Some(b'0')) => Version::H1_0,
        (Some(b'1'), Some(b'.'), Some(b'1')) => Version::H1_1,
        _ => return Err(ParseError::Version),
    };

    // The request line must end here; anything but CRLF (or end of the
    // single-shot read) is malformed.
    match buf.peek() {
        None | Some(b'\r') | Some(b'\n') => Ok(version),
        Some(_) => Err(ParseError::Version),
    }
}

/// Visible ASCII, excluding SP and DEL.
#[inline]
fn is_request_target_token(b: u8) -> bool {
    b > 0x20 && b < 0x7f
}
