//! Incremental HTTP/1.1 response parser.
//!
//! Bytes read from the socket are fed through [`ResponseParser::execute`],
//! which emits head, body-chunk and message-complete events in wire order.
//! Head parsing uses `httparse`; body framing (content-length, chunked,
//! close-delimited) is tracked here.

use bytes::{Buf, Bytes, BytesMut};
use std::collections::VecDeque;

use crate::error::ConnectError;

/// Maximum number of headers to parse
const MAX_HEADERS: usize = 100;

/// Event produced while parsing a response stream.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseEvent {
    /// Status line and headers are complete. `close` is set when the server
    /// will close the connection after this message.
    Head {
        status: u16,
        headers: Vec<(String, String)>,
        close: bool,
    },
    /// A slice of the (still encoded) body.
    Body(Bytes),
    /// The current message is complete.
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Head,
    Length(usize),
    ChunkSize,
    ChunkData(usize),
    ChunkEnd,
    Trailers,
    UntilClose,
}

/// Streaming response parser for one connection.
#[derive(Debug)]
pub struct ResponseParser {
    buf: BytesMut,
    state: State,
    /// One flag per written request, true when its response carries no body (HEAD).
    bodyless: VecDeque<bool>,
}

impl Default for ResponseParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseParser {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(8 * 1024),
            state: State::Head,
            bodyless: VecDeque::new(),
        }
    }

    /// Register that a request was written; `bodyless` is true for HEAD.
    pub fn expect_response(&mut self, bodyless: bool) {
        self.bodyless.push_back(bodyless);
    }

    /// True while a message is partially parsed.
    pub fn in_message(&self) -> bool {
        self.state != State::Head || !self.buf.is_empty()
    }

    /// Feed raw bytes and collect the resulting events.
    pub fn execute(&mut self, data: &[u8]) -> Result<Vec<ParseEvent>, ConnectError> {
        self.buf.extend_from_slice(data);
        let mut events = Vec::new();

        loop {
            let progressed = match self.state {
                State::Head => self.parse_head(&mut events)?,
                State::Length(remaining) => {
                    if self.buf.is_empty() {
                        false
                    } else {
                        let take = remaining.min(self.buf.len());
                        events.push(ParseEvent::Body(self.buf.split_to(take).freeze()));
                        if take == remaining {
                            self.complete(&mut events);
                        } else {
                            self.state = State::Length(remaining - take);
                        }
                        true
                    }
                }
                State::ChunkSize => match httparse::parse_chunk_size(&self.buf) {
                    Ok(httparse::Status::Complete((consumed, size))) => {
                        self.buf.advance(consumed);
                        self.state = if size == 0 {
                            State::Trailers
                        } else {
                            let size = usize::try_from(size).map_err(|_| {
                                ConnectError::Protocol(format!("chunk too large: {}", size))
                            })?;
                            State::ChunkData(size)
                        };
                        true
                    }
                    Ok(httparse::Status::Partial) => false,
                    Err(_) => {
                        return Err(ConnectError::Protocol("invalid chunk size line".into()))
                    }
                },
                State::ChunkData(remaining) => {
                    if self.buf.is_empty() {
                        false
                    } else {
                        let take = remaining.min(self.buf.len());
                        events.push(ParseEvent::Body(self.buf.split_to(take).freeze()));
                        self.state = if take == remaining {
                            State::ChunkEnd
                        } else {
                            State::ChunkData(remaining - take)
                        };
                        true
                    }
                }
                State::ChunkEnd => {
                    if self.buf.len() < 2 {
                        false
                    } else if &self.buf[..2] == b"\r\n" {
                        self.buf.advance(2);
                        self.state = State::ChunkSize;
                        true
                    } else {
                        return Err(ConnectError::Protocol("missing CRLF after chunk".into()));
                    }
                }
                State::Trailers => match find_crlf(&self.buf) {
                    Some(0) => {
                        self.buf.advance(2);
                        self.complete(&mut events);
                        true
                    }
                    Some(pos) => {
                        self.buf.advance(pos + 2);
                        true
                    }
                    None => false,
                },
                State::UntilClose => {
                    if self.buf.is_empty() {
                        false
                    } else {
                        let chunk = self.buf.split().freeze();
                        events.push(ParseEvent::Body(chunk));
                        true
                    }
                }
            };

            if !progressed {
                break;
            }
        }

        Ok(events)
    }

    /// Signal end of stream. Completes a close-delimited body.
    pub fn finish(&mut self) -> Result<Vec<ParseEvent>, ConnectError> {
        match self.state {
            State::UntilClose => {
                let mut events = Vec::new();
                self.complete(&mut events);
                Ok(events)
            }
            State::Head if self.buf.is_empty() => Ok(Vec::new()),
            _ => Err(ConnectError::Closed),
        }
    }

    fn complete(&mut self, events: &mut Vec<ParseEvent>) {
        events.push(ParseEvent::Complete);
        self.state = State::Head;
    }

    fn parse_head(&mut self, events: &mut Vec<ParseEvent>) -> Result<bool, ConnectError> {
        if self.buf.is_empty() {
            return Ok(false);
        }

        let mut raw_headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut response = httparse::Response::new(&mut raw_headers);

        let header_len = match response.parse(&self.buf) {
            Ok(httparse::Status::Complete(len)) => len,
            Ok(httparse::Status::Partial) => return Ok(false),
            Err(e) => return Err(ConnectError::Protocol(format!("invalid response head: {}", e))),
        };

        let status = response.code.unwrap_or(0);
        let mut headers = Vec::with_capacity(response.headers.len());
        let mut content_length = None;
        let mut chunked = false;
        // HTTP/1.0 closes unless told otherwise.
        let mut close = response.version == Some(0);

        for header in response.headers.iter() {
            let value = String::from_utf8_lossy(header.value).to_string();
            if header.name.eq_ignore_ascii_case("content-length") {
                content_length = Some(value.trim().parse::<usize>().map_err(|_| {
                    ConnectError::Protocol(format!("invalid content-length: {}", value))
                })?);
            }
            if header.name.eq_ignore_ascii_case("transfer-encoding")
                && value.to_ascii_lowercase().contains("chunked")
            {
                chunked = true;
            }
            if header.name.eq_ignore_ascii_case("connection") {
                for token in value.split(',').map(str::trim) {
                    if token.eq_ignore_ascii_case("close") {
                        close = true;
                    } else if token.eq_ignore_ascii_case("keep-alive") {
                        close = false;
                    }
                }
            }
            headers.push((header.name.to_string(), value));
        }

        self.buf.advance(header_len);

        // Interim responses (100 Continue, 103 Early Hints) precede the real one.
        if (100..200).contains(&status) && status != 101 {
            tracing::trace!(status, "Skipping interim response");
            return Ok(true);
        }

        let bodyless = self.bodyless.pop_front().unwrap_or(false) || status == 204 || status == 304;
        let next = if bodyless {
            State::Head
        } else if chunked {
            State::ChunkSize
        } else {
            match content_length {
                Some(0) => State::Head,
                Some(len) => State::Length(len),
                None => State::UntilClose,
            }
        };
        // A close-delimited body ends the connection by definition.
        let close = close || next == State::UntilClose;

        events.push(ParseEvent::Head { status, headers, close });
        if next == State::Head {
            self.complete(events);
        } else {
            self.state = next;
        }

        Ok(true)
    }
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}
