//! Response body decode pipeline.
//!
//! # Data Flow
//! ```text
//! body chunk (raw bytes)
//!     → ContentDecoder (br / gzip / deflate / identity)
//!     → UTF-8 text on end-of-stream
//!     → optional JSON parse
//!     → Response
//! ```
//!
//! A fresh [`ResponseAccumulator`] is created for every response head, so no
//! body state can leak from one request into the next on a shared socket.

use flate2::write::{DeflateDecoder, GzDecoder, ZlibDecoder};
use std::io::Write;

use crate::error::{TunnelError, TunnelResult};
use crate::http::response::{parse_headers, Body, HeaderMap, Response};

const BROTLI_BUFFER_SIZE: usize = 4096;

pub enum InflateSink {
    Gzip(GzDecoder<Vec<u8>>),
    Zlib(ZlibDecoder<Vec<u8>>),
    Raw(DeflateDecoder<Vec<u8>>),
}

/// Streaming content decoder selected by the `content-encoding` header.
pub enum ContentDecoder {
    Identity(Vec<u8>),
    Brotli(Box<brotli::DecompressorWriter<Vec<u8>>>),
    /// gzip and deflate; the container is sniffed from the first bytes.
    Inflate {
        pending: Vec<u8>,
        sink: Option<InflateSink>,
    },
}

impl ContentDecoder {
    pub fn for_encoding(encoding: Option<&str>) -> Self {
        match encoding.map(|e| e.trim().to_ascii_lowercase()).as_deref() {
            Some("br") => ContentDecoder::Brotli(Box::new(brotli::DecompressorWriter::new(
                Vec::new(),
                BROTLI_BUFFER_SIZE,
            ))),
            Some("gzip") | Some("x-gzip") | Some("deflate") => ContentDecoder::Inflate {
                pending: Vec::new(),
                sink: None,
            },
            _ => ContentDecoder::Identity(Vec::new()),
        }
    }

    /// Feed encoded bytes into the pipeline.
    pub fn write(&mut self, chunk: &[u8]) -> TunnelResult<()> {
        match self {
            ContentDecoder::Identity(out) => {
                out.extend_from_slice(chunk);
                Ok(())
            }
            ContentDecoder::Brotli(writer) => writer.write_all(chunk).map_err(decode_err),
            ContentDecoder::Inflate { pending, sink } => {
                if let Some(sink) = sink {
                    return sink.write_all(chunk);
                }
                pending.extend_from_slice(chunk);
                if pending.len() < 2 {
                    return Ok(());
                }
                let mut new_sink = InflateSink::sniff(pending);
                new_sink.write_all(pending)?;
                pending.clear();
                *sink = Some(new_sink);
                Ok(())
            }
        }
    }

    /// Signal end-of-stream and return the decoded bytes.
    pub fn finish(self) -> TunnelResult<Vec<u8>> {
        match self {
            ContentDecoder::Identity(out) => Ok(out),
            ContentDecoder::Brotli(writer) => {
                writer
                    .into_inner()
                    .map_err(|_| TunnelError::Decode("truncated brotli stream".into()))
            }
            ContentDecoder::Inflate { pending, sink } => match sink {
                Some(sink) => sink.finish(),
                None if pending.is_empty() => Ok(Vec::new()),
                None => {
                    let mut sink = InflateSink::sniff(&pending);
                    sink.write_all(&pending)?;
                    sink.finish()
                }
            },
        }
    }
}

impl InflateSink {
    fn sniff(head: &[u8]) -> Self {
        match head {
            [0x1f, 0x8b, ..] => InflateSink::Gzip(GzDecoder::new(Vec::new())),
            [cmf, flg, ..] if cmf & 0x0f == 8 && (u16::from(*cmf) << 8 | u16::from(*flg)) % 31 == 0 => {
                InflateSink::Zlib(ZlibDecoder::new(Vec::new()))
            }
            _ => InflateSink::Raw(DeflateDecoder::new(Vec::new())),
        }
    }

    fn write_all(&mut self, chunk: &[u8]) -> TunnelResult<()> {
        match self {
            InflateSink::Gzip(d) => d.write_all(chunk),
            InflateSink::Zlib(d) => d.write_all(chunk),
            InflateSink::Raw(d) => d.write_all(chunk),
        }
        .map_err(decode_err)
    }

    fn finish(self) -> TunnelResult<Vec<u8>> {
        match self {
            InflateSink::Gzip(d) => d.finish(),
            InflateSink::Zlib(d) => d.finish(),
            InflateSink::Raw(d) => d.finish(),
        }
        .map_err(decode_err)
    }
}

fn decode_err(err: std::io::Error) -> TunnelError {
    TunnelError::Decode(err.to_string())
}

/// Response assembly state for exactly one in-flight request.
pub struct ResponseAccumulator {
    status: u16,
    headers: HeaderMap,
    decoder: ContentDecoder,
    received: bool,
    failed: Option<TunnelError>,
}

impl ResponseAccumulator {
    /// Start a response from its parsed head.
    pub fn begin(status: u16, raw_headers: &[(String, String)], evaluate_headers: bool) -> Self {
        let headers = parse_headers(raw_headers, evaluate_headers);
        let encoding = headers.get("content-encoding").map(|v| v.to_string());
        Self {
            status,
            decoder: ContentDecoder::for_encoding(encoding.as_deref()),
            headers,
            received: false,
            failed: None,
        }
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    /// Push a body chunk. Decoder errors are kept and reported on finish so
    /// the parser can still consume the rest of the message.
    pub fn push(&mut self, chunk: &[u8]) {
        if self.failed.is_some() || chunk.is_empty() {
            return;
        }
        self.received = true;
        if let Err(e) = self.decoder.write(chunk) {
            self.failed = Some(e);
        }
    }

    /// End of message: decode, UTF-8 convert and optionally parse JSON.
    pub fn finish(self, parse_json: bool) -> TunnelResult<Response> {
        if let Some(err) = self.failed {
            return Err(err);
        }

        // Bodyless responses may still name an encoding.
        let bytes = if self.received {
            self.decoder.finish()?
        } else {
            Vec::new()
        };
        let text = String::from_utf8_lossy(&bytes).into_owned();

        let is_json = self
            .headers
            .get("content-type")
            .map(|v| v.to_string().contains("application/json"))
            .unwrap_or(false);

        // HEAD, 204 and 304 carry JSON content types with no body.
        let body = if (is_json || parse_json) && !text.is_empty() {
            Body::Json(serde_json::from_str(&text)?)
        } else {
            Body::Text(text)
        };

        Ok(Response {
            status: self.status,
            headers: self.headers,
            body,
        })
    }
}
