//! HTTP/1.1 wire layer.
//!
//! # Data Flow
//! ```text
//! RequestOptions
//!     → request.rs (frame: request line, headers, body)
//!     → written to the tunneled TLS socket
//!
//! socket bytes
//!     → parser.rs (head / body chunk / complete events)
//!     → decode.rs (content decoding, UTF-8, JSON)
//!     → response.rs (Response returned to the caller)
//! ```
//!
//! # Design Decisions
//! - Responses are buffered in full before they are returned
//! - Non-2xx statuses are ordinary responses, never errors
//! - Header values are coerced with literal parsing only

pub mod decode;
pub mod parser;
pub mod request;
pub mod response;

pub use request::{RequestBody, RequestOptions};
pub use response::{Body, HeaderMap, HeaderValue, Response};
