//! HTTP/1.1 client protocol.
//!
//! - [`request`]: [`ParsedUrl`] and the GET [`Request`] encoder
//! - [`decoder`]: [`ResponseDecoder`], the resumable response parser
//! - [`types`]: [`Version`], [`ResponseHead`], [`Response`]

pub mod decoder;
pub mod request;
pub mod types;

pub use decoder::{BodyFraming, Decode, DecoderLimits, ParseError, ResponseDecoder};
pub use request::{ParsedUrl, Request, Scheme, UrlError};
pub use types::{Response, ResponseHead, Version, default_reason};
