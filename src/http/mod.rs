//! HTTP protocol support.
//!
//! Only the HTTP/1.1 client side lives here: request encoding and the
//! incremental response decoder in [`h1`].

pub mod h1;

pub use h1::{
    BodyFraming, Decode, DecoderLimits, ParseError, ParsedUrl, Request, Response, ResponseDecoder,
    ResponseHead, Scheme, UrlError, Version,
};
