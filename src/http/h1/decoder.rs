//! Incremental HTTP/1.1 response decoder.
//!
//! [`ResponseDecoder`] consumes the response byte stream in whatever
//! fragments the transport delivers and resumes exactly where the previous
//! fragment stopped. A fragment boundary may fall anywhere: inside the status
//! line, inside a header, inside a chunk-size line or its CRLF, or inside
//! chunk data.
//!
//! # Framing
//!
//! Once the header terminator is found the head is parsed once and the body
//! framing is fixed. The status line only has to be present; header lines
//! without a usable `name:` are skipped. Framing then follows:
//!
//! 1. `204`/`304` responses have no body.
//! 2. A `Content-Length` made only of digits selects length framing. Any other
//!    value is ignored.
//! 3. A `Transfer-Encoding` whose last coding is `chunked` selects chunked
//!    framing.
//! 4. Otherwise the body runs until the peer closes the stream.
//!
//! Bytes past a declared length, and anything after the zero-size chunk
//! (trailers, final CRLF), are ignored.
//!
//! # Memory bounds
//!
//! The unparsed head is capped by [`DecoderLimits::max_header_size`] and a
//! chunk-size line by [`MAX_CHUNK_LINE_LEN`]. Body bytes are moved into the
//! body as they arrive and capped by [`DecoderLimits::max_body_size`].

use crate::http::h1::types::{Response, ResponseHead, Version};
use memchr::{memchr, memmem};
use std::mem;

/// Default cap on the status line plus header block (64 KiB).
pub const DEFAULT_MAX_HEADER_SIZE: usize = 64 * 1024;

/// Default cap on a decoded body (64 MiB).
pub const DEFAULT_MAX_BODY_SIZE: usize = 64 * 1024 * 1024;

/// Cap on a single chunk-size line, extensions included.
pub const MAX_CHUNK_LINE_LEN: usize = 4096;

const HEAD_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Why a response could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// The head grew past the configured limit without terminating.
    #[error("response head exceeds {limit} bytes")]
    HeadTooLarge {
        /// Configured limit.
        limit: usize,
    },
    /// The head has no status line.
    #[error("missing status line")]
    BadStatusLine,
    /// A chunk-size line is not hexadecimal.
    #[error("invalid chunk size")]
    InvalidChunkSize,
    /// A chunk-size line grew past [`MAX_CHUNK_LINE_LEN`].
    #[error("chunk size line too long")]
    ChunkLineTooLong,
    /// Chunk data was not followed by CRLF.
    #[error("chunk data not terminated by CRLF")]
    BadChunkTerminator,
    /// The body grew past the configured limit.
    #[error("body exceeds {limit} bytes")]
    BodyTooLarge {
        /// Configured limit.
        limit: usize,
    },
    /// The stream ended before the head was complete.
    #[error("stream ended before response head was complete")]
    IncompleteHead,
    /// The stream ended before `Content-Length` bytes arrived.
    #[error("stream ended after {received} of {expected} body bytes")]
    IncompleteBody {
        /// Declared length.
        expected: u64,
        /// Body bytes received.
        received: u64,
    },
    /// The stream ended before the zero-size chunk.
    #[error("stream ended inside chunked body")]
    IncompleteChunkedBody,
    /// Input was fed after the decoder reached a terminal result.
    #[error("decoder already finished")]
    Finished,
}

/// Outcome of one [`ResponseDecoder::feed`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decode {
    /// The response is not complete yet.
    NeedMoreData,
    /// The response is complete.
    Complete(Response),
    /// The response is malformed; the decoder is finished.
    Malformed(ParseError),
}

/// How the body of the current response is delimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFraming {
    /// No body (`204`, `304`).
    Empty,
    /// Exactly this many bytes.
    Length(u64),
    /// `Transfer-Encoding: chunked`.
    Chunked,
    /// Everything until the peer closes the stream.
    UntilClose,
}

/// Size limits applied while decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecoderLimits {
    /// Cap on the status line plus headers, terminator included.
    pub max_header_size: usize,
    /// Cap on the decoded body.
    pub max_body_size: usize,
}

impl Default for DecoderLimits {
    fn default() -> Self {
        Self {
            max_header_size: DEFAULT_MAX_HEADER_SIZE,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkPhase {
    SizeLine,
    Data { remaining: usize },
    DataCrlf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Accumulating the head; `scanned` bytes are known not to complete
    /// the terminator search.
    Head { scanned: usize },
    Length { remaining: u64 },
    Chunked(ChunkPhase),
    UntilClose,
    Done,
    Failed,
}

/// Resumable response decoder.
#[derive(Debug)]
pub struct ResponseDecoder {
    state: State,
    limits: DecoderLimits,
    /// Unparsed head bytes, or a partial chunk-size line / chunk CRLF.
    pending: Vec<u8>,
    head: Option<ResponseHead>,
    framing: Option<BodyFraming>,
    body: Vec<u8>,
    bytes_fed: u64,
}

impl Default for ResponseDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseDecoder {
    /// Creates a decoder with default limits.
    #[must_use]
    pub fn new() -> Self {
        Self::with_limits(DecoderLimits::default())
    }

    /// Creates a decoder with explicit limits.
    #[must_use]
    pub fn with_limits(limits: DecoderLimits) -> Self {
        Self {
            state: State::Head { scanned: 0 },
            limits,
            pending: Vec::new(),
            head: None,
            framing: None,
            body: Vec::new(),
            bytes_fed: 0,
        }
    }

    /// The parsed head, once the header block has arrived.
    #[must_use]
    pub fn head(&self) -> Option<&ResponseHead> {
        self.head.as_ref()
    }

    /// The body framing, once the header block has arrived.
    #[must_use]
    pub fn framing(&self) -> Option<BodyFraming> {
        self.framing
    }

    /// Total bytes passed to [`feed`](Self::feed).
    #[must_use]
    pub fn bytes_fed(&self) -> u64 {
        self.bytes_fed
    }

    /// Body bytes decoded so far.
    #[must_use]
    pub fn body_len(&self) -> usize {
        self.body.len()
    }

    /// Returns true once a complete or malformed result was produced.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        matches!(self.state, State::Done | State::Failed)
    }

    /// Returns true while the head is still being accumulated.
    #[must_use]
    pub fn in_head(&self) -> bool {
        matches!(self.state, State::Head { .. })
    }

    /// Consumes the next fragment of the response stream.
    ///
    /// An empty fragment never changes state.
    pub fn feed(&mut self, bytes: &[u8]) -> Decode {
        if self.is_finished() {
            return Decode::Malformed(ParseError::Finished);
        }
        if bytes.is_empty() {
            return Decode::NeedMoreData;
        }
        self.bytes_fed += bytes.len() as u64;

        if let State::Head { .. } = self.state {
            self.pending.extend_from_slice(bytes);
            return self.advance_head();
        }
        self.consume_body(bytes)
    }

    /// Signals that the peer closed the stream.
    pub fn end_of_stream(&mut self) -> Decode {
        match self.state {
            State::Done | State::Failed => Decode::Malformed(ParseError::Finished),
            State::UntilClose => self.complete(),
            State::Head { .. } => self.fail(ParseError::IncompleteHead),
            State::Length { remaining } => {
                let received = self.body.len() as u64;
                self.fail(ParseError::IncompleteBody {
                    expected: received + remaining,
                    received,
                })
            }
            State::Chunked(_) => self.fail(ParseError::IncompleteChunkedBody),
        }
    }

    fn advance_head(&mut self) -> Decode {
        loop {
            let State::Head { scanned } = self.state else {
                return Decode::NeedMoreData;
            };
            // Resume a few bytes early so a terminator split across
            // fragments is still found.
            let from = scanned.saturating_sub(HEAD_TERMINATOR.len() - 1);
            let Some(pos) = memmem::find(&self.pending[from..], HEAD_TERMINATOR) else {
                if self.pending.len() > self.limits.max_header_size {
                    return self.fail(ParseError::HeadTooLarge {
                        limit: self.limits.max_header_size,
                    });
                }
                self.state = State::Head {
                    scanned: self.pending.len(),
                };
                return Decode::NeedMoreData;
            };

            let end = from + pos + HEAD_TERMINATOR.len();
            if end > self.limits.max_header_size {
                return self.fail(ParseError::HeadTooLarge {
                    limit: self.limits.max_header_size,
                });
            }
            let head = match parse_head(&self.pending[..end - HEAD_TERMINATOR.len()]) {
                Ok(head) => head,
                Err(err) => return self.fail(err),
            };
            let rest = self.pending.split_off(end);
            self.pending.clear();

            // Interim responses precede the real one on the same stream.
            if head.is_informational() && head.status != 101 {
                self.pending = rest;
                self.state = State::Head { scanned: 0 };
                continue;
            }

            let framing = body_framing(&head);
            if let BodyFraming::Length(len) = framing {
                if len > self.limits.max_body_size as u64 {
                    return self.fail(ParseError::BodyTooLarge {
                        limit: self.limits.max_body_size,
                    });
                }
            }
            self.state = match framing {
                BodyFraming::Empty => State::Length { remaining: 0 },
                BodyFraming::Length(len) => State::Length { remaining: len },
                BodyFraming::Chunked => State::Chunked(ChunkPhase::SizeLine),
                BodyFraming::UntilClose => State::UntilClose,
            };
            self.head = Some(head);
            self.framing = Some(framing);
            return self.consume_body(&rest);
        }
    }

    fn consume_body(&mut self, mut input: &[u8]) -> Decode {
        loop {
            match self.state {
                State::Length { remaining } => {
                    let take = remaining.min(input.len() as u64) as usize;
                    self.body.extend_from_slice(&input[..take]);
                    let remaining = remaining - take as u64;
                    if remaining == 0 {
                        return self.complete();
                    }
                    self.state = State::Length { remaining };
                    return Decode::NeedMoreData;
                }
                State::UntilClose => {
                    if self.body.len() + input.len() > self.limits.max_body_size {
                        return self.fail(ParseError::BodyTooLarge {
                            limit: self.limits.max_body_size,
                        });
                    }
                    self.body.extend_from_slice(input);
                    return Decode::NeedMoreData;
                }
                State::Chunked(ChunkPhase::SizeLine) => {
                    let Some(newline) = memchr(b'\n', input) else {
                        if self.pending.len() + input.len() > MAX_CHUNK_LINE_LEN {
                            return self.fail(ParseError::ChunkLineTooLong);
                        }
                        self.pending.extend_from_slice(input);
                        return Decode::NeedMoreData;
                    };
                    if self.pending.len() + newline > MAX_CHUNK_LINE_LEN {
                        return self.fail(ParseError::ChunkLineTooLong);
                    }
                    self.pending.extend_from_slice(&input[..=newline]);
                    input = &input[newline + 1..];

                    let line = mem::take(&mut self.pending);
                    let size = match parse_chunk_size_line(&line) {
                        Ok(size) => size,
                        Err(err) => return self.fail(err),
                    };
                    if size == 0 {
                        return self.complete();
                    }
                    if self.body.len().saturating_add(size) > self.limits.max_body_size {
                        return self.fail(ParseError::BodyTooLarge {
                            limit: self.limits.max_body_size,
                        });
                    }
                    self.state = State::Chunked(ChunkPhase::Data { remaining: size });
                }
                State::Chunked(ChunkPhase::Data { remaining }) => {
                    if input.is_empty() {
                        return Decode::NeedMoreData;
                    }
                    let take = remaining.min(input.len());
                    self.body.extend_from_slice(&input[..take]);
                    input = &input[take..];
                    self.state = if take == remaining {
                        State::Chunked(ChunkPhase::DataCrlf)
                    } else {
                        State::Chunked(ChunkPhase::Data {
                            remaining: remaining - take,
                        })
                    };
                }
                State::Chunked(ChunkPhase::DataCrlf) => {
                    let missing = 2 - self.pending.len();
                    let take = missing.min(input.len());
                    self.pending.extend_from_slice(&input[..take]);
                    input = &input[take..];
                    if self.pending.len() < 2 {
                        return Decode::NeedMoreData;
                    }
                    if self.pending != b"\r\n" {
                        return self.fail(ParseError::BadChunkTerminator);
                    }
                    self.pending.clear();
                    self.state = State::Chunked(ChunkPhase::SizeLine);
                }
                State::Head { .. } | State::Done | State::Failed => {
                    return Decode::NeedMoreData;
                }
            }
        }
    }

    fn complete(&mut self) -> Decode {
        let Some(head) = self.head.clone() else {
            return self.fail(ParseError::IncompleteHead);
        };
        self.state = State::Done;
        self.pending = Vec::new();
        Decode::Complete(Response {
            head,
            body: mem::take(&mut self.body),
        })
    }

    fn fail(&mut self, err: ParseError) -> Decode {
        self.state = State::Failed;
        self.pending = Vec::new();
        self.body = Vec::new();
        Decode::Malformed(err)
    }
}

fn body_framing(head: &ResponseHead) -> BodyFraming {
    if matches!(head.status, 204 | 304) {
        return BodyFraming::Empty;
    }
    if let Some(len) = head.header("content-length").and_then(parse_content_length) {
        return BodyFraming::Length(len);
    }
    let chunked = head.header("transfer-encoding").is_some_and(|te| {
        te.rsplit(',')
            .next()
            .is_some_and(|last| last.trim().eq_ignore_ascii_case("chunked"))
    });
    if chunked {
        BodyFraming::Chunked
    } else {
        BodyFraming::UntilClose
    }
}

fn parse_content_length(value: &str) -> Option<u64> {
    let value = value.trim();
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    value.parse().ok()
}

/// Parses `SIZE[;ext...]\r\n` (a bare `\n` terminator is tolerated).
fn parse_chunk_size_line(line: &[u8]) -> Result<usize, ParseError> {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    let size_part = match memchr(b';', line) {
        Some(semi) => &line[..semi],
        None => line,
    };
    let size_part = size_part.trim_ascii();
    if size_part.is_empty() || !size_part.iter().all(u8::is_ascii_hexdigit) {
        return Err(ParseError::InvalidChunkSize);
    }
    // Only ASCII hex digits remain, so the slice is valid UTF-8.
    let digits = std::str::from_utf8(size_part).map_err(|_| ParseError::InvalidChunkSize)?;
    usize::from_str_radix(digits, 16).map_err(|_| ParseError::InvalidChunkSize)
}

fn parse_head(block: &[u8]) -> Result<ResponseHead, ParseError> {
    let mut lines = block
        .split(|&b| b == b'\n')
        .map(|line| line.strip_suffix(b"\r").unwrap_or(line));
    let status_line = lines
        .next()
        .map(<[u8]>::trim_ascii)
        .filter(|line| !line.is_empty())
        .ok_or(ParseError::BadStatusLine)?;
    let (version, status, reason) = parse_status_line(status_line);

    let mut headers: Vec<(String, String)> = Vec::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        // obs-fold: a continuation line extends the previous value.
        if matches!(line[0], b' ' | b'\t') {
            if let Some((_, value)) = headers.last_mut() {
                let more = String::from_utf8_lossy(line.trim_ascii());
                if !more.is_empty() {
                    value.push(' ');
                    value.push_str(&more);
                }
            }
            continue;
        }
        if let Some(header) = parse_header_line(line) {
            headers.push(header);
        }
    }

    Ok(ResponseHead {
        version,
        status,
        reason,
        headers,
    })
}

/// Splits `Name: value`. Lines without a usable name are skipped.
fn parse_header_line(line: &[u8]) -> Option<(String, String)> {
    let colon = memchr(b':', line)?;
    let name = line[..colon].trim_ascii();
    if name.is_empty() || name.iter().any(|b| b.is_ascii_whitespace()) {
        return None;
    }
    let name = std::str::from_utf8(name).ok()?;
    let value = String::from_utf8_lossy(line[colon + 1..].trim_ascii()).into_owned();
    Some((name.to_owned(), value))
}

/// Reads `VERSION CODE [reason]` best-effort.
///
/// An unrecognized version reads as HTTP/1.1 and a code that is not three
/// digits reads as `0`; neither affects body framing.
fn parse_status_line(line: &[u8]) -> (Version, u16, String) {
    let mut parts = line.splitn(3, |&b| b == b' ');
    let version = parts
        .next()
        .and_then(Version::from_bytes)
        .unwrap_or(Version::Http11);
    let status = parts
        .next()
        .filter(|code| code.len() == 3 && code.iter().all(u8::is_ascii_digit))
        .map_or(0, |code| {
            code.iter()
                .fold(0u16, |acc, digit| acc * 10 + u16::from(digit - b'0'))
        });
    let reason = parts
        .next()
        .map(|r| String::from_utf8_lossy(r.trim_ascii()).into_owned())
        .unwrap_or_default();
    (version, status, reason)
}
