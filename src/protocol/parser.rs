//! Incremental RESP Parser
//!
//! The parser works over a byte buffer that may hold a partial frame, exactly
//! one frame, or several frames back to back. Each call returns:
//! - `Ok(Some((value, consumed)))` - one complete frame, `consumed` bytes long
//! - `Ok(None)` - the frame is incomplete, read more bytes and retry
//! - `Err(ParseError)` - the bytes cannot be a valid frame
//!
//! Every frame's total size is determined by bytes already read (type tag,
//! then a CRLF-terminated header, then for bulk strings exactly `length`
//! payload bytes), so the parser never backtracks into a payload looking for
//! a terminator. A bulk payload may therefore contain `\r\n`.

use crate::protocol::types::{prefix, RespValue, CRLF};
use bytes::Bytes;
use thiserror::Error;

/// Errors that can occur during RESP parsing.
///
/// All of them are fatal for the stream they came from: after a framing
/// violation there is no reliable way to find the start of the next frame.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Unknown type prefix byte
    #[error("unknown type prefix: {0:#04x}")]
    UnknownPrefix(u8),

    /// Integer value or length header is not a base-10 signed integer
    #[error("invalid integer: {0}")]
    InvalidInteger(String),

    /// Invalid UTF-8 in a simple string or error message
    #[error("invalid UTF-8: {0}")]
    InvalidUtf8(String),

    /// Array count is negative
    #[error("invalid array length: {0}")]
    InvalidArrayLength(i64),

    /// Structural violation (missing CRLF, nesting too deep)
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Declared bulk length exceeds the limit
    #[error("message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },
}

pub type ParseResult<T> = Result<T, ParseError>;

/// Maximum size for a single bulk string (512 MB, same as Redis)
pub const MAX_BULK_SIZE: usize = 512 * 1024 * 1024;

/// Maximum array nesting depth (prevent stack overflow)
pub const MAX_NESTING_DEPTH: usize = 32;

/// A recursive-descent RESP parser.
///
/// # Example
///
/// ```
/// use emberkv::protocol::{RespParser, RespValue};
/// use bytes::Bytes;
///
/// let mut parser = RespParser::new();
/// let (value, consumed) = parser.parse(b"$5\r\nhello\r\n").unwrap().unwrap();
/// assert_eq!(value, RespValue::bulk_string(Bytes::from("hello")));
/// assert_eq!(consumed, 11);
/// ```
#[derive(Debug, Default)]
pub struct RespParser {
    /// Current array nesting depth
    depth: usize,
}

impl RespParser {
    pub fn new() -> Self {
        Self { depth: 0 }
    }

    /// Attempts to parse one frame from the start of `buf`.
    pub fn parse(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        self.depth = 0;
        self.parse_value(buf)
    }

    fn parse_value(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        if buf.is_empty() {
            return Ok(None);
        }

        if self.depth > MAX_NESTING_DEPTH {
            return Err(nesting_error());
        }

        match next_token(buf)? {
            Token::Value { value, consumed } => Ok(Some((value, consumed))),
            Token::ArrayHeader { count, consumed } => {
                self.depth += 1;
                let result = self.parse_elements(buf, consumed, count);
                self.depth -= 1;
                result
            }
            Token::Incomplete { .. } => Ok(None),
        }
    }

    fn parse_elements(
        &mut self,
        buf: &[u8],
        mut consumed: usize,
        count: usize,
    ) -> ParseResult<Option<(RespValue, usize)>> {
        // A hostile count must not pre-allocate more than the buffer could hold.
        let mut elements = Vec::with_capacity(count.min(buf.len() - consumed));

        for _ in 0..count {
            match self.parse_value(&buf[consumed..])? {
                Some((value, used)) => {
                    elements.push(value);
                    consumed += used;
                }
                None => return Ok(None),
            }
        }

        Ok(Some((RespValue::Array(elements), consumed)))
    }
}

/// One decoding step at the start of a buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Token {
    /// A complete value that is not an array
    Value { value: RespValue, consumed: usize },
    /// An array header; `count` elements follow
    ArrayHeader { count: usize, consumed: usize },
    /// More bytes are needed. `needed` is the buffer length at which the
    /// token completes, or 0 while its header is still unterminated.
    Incomplete { needed: usize },
}

/// Reads the next token without descending into arrays.
pub(crate) fn next_token(buf: &[u8]) -> ParseResult<Token> {
    let Some(&tag) = buf.first() else {
        return Ok(Token::Incomplete { needed: 1 });
    };

    let token = match tag {
        prefix::SIMPLE_STRING => parse_text(buf)?.map(|(s, consumed)| Token::Value {
            value: RespValue::SimpleString(s),
            consumed,
        }),
        prefix::ERROR => parse_text(buf)?.map(|(s, consumed)| Token::Value {
            value: RespValue::Error(s),
            consumed,
        }),
        prefix::INTEGER => parse_header(buf)?.map(|(n, consumed)| Token::Value {
            value: RespValue::Integer(n),
            consumed,
        }),
        prefix::BULK_STRING => return parse_bulk_string(buf),
        prefix::ARRAY => match parse_header(buf)? {
            Some((count, consumed)) => {
                let count =
                    usize::try_from(count).map_err(|_| ParseError::InvalidArrayLength(count))?;
                Some(Token::ArrayHeader { count, consumed })
            }
            None => None,
        },
        other => return Err(ParseError::UnknownPrefix(other)),
    };

    Ok(token.unwrap_or(Token::Incomplete { needed: 0 }))
}

pub(crate) fn nesting_error() -> ParseError {
    ParseError::Protocol(format!(
        "maximum nesting depth exceeded: {}",
        MAX_NESTING_DEPTH
    ))
}

/// Parses `<tag><text>\r\n` into its UTF-8 text.
fn parse_text(buf: &[u8]) -> ParseResult<Option<(String, usize)>> {
    let Some(pos) = find_crlf(&buf[1..]) else {
        return Ok(None);
    };

    let text = std::str::from_utf8(&buf[1..1 + pos])
        .map_err(|e| ParseError::InvalidUtf8(e.to_string()))?;

    // +1 for the tag, +2 for CRLF
    Ok(Some((text.to_string(), 1 + pos + 2)))
}

/// Parses `<tag><integer>\r\n`, the shape shared by integers and the
/// length headers of bulk strings and arrays.
fn parse_header(buf: &[u8]) -> ParseResult<Option<(i64, usize)>> {
    let Some((text, consumed)) = parse_text(buf)? else {
        return Ok(None);
    };

    let n = text
        .parse::<i64>()
        .map_err(|e| ParseError::InvalidInteger(format!("{:?}: {}", text, e)))?;

    Ok(Some((n, consumed)))
}

/// Parses a bulk string: `$<length>\r\n<data>\r\n`, or `$-1\r\n` for nil.
fn parse_bulk_string(buf: &[u8]) -> ParseResult<Token> {
    let Some((length, data_start)) = parse_header(buf)? else {
        return Ok(Token::Incomplete { needed: 0 });
    };

    // Any negative length is the nil bulk string; no payload follows.
    if length < 0 {
        return Ok(Token::Value {
            value: RespValue::Null,
            consumed: data_start,
        });
    }

    let length = length as usize;
    if length > MAX_BULK_SIZE {
        return Err(ParseError::MessageTooLarge {
            size: length,
            max: MAX_BULK_SIZE,
        });
    }

    let data_end = data_start + length;
    let total = data_end + CRLF.len();
    if buf.len() < total {
        return Ok(Token::Incomplete { needed: total });
    }

    if &buf[data_end..total] != CRLF {
        return Err(ParseError::Protocol(
            "bulk string missing trailing CRLF".to_string(),
        ));
    }

    let data = Bytes::copy_from_slice(&buf[data_start..data_end]);
    Ok(Token::Value {
        value: RespValue::BulkString(data),
        consumed: total,
    })
}

/// Returns the offset of the first `\r\n` in `buf`.
#[inline]
fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == CRLF)
}

/// Parses a single frame with a fresh parser.
pub fn parse_message(buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
    RespParser::new().parse(buf)
}
