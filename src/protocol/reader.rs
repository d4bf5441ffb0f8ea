//! Streaming Frame Reader
//!
//! Wraps any `AsyncRead` and yields one decoded frame at a time. TCP is a
//! byte stream, so a single read may deliver half a frame or several frames;
//! the reader accumulates bytes in a `BytesMut` until a frame is complete.
//!
//! Frames are decoded one token at a time and every complete token is
//! dropped from the buffer as soon as it is read, so an array that arrives
//! over many reads is never re-parsed from its first element. Arrays still
//! waiting for elements are kept on a stack.
//!
//! Only a declared bulk payload may make the buffer large. Anything else
//! (a header or a simple string still missing its CRLF) is capped at
//! [`MAX_BUFFER_SIZE`].
//!
//! End-of-stream is only orderly when it falls between frames. If the peer
//! closes while a frame is half received, that is a decode error.

use crate::protocol::parser::{nesting_error, next_token, ParseError, Token, MAX_NESTING_DEPTH};
use crate::protocol::types::RespValue;
use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::trace;

/// Initial buffer capacity
const INITIAL_BUFFER_SIZE: usize = 4096;

/// Largest number of elements pre-allocated for an array from its header
const MAX_PREALLOCATED_ELEMENTS: usize = 1024;

/// Default cap on buffered bytes that are not part of a declared bulk
/// payload (64 KB)
pub const MAX_BUFFER_SIZE: usize = 64 * 1024;

/// Errors produced while decoding frames from a stream.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The bytes do not form a valid frame
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    /// The underlying stream failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The stream ended in the middle of a frame
    #[error("Unexpected end of stream ({buffered} bytes of a partial frame)")]
    UnexpectedEof { buffered: usize },

    /// An unterminated line grew past the buffer limit
    #[error("Buffer size limit exceeded")]
    BufferFull,
}

/// An array whose header has been read but not all of its elements.
#[derive(Debug)]
struct OpenArray {
    remaining: usize,
    elements: Vec<RespValue>,
}

/// Decodes frames from an async byte stream.
#[derive(Debug)]
pub struct FrameReader<R> {
    inner: R,
    buffer: BytesMut,
    /// Arrays of the current frame still collecting elements, outermost first
    open: Vec<OpenArray>,
    /// Buffer length at which the pending token completes, 0 if not known
    needed: usize,
    limit: usize,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self::with_buffer_limit(inner, MAX_BUFFER_SIZE)
    }

    /// Creates a reader with a custom cap on buffered non-payload bytes.
    pub fn with_buffer_limit(inner: R, limit: usize) -> Self {
        Self {
            inner,
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            open: Vec::new(),
            needed: 0,
            limit,
        }
    }

    /// Reads the next frame.
    ///
    /// Returns `Ok(None)` when the stream ends cleanly between frames.
    pub async fn read_frame(&mut self) -> Result<Option<RespValue>, DecodeError> {
        loop {
            if let Some(value) = self.try_parse()? {
                return Ok(Some(value));
            }

            // A bulk payload may grow the buffer up to its declared size.
            if self.buffer.len() >= self.limit.max(self.needed) {
                return Err(DecodeError::BufferFull);
            }

            let missing = self.needed.saturating_sub(self.buffer.len());
            if missing > 0 {
                self.buffer.reserve(missing.min(self.limit));
            } else if self.buffer.capacity() - self.buffer.len() < 1024 {
                self.buffer.reserve(INITIAL_BUFFER_SIZE);
            }

            let n = self.inner.read_buf(&mut self.buffer).await?;
            if n == 0 {
                return if self.buffer.is_empty() && self.open.is_empty() {
                    Ok(None)
                } else {
                    Err(DecodeError::UnexpectedEof {
                        buffered: self.buffer.len(),
                    })
                };
            }

            trace!(bytes = n, buffered = self.buffer.len(), "Read data");
        }
    }

    /// Number of bytes received but not yet decoded.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    fn try_parse(&mut self) -> Result<Option<RespValue>, ParseError> {
        loop {
            if self.buffer.is_empty() || self.buffer.len() < self.needed {
                return Ok(None);
            }

            if self.open.len() > MAX_NESTING_DEPTH {
                return Err(nesting_error());
            }

            let mut value = match next_token(&self.buffer)? {
                Token::Incomplete { needed } => {
                    self.needed = needed;
                    return Ok(None);
                }
                Token::ArrayHeader { count, consumed } => {
                    self.buffer.advance(consumed);
                    self.needed = 0;
                    if count > 0 {
                        self.open.push(OpenArray {
                            remaining: count,
                            elements: Vec::with_capacity(count.min(MAX_PREALLOCATED_ELEMENTS)),
                        });
                        continue;
                    }
                    RespValue::Array(Vec::new())
                }
                Token::Value { value, consumed } => {
                    self.buffer.advance(consumed);
                    self.needed = 0;
                    value
                }
            };

            // Close every array this value completes.
            loop {
                let Some(array) = self.open.last_mut() else {
                    trace!(remaining = self.buffer.len(), "Parsed frame");
                    return Ok(Some(value));
                };

                array.elements.push(value);
                array.remaining -= 1;
                if array.remaining > 0 {
                    break;
                }

                let elements = std::mem::take(&mut array.elements);
                self.open.pop();
                value = RespValue::Array(elements);
            }
        }
    }
}
