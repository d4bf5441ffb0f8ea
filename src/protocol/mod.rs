//! RESP Protocol Implementation
//!
//! The frame codec: decodes a byte stream into [`RespValue`] trees and
//! serializes values back into the wire format. It knows nothing about
//! commands or storage.
//!
//! ## Modules
//!
//! - `types`: the `RespValue` enum and its serializer
//! - `parser`: incremental parser over a byte buffer
//! - `reader`: frame-at-a-time decoding from an `AsyncRead`
//!
//! ## Example
//!
//! ```
//! use emberkv::protocol::{parse_message, RespValue};
//! use bytes::Bytes;
//!
//! let data = b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n";
//! let (value, consumed) = parse_message(data).unwrap().unwrap();
//! assert_eq!(consumed, data.len());
//!
//! let response = RespValue::bulk_string(Bytes::from("Ariz"));
//! assert_eq!(response.serialize(), b"$4\r\nAriz\r\n");
//! ```

pub mod parser;
pub mod reader;
pub mod types;

pub use parser::{parse_message, ParseError, ParseResult, RespParser};
pub use reader::{DecodeError, FrameReader};
pub use types::RespValue;
