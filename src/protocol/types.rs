//! RESP Reply Types and Marshalling
//!
//! Every reply the server writes is built from a [`RespValue`] and turned
//! into wire bytes with [`RespValue::serialize`]. The `marshal_*` helpers are
//! the byte-level contract handlers and sessions use directly.
//!
//! ## Reply Forms
//!
//! - Simple String: `+OK\r\n`
//! - Error: `-ERR unknown command 'FOO'\r\n`
//! - Integer: `:1000\r\n`
//! - Bulk String: `$5\r\nhello\r\n`
//! - Nil: `$-1\r\n`
//! - Array: `*2\r\n$3\r\nGET\r\n$4\r\nname\r\n` (request frames only)

use bytes::{BufMut, Bytes, BytesMut};

/// The CRLF terminator used in RESP protocol
pub const CRLF: &[u8] = b"\r\n";

/// RESP protocol type prefixes
pub mod prefix {
    pub const SIMPLE_STRING: u8 = b'+';
    pub const ERROR: u8 = b'-';
    pub const INTEGER: u8 = b':';
    pub const BULK_STRING: u8 = b'$';
    pub const ARRAY: u8 = b'*';
}

/// A value in the RESP protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    /// Status reply, must not contain CRLF.
    /// Format: `+<string>\r\n`
    SimpleString(String),

    /// Error reply.
    /// Format: `-<error message>\r\n`
    Error(String),

    /// Format: `:<integer>\r\n`
    Integer(i64),

    /// Binary-safe, length-prefixed string.
    /// Format: `$<length>\r\n<data>\r\n`
    BulkString(Bytes),

    /// Absent value, written as the null bulk string `$-1\r\n`.
    Null,

    /// Format: `*<count>\r\n<element1><element2>...`
    Array(Vec<RespValue>),
}

impl RespValue {
    pub fn simple_string(s: impl Into<String>) -> Self {
        RespValue::SimpleString(s.into())
    }

    /// An error reply. CR and LF are replaced with spaces so the message
    /// stays on one line.
    pub fn error(s: impl Into<String>) -> Self {
        let mut message = s.into();
        if message.contains(['\r', '\n']) {
            message = message.replace(['\r', '\n'], " ");
        }
        RespValue::Error(message)
    }

    pub fn integer(n: i64) -> Self {
        RespValue::Integer(n)
    }

    /// Creates a new bulk string response.
    ///
    /// # Example
    /// ```
    /// use spindle::protocol::RespValue;
    /// use bytes::Bytes;
    /// let bulk = RespValue::bulk_string(Bytes::from("hello"));
    /// assert_eq!(bulk.serialize(), &b"$5\r\nhello\r\n"[..]);
    /// ```
    pub fn bulk_string(data: impl Into<Bytes>) -> Self {
        RespValue::BulkString(data.into())
    }

    pub fn null() -> Self {
        RespValue::Null
    }

    pub fn array(values: Vec<RespValue>) -> Self {
        RespValue::Array(values)
    }

    /// Common response for successful operations
    pub fn ok() -> Self {
        RespValue::SimpleString("OK".to_string())
    }

    pub fn pong() -> Self {
        RespValue::SimpleString("PONG".to_string())
    }

    /// Serializes the value to its wire representation.
    pub fn serialize(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.serialize_into(&mut buf);
        buf.freeze()
    }

    /// Serializes the value into an existing buffer.
    pub fn serialize_into(&self, buf: &mut BytesMut) {
        match self {
            RespValue::SimpleString(s) => {
                buf.put_u8(prefix::SIMPLE_STRING);
                buf.put_slice(s.as_bytes());
                buf.put_slice(CRLF);
            }
            RespValue::Error(s) => {
                buf.put_u8(prefix::ERROR);
                buf.put_slice(s.as_bytes());
                buf.put_slice(CRLF);
            }
            RespValue::Integer(n) => {
                buf.put_u8(prefix::INTEGER);
                buf.put_slice(n.to_string().as_bytes());
                buf.put_slice(CRLF);
            }
            RespValue::BulkString(data) => {
                buf.put_u8(prefix::BULK_STRING);
                buf.put_slice(data.len().to_string().as_bytes());
                buf.put_slice(CRLF);
                buf.put_slice(data);
                buf.put_slice(CRLF);
            }
            RespValue::Null => {
                buf.put_u8(prefix::BULK_STRING);
                buf.put_slice(b"-1");
                buf.put_slice(CRLF);
            }
            RespValue::Array(values) => {
                buf.put_u8(prefix::ARRAY);
                buf.put_slice(values.len().to_string().as_bytes());
                buf.put_slice(CRLF);
                for value in values {
                    value.serialize_into(buf);
                }
            }
        }
    }

    /// Upper bound on the serialized size, used to size buffers up front.
    fn encoded_len(&self) -> usize {
        // prefix + up to 20 digits + CRLF
        const HEADER: usize = 1 + 20 + 2;
        match self {
            RespValue::SimpleString(s) | RespValue::Error(s) => 1 + s.len() + 2,
            RespValue::Integer(_) | RespValue::Null => HEADER,
            RespValue::BulkString(data) => HEADER + data.len() + 2,
            RespValue::Array(values) => {
                HEADER + values.iter().map(RespValue::encoded_len).sum::<usize>()
            }
        }
    }
}

/// `+<s>\r\n`
pub fn marshal_simple_string(s: &str) -> Bytes {
    RespValue::simple_string(s).serialize()
}

/// `$<len>\r\n<data>\r\n`
pub fn marshal_bulk_string(data: impl Into<Bytes>) -> Bytes {
    RespValue::bulk_string(data).serialize()
}

/// `$-1\r\n`, the reply for a lookup miss.
pub fn marshal_nil() -> Bytes {
    Bytes::from_static(b"$-1\r\n")
}

/// `:<n>\r\n`
pub fn marshal_integer(n: i64) -> Bytes {
    RespValue::integer(n).serialize()
}

/// `-<message>\r\n`, kept on one line
pub fn marshal_error(message: &str) -> Bytes {
    RespValue::error(message).serialize()
}
