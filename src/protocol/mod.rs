//! RESP Protocol Codec
//!
//! Turns request frames into [`Command`]s and replies into bytes. The codec
//! holds no state and performs no I/O, so any number of sessions can use it
//! at once.
//!
//! ## Modules
//!
//! - `types`: `RespValue` and the `marshal_*` reply helpers
//! - `command`: the parsed `Command`
//! - `parser`: complete-frame and streaming frame decoding
//!
//! ## Example
//!
//! ```
//! use spindle::protocol::{parse, marshal_bulk_string};
//!
//! let cmd = parse(b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n").unwrap();
//! assert_eq!(cmd.verb(), "GET");
//!
//! let reply = marshal_bulk_string("Ariz");
//! assert_eq!(&reply[..], b"$4\r\nAriz\r\n");
//! ```

pub mod command;
pub mod parser;
pub mod types;

pub use command::Command;
pub use parser::{parse, parse_frame, ParseError, ParseResult, MAX_FRAME_SIZE};
pub use types::{
    marshal_bulk_string, marshal_error, marshal_integer, marshal_nil, marshal_simple_string,
    RespValue,
};
