//! Request Frame Parser
//!
//! Clients send every command as an array of bulk strings:
//!
//! ```text
//! *<argc>\r\n
//! $<len0>\r\n<arg0 bytes>\r\n
//! ...
//! $<lenN>\r\n<argN bytes>\r\n
//! ```
//!
//! Two entry points share one decoder:
//!
//! - [`parse`] takes a buffer holding exactly one complete frame. A frame
//!   that ends early is an error.
//! - [`parse_frame`] is the streaming form used by connections. It returns
//!   - `Ok(Some((command, consumed)))` when a frame was decoded
//!   - `Ok(None)` when the buffer holds only the start of a frame
//!   - `Err(ParseError)` when the bytes can never become a valid frame
//!
//! Anything that does not start with `*` is rejected; inline commands are
//! not accepted. Both functions are pure over their input.

use crate::protocol::command::Command;
use crate::protocol::types::{prefix, CRLF};
use bytes::Bytes;
use thiserror::Error;

/// Why a frame could not be decoded. Every variant is a malformed frame.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("empty input")]
    EmptyInput,

    #[error("expected '{expected}', got {found:#04x}")]
    UnexpectedPrefix { expected: char, found: u8 },

    #[error("invalid integer: {0}")]
    InvalidInteger(String),

    #[error("invalid length: {0}")]
    InvalidLength(i64),

    #[error("bulk string missing trailing CRLF")]
    MissingCrlf,

    #[error("frame ended before its declared length")]
    Incomplete,

    #[error("{0} unexpected bytes after frame")]
    TrailingData(usize),

    #[error("empty command")]
    EmptyCommand,

    #[error("frame too large: {size} (max: {max})")]
    FrameTooLarge { size: usize, max: usize },
}

pub type ParseResult<T> = Result<T, ParseError>;

/// Maximum encoded size of one request frame (64 MB). Bulk strings are
/// bounded by it too, since each must fit inside its frame.
pub const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

/// Maximum number of elements in one request frame
pub const MAX_ARGS: usize = 1024 * 1024;

/// Longest `*<n>` / `$<n>` header line accepted before giving up on a CRLF.
const MAX_HEADER_LEN: usize = 32;

/// Parses one complete frame.
///
/// # Example
///
/// ```
/// use spindle::protocol::parse;
///
/// let cmd = parse(b"*2\r\n$4\r\nECHO\r\n$5\r\nhello\r\n").unwrap();
/// assert_eq!(cmd.verb(), "ECHO");
/// assert_eq!(&cmd.args()[0][..], b"hello");
///
/// assert!(parse(b"*2\r\n$3\r\nfoo").is_err());
/// ```
pub fn parse(frame: &[u8]) -> ParseResult<Command> {
    if frame.is_empty() {
        return Err(ParseError::EmptyInput);
    }

    match parse_frame(frame)? {
        Some((command, consumed)) if consumed == frame.len() => Ok(command),
        Some((_, consumed)) => Err(ParseError::TrailingData(frame.len() - consumed)),
        None => Err(ParseError::Incomplete),
    }
}

/// Attempts to decode one frame from the front of `buf`.
pub fn parse_frame(buf: &[u8]) -> ParseResult<Option<(Command, usize)>> {
    if buf.is_empty() {
        return Ok(None);
    }

    if buf[0] != prefix::ARRAY {
        return Err(ParseError::UnexpectedPrefix {
            expected: '*',
            found: buf[0],
        });
    }

    let (count, mut consumed) = match read_header(buf)? {
        Some(header) => header,
        None => return Ok(None),
    };

    if count < 0 {
        return Err(ParseError::InvalidLength(count));
    }
    if count == 0 {
        return Err(ParseError::EmptyCommand);
    }
    let count = count as usize;
    if count > MAX_ARGS {
        return Err(ParseError::FrameTooLarge {
            size: count,
            max: MAX_ARGS,
        });
    }

    let mut parts = Vec::with_capacity(count.min(64));
    for _ in 0..count {
        match parse_bulk_string(&buf[consumed..], consumed)? {
            Some((data, used)) => {
                parts.push(data);
                consumed += used;
            }
            None => return Ok(None),
        }
    }

    let mut parts = parts.into_iter();
    let name = parts.next().unwrap_or_default();
    Ok(Some((Command::new(name, parts.collect()), consumed)))
}

/// Parses `$<length>\r\n<data>\r\n` found `offset` bytes into the frame.
///
/// The declared length is checked against [`MAX_FRAME_SIZE`] as soon as the
/// header is read, before any of the data has arrived.
fn parse_bulk_string(buf: &[u8], offset: usize) -> ParseResult<Option<(Bytes, usize)>> {
    if buf.is_empty() {
        return Ok(None);
    }

    if buf[0] != prefix::BULK_STRING {
        return Err(ParseError::UnexpectedPrefix {
            expected: '$',
            found: buf[0],
        });
    }

    let (length, data_start) = match read_header(buf)? {
        Some(header) => header,
        None => return Ok(None),
    };

    // A null bulk string is a reply form, never a request argument.
    if length < 0 {
        return Err(ParseError::InvalidLength(length));
    }
    let length = usize::try_from(length).unwrap_or(usize::MAX);
    let total_needed = length.saturating_add(data_start + CRLF.len());
    let frame_size = offset.saturating_add(total_needed);
    if frame_size > MAX_FRAME_SIZE {
        return Err(ParseError::FrameTooLarge {
            size: frame_size,
            max: MAX_FRAME_SIZE,
        });
    }
    if buf.len() < total_needed {
        return Ok(None);
    }

    if &buf[data_start + length..total_needed] != CRLF {
        return Err(ParseError::MissingCrlf);
    }

    let data = Bytes::copy_from_slice(&buf[data_start..data_start + length]);
    Ok(Some((data, total_needed)))
}

/// Reads the integer on a `<prefix><n>\r\n` line.
///
/// Returns the value and the number of bytes up to and including the CRLF.
fn read_header(buf: &[u8]) -> ParseResult<Option<(i64, usize)>> {
    let end = match find_crlf(&buf[1..]) {
        Some(pos) => pos,
        None if buf.len() > MAX_HEADER_LEN => {
            return Err(ParseError::InvalidInteger(
                String::from_utf8_lossy(&buf[1..MAX_HEADER_LEN]).into_owned(),
            ))
        }
        None => return Ok(None),
    };

    let digits = &buf[1..1 + end];
    let value = std::str::from_utf8(digits)
        .ok()
        // `i64::from_str` would also take a leading '+'.
        .filter(|s| !s.starts_with('+'))
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| ParseError::InvalidInteger(String::from_utf8_lossy(digits).into_owned()))?;

    Ok(Some((value, 1 + end + CRLF.len())))
}

/// Position of the first `\r\n` in `buf`.
#[inline]
fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == CRLF)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ping() {
        let cmd = parse(b"*1\r\n$4\r\nPING\r\n").unwrap();
        assert_eq!(cmd.verb(), "PING");
        assert!(cmd.args().is_empty());
    }

    #[test]
    fn test_parse_set_command() {
        let input = b"*3\r\n$3\r\nSET\r\n$8\r\nuser:101\r\n$4\r\nAriz\r\n";
        let cmd = parse(input).unwrap();
        assert_eq!(cmd.verb(), "SET");
        assert_eq!(
            cmd.args(),
            &[Bytes::from("user:101"), Bytes::from("Ariz")][..]
        );
    }

    #[test]
    fn test_parse_frame_reports_consumed() {
        let input = b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n*1\r\n$4\r\nPING\r\n";
        let (cmd, consumed) = parse_frame(input).unwrap().unwrap();
        assert_eq!(cmd.verb(), "GET");
        assert_eq!(consumed, 23);

        let (next, _) = parse_frame(&input[consumed..]).unwrap().unwrap();
        assert_eq!(next.verb(), "PING");
    }

    #[test]
    fn test_parse_frame_incomplete_waits() {
        assert!(parse_frame(b"").unwrap().is_none());
        assert!(parse_frame(b"*2").unwrap().is_none());
        assert!(parse_frame(b"*2\r\n$3\r\nGET\r\n").unwrap().is_none());
        assert!(parse_frame(b"*2\r\n$3\r\nGET\r\n$4\r\nna").unwrap().is_none());
    }

    #[test]
    fn test_truncated_frame_is_malformed() {
        assert_eq!(parse(b"*2\r\n$3\r\nfoo"), Err(ParseError::Incomplete));
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(parse(b""), Err(ParseError::EmptyInput));
    }

    #[test]
    fn test_rejects_non_array_frame() {
        assert_eq!(
            parse(b"PING\r\n"),
            Err(ParseError::UnexpectedPrefix {
                expected: '*',
                found: b'P'
            })
        );
    }

    #[test]
    fn test_rejects_non_bulk_element() {
        assert_eq!(
            parse(b"*1\r\n+PING\r\n"),
            Err(ParseError::UnexpectedPrefix {
                expected: '$',
                found: b'+'
            })
        );
    }

    #[test]
    fn test_rejects_bad_count() {
        assert!(matches!(
            parse(b"*x\r\n$4\r\nPING\r\n"),
            Err(ParseError::InvalidInteger(_))
        ));
        assert_eq!(parse(b"*-1\r\n"), Err(ParseError::InvalidLength(-1)));
        assert_eq!(parse(b"*0\r\n"), Err(ParseError::EmptyCommand));
    }

    #[test]
    fn test_rejects_null_bulk_argument() {
        assert_eq!(
            parse(b"*1\r\n$-1\r\n"),
            Err(ParseError::InvalidLength(-1))
        );
    }

    #[test]
    fn test_rejects_missing_crlf_after_data() {
        assert_eq!(
            parse(b"*1\r\n$4\r\nPINGxx"),
            Err(ParseError::MissingCrlf)
        );
    }

    #[test]
    fn test_rejects_trailing_bytes() {
        assert_eq!(
            parse(b"*1\r\n$4\r\nPING\r\nextra"),
            Err(ParseError::TrailingData(5))
        );
    }

    #[test]
    fn test_rejects_runaway_header() {
        let input = [b"*".as_slice(), &[b'1'; 64]].concat();
        assert!(matches!(
            parse_frame(&input),
            Err(ParseError::InvalidInteger(_))
        ));
    }

    #[test]
    fn test_rejects_oversized_bulk() {
        let input = format!("*1\r\n${}\r\n", MAX_FRAME_SIZE + 1);
        assert!(matches!(
            parse_frame(input.as_bytes()),
            Err(ParseError::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn test_frame_size_counts_every_argument() {
        // Two bulk strings that each fit but together overflow the frame.
        let half = MAX_FRAME_SIZE / 2;
        let mut input = format!("*3\r\n$3\r\nSET\r\n${}\r\n", half).into_bytes();
        input.resize(input.len() + half, b'k');
        input.extend_from_slice(format!("\r\n${}\r\n", half).as_bytes());

        assert_eq!(
            parse_frame(&input),
            Err(ParseError::FrameTooLarge {
                size: 13 + (half.to_string().len() + 3 + half + 2) * 2,
                max: MAX_FRAME_SIZE,
            })
        );
    }

    #[test]
    fn test_header_sign_must_be_exact() {
        assert!(matches!(
            parse(b"*+1\r\n$4\r\nPING\r\n"),
            Err(ParseError::InvalidInteger(_))
        ));
        assert!(matches!(
            parse(b"*1\r\n$+4\r\nPING\r\n"),
            Err(ParseError::InvalidInteger(_))
        ));
        assert_eq!(
            parse(b"*1\r\n$-1\r\n"),
            Err(ParseError::InvalidLength(-1))
        );
    }

    #[test]
    fn test_binary_safe_bulk_string() {
        let cmd = parse(b"*2\r\n$4\r\nECHO\r\n$5\r\nhe\r\n\x00\r\n").unwrap();
        assert_eq!(cmd.args()[0], Bytes::from(&b"he\r\n\x00"[..]));
    }

    #[test]
    fn test_empty_bulk_argument() {
        let cmd = parse(b"*2\r\n$4\r\nECHO\r\n$0\r\n\r\n").unwrap();
        assert_eq!(cmd.args()[0], Bytes::new());
    }

    #[test]
    fn test_to_frame_parses_back() {
        let original = Command::from_parts(["SET", "key", "value"]);
        assert_eq!(parse(&original.to_frame()).unwrap(), original);
    }
}
