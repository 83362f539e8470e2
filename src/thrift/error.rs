//! Codec error type (spec.md §7, SPEC_FULL.md §7).

use std::fmt;

/// `NeedMore` is the concrete realization of the wire API's "return false,
/// leave the queue untouched" contract: callers that see it should buffer
/// more bytes and retry the same read. `Malformed` is a permanent framing
/// violation; `Eof` marks a connection that closed mid-message.
#[derive(Debug)]
pub enum DecodeError {
    NeedMore,
    Malformed(String),
    Eof,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            DecodeError::NeedMore => write!(f, "need more data"),
            DecodeError::Malformed(ref msg) => write!(f, "malformed thrift frame: {}", msg),
            DecodeError::Eof => write!(f, "connection closed mid-message"),
        }
    }
}

impl ::std::error::Error for DecodeError {
    fn description(&self) -> &str {
        "thrift decode error"
    }
}

/// True for everything except `NeedMore`, matching the spec's distinction
/// between "incomplete, retry" and "framing is broken".
impl DecodeError {
    pub fn is_fatal(&self) -> bool {
        match *self {
            DecodeError::NeedMore => false,
            DecodeError::Malformed(_) | DecodeError::Eof => true,
        }
    }
}
