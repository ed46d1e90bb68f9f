use std::io;

use thiserror::Error;

/// Malformed or truncated bytes seen while encoding or decoding a record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatError {
    #[error("truncated input: needed {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },
    #[error("negative length prefix {0}")]
    NegativeLength(i32),
    #[error("string of {0} bytes exceeds the 65535 byte limit")]
    StringTooLong(usize),
    #[error("blob of {0} bytes exceeds the i32 length prefix")]
    BlobTooLong(usize),
    #[error("frame field of {0} bytes exceeds the u32 length prefix")]
    FrameTooLong(usize),
    #[error("string field is not valid UTF-8")]
    InvalidUtf8,
    #[error("presence mask {0:#04x} carries undeclared fields")]
    UnknownFields(u8),
    #[error("unknown join key kind {0}")]
    UnknownKind(i32),
    #[error("{0} trailing bytes after record")]
    TrailingBytes(usize),
    #[error("container header missing or unsupported")]
    BadHeader,
}

/// Errors raised by mappers, reducers and task setup.
#[derive(Debug, Error)]
pub enum JoinError {
    #[error(transparent)]
    Format(#[from] FormatError),
    #[error("invariant violated in group uid={uid}: {detail}")]
    InvariantViolation { uid: i64, detail: String },
    #[error("configuration error: {0}")]
    Config(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}
