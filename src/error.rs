use std::io;

/// Errors returned by archive parsing and entry reads.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The backing store failed to read or seek.
    #[error("I/O error: {0}")]
    Io(#[source] io::Error),

    /// The archive bytes do not describe a valid archive.
    #[error("{message}{}", offset_suffix(.offset))]
    Format {
        message: String,
        offset: Option<u64>,
    },

    /// The archive was closed before the operation ran.
    #[error("the archive is closed")]
    Closed,

    /// The archive uses a feature or the caller asked for a capability
    /// that this reader does not provide.
    #[error("unsupported: {0}")]
    Unsupported(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

fn offset_suffix(offset: &Option<u64>) -> String {
    match offset {
        Some(offset) => format!(" (at offset {offset})"),
        None => String::new(),
    }
}

impl Error {
    pub(crate) fn format(message: impl Into<String>) -> Self {
        Error::Format {
            message: message.into(),
            offset: None,
        }
    }

    pub(crate) fn format_at(message: impl Into<String>, offset: u64) -> Self {
        Error::Format {
            message: message.into(),
            offset: Some(offset),
        }
    }

    pub(crate) fn unsupported(what: impl Into<String>) -> Self {
        Error::Unsupported(what.into())
    }

    /// Returns `true` for [`Error::Closed`].
    pub fn is_closed(&self) -> bool {
        matches!(self, Error::Closed)
    }
}

// Readers only speak `io::Error`, so crate errors raised inside them are
// boxed into one and unwrapped again on the way out.
impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        if !err.get_ref().is_some_and(|inner| inner.is::<Error>()) {
            return Error::Io(err);
        }
        let kind = err.kind();
        match err.into_inner().map(|inner| inner.downcast::<Error>()) {
            Some(Ok(inner)) => *inner,
            Some(Err(other)) => Error::Io(io::Error::new(kind, other)),
            None => Error::Io(kind.into()),
        }
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Io(err) => err,
            Error::Format { .. } => io::Error::new(io::ErrorKind::InvalidData, err),
            Error::Unsupported(_) => io::Error::new(io::ErrorKind::Unsupported, err),
            Error::Closed => io::Error::other(err),
        }
    }
}
