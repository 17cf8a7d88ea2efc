//! Store error taxonomy.

use std::fmt;

use walletd_storage::StoreError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    /// Malformed argument from the caller.
    Input,
    /// A precondition the operation relies on is missing.
    NoExists,
    /// Creation attempted over an already initialized namespace.
    AlreadyExists,
    /// Backend fault or on-disk corruption.
    Database,
    /// The store has been closed.
    IsClosed,
    /// A multisig output respend with a different spender.
    DoubleSpend,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Input => "invalid input",
            ErrorKind::NoExists => "does not exist",
            ErrorKind::AlreadyExists => "already exists",
            ErrorKind::Database => "database error",
            ErrorKind::IsClosed => "store is closed",
            ErrorKind::DoubleSpend => "double spend",
        }
    }
}

/// An error with a contextual message and an optional underlying cause.
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    message: String,
    cause: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            cause: None,
        }
    }

    pub fn with_cause(
        kind: ErrorKind,
        message: impl Into<String>,
        cause: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            cause: Some(Box::new(cause)),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub(crate) fn is_closed() -> Self {
        Self::new(ErrorKind::IsClosed, "transaction store is closed")
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.cause {
            Some(cause) => write!(f, "{}: {cause}", self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_deref()
            .map(|cause| cause as &(dyn std::error::Error + 'static))
    }
}

impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        Error::with_cause(ErrorKind::Database, "key/value backend failure", err)
    }
}
