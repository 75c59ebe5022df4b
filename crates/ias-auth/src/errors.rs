use thiserror::Error;

use crate::crypt::CryptKind;

/// Translation keys of the errors the host can render as-is.
pub mod keys {
    pub const CANCEL: &str = "ias.error.cancel";
    pub const EXPIRED: &str = "ias.error.expired";
    pub const CONNECT: &str = "ias.error.connect";
    pub const QUERY: &str = "ias.error.query";
    pub const NO_XBOX: &str = "ias.error.noXbox";
    pub const XBOX_AVAILABLE: &str = "ias.error.xboxAvailable";
    pub const XBOX_ADULT: &str = "ias.error.xboxAdult";
    pub const GAME_NOT_OWNED: &str = "ias.error.gameNotOwned";
    pub const NO_PROFILE: &str = "ias.error.noProfile";
    pub const BAD_PASSWORD: &str = "ias.error.password";
    pub const OFFLINE: &str = "ias.error.offline";
}

/// Failure of an authentication pipeline run, as reported to the handlers.
#[derive(Error, Debug)]
pub enum AuthError {
    /// The handler reported cancellation. Hosts render nothing for it.
    #[error("Authentication cancelled")]
    Cancelled,

    /// A known cause with a translation key.
    #[error("{message} [{key}]")]
    Friendly { key: String, message: String },

    /// Anything else, with the full diagnostic chain.
    #[error("Unexpected error: {0:#}")]
    Unknown(#[source] anyhow::Error),
}

impl AuthError {
    pub fn friendly(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Friendly {
            key: key.into(),
            message: message.into(),
        }
    }

    pub fn unknown(error: impl Into<anyhow::Error>) -> Self {
        Self::Unknown(error.into())
    }

    /// Wraps an unknown error with an additional context line; other kinds pass through.
    pub fn context(self, context: impl Into<String>) -> Self {
        match self {
            Self::Unknown(e) => Self::Unknown(e.context(context.into())),
            other => other,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Translation key of a friendly error.
    pub fn friendly_key(&self) -> Option<&str> {
        match self {
            Self::Friendly { key, .. } => Some(key),
            _ => None,
        }
    }

    /// Turns unknown connect/timeout transport failures into the friendly "can't connect" error.
    pub(crate) fn classify_connect(self) -> Self {
        let Self::Unknown(error) = self else {
            return self;
        };
        let offline = error.chain().any(|cause| {
            cause
                .downcast_ref::<reqwest::Error>()
                .is_some_and(|e| e.is_connect() || e.is_timeout())
        });
        if offline {
            Self::friendly(keys::CONNECT, format!("Unable to connect to the servers: {error:#}"))
        } else {
            Self::Unknown(error)
        }
    }
}

impl From<reqwest::Error> for AuthError {
    fn from(e: reqwest::Error) -> Self {
        // Request URLs may carry codes or tokens in their query.
        Self::Unknown(anyhow::Error::new(e.without_url()))
    }
}

impl From<serde_json::Error> for AuthError {
    fn from(e: serde_json::Error) -> Self {
        Self::Unknown(e.into())
    }
}

impl From<url::ParseError> for AuthError {
    fn from(e: url::ParseError) -> Self {
        Self::Unknown(e.into())
    }
}

impl From<crate::fields::FieldError> for AuthError {
    fn from(e: crate::fields::FieldError) -> Self {
        Self::Unknown(e.into())
    }
}

impl From<CryptError> for AuthError {
    fn from(e: CryptError) -> Self {
        match e {
            CryptError::BadPassword => Self::friendly(keys::BAD_PASSWORD, e.to_string()),
            other => Self::Unknown(other.into()),
        }
    }
}

impl From<StoreError> for AuthError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Crypt(crypt) => crypt.into(),
            other => Self::Unknown(other.into()),
        }
    }
}

/// XSTS rejections with no friendly mapping.
#[derive(Error, Debug)]
pub enum XstsError {
    #[error("XSTS refused authorization with XErr {xerr}: {message}")]
    Unmapped { xerr: u64, message: String },

    #[error("XBL and XSTS user hashes differ")]
    HashMismatch,
}

/// Account secret encryption errors.
#[derive(Error, Debug)]
pub enum CryptError {
    #[error("Password is empty")]
    EmptyPassword,

    #[error("Wrong password or corrupted encrypted data")]
    BadPassword,

    #[error("Encrypted data is too short: {0} bytes")]
    Truncated(usize),

    #[error("Encryption failed: {0}")]
    Encrypt(String),

    #[error("Unknown crypt type: {0}")]
    UnknownType(String),

    #[error("Invalid PBKDF2 iteration count: {0}")]
    InvalidIterations(u32),

    #[error("Data sealed with {sealed} cannot be opened with {given}")]
    KindMismatch {
        sealed: &'static str,
        given: &'static str,
    },
}

/// Binary codec errors.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum CodecError {
    #[error("Unexpected end of data: needed {needed} bytes, {remaining} left")]
    UnexpectedEof { needed: usize, remaining: usize },

    #[error("String is not valid UTF-8")]
    InvalidUtf8,

    #[error("String is too long to encode: {0} bytes")]
    StringTooLong(usize),

    #[error("Leftover data after record: {0} bytes")]
    Trailing(usize),
}

/// Credential store errors.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Not a credential store file")]
    BadMagic,

    #[error("Unsupported credential store format version: {0}")]
    UnsupportedVersion(u16),

    #[error("Unknown account type: {0}")]
    UnknownType(String),

    #[error("Malformed record: {0}")]
    Codec(#[from] CodecError),

    #[error("Crypt error: {0}")]
    Crypt(#[from] CryptError),

    #[error("Credential store is locked by another process")]
    LockTimeout,

    #[error("Account index {index} is out of range ({len} accounts)")]
    OutOfRange { index: usize, len: usize },

    #[error("Could not determine the config directory")]
    NoConfigDir,

    #[error("Account is sealed with {account:?} but the store uses {store:?}")]
    CryptMismatch { store: CryptKind, account: CryptKind },
}

pub type Result<T> = std::result::Result<T, AuthError>;
