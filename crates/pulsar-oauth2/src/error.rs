//! Error types for OAuth 2.0 client authentication

/// Broad classification of an [`Error`], used by callers to decide whether
/// the user has to (re-)authenticate, fix configuration, or simply retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed issuer, key file or grant type. Not retryable.
    Configuration,
    /// Nothing stored for the audience yet; an interactive login is needed.
    CredentialUnavailable,
    /// Stored data exists but cannot be decoded or has the wrong shape.
    CredentialUnusable,
    /// Network or HTTP failure talking to the authorization server.
    ExchangeFailure,
    /// Refresh attempted without a refresh token.
    GrantExpired,
    /// Writing to the credential keyring failed.
    StoreWriteFailure,
    /// Reading from the credential keyring failed.
    StoreReadFailure,
    /// The device-code prompt callback aborted the flow.
    Interaction,
}

/// Errors from OAuth authentication operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("{0}: unsupported format")]
    UnsupportedFormat(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("authentication data is not available")]
    NoAuthenticationData,

    #[error("authentication data is not usable")]
    UnsupportedAuthData,

    #[error("invalid access token: {0}")]
    InvalidToken(String),

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("token exchange failed: {0}")]
    TokenExchange(String),

    #[error("the authorization grant has expired (no refresh token); please re-login")]
    GrantExpired,

    #[error("unable to update the keyring: {0}")]
    StoreWrite(String),

    #[error("unable to get information from the keyring: {0}")]
    StoreRead(String),

    #[error("login aborted: {0}")]
    Interaction(String),

    #[error("{context}: {inner}")]
    Context { context: String, inner: Box<Error> },
}

impl Error {
    /// Wrap this error with a message prefix, keeping the original kind.
    pub fn context(self, context: impl Into<String>) -> Self {
        Error::Context {
            context: context.into(),
            inner: Box::new(self),
        }
    }

    /// Classify the error, looking through any context wrappers.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Config(_) | Error::UnsupportedFormat(_) | Error::Io(_) => {
                ErrorKind::Configuration
            }
            Error::NoAuthenticationData => ErrorKind::CredentialUnavailable,
            Error::UnsupportedAuthData | Error::InvalidToken(_) => ErrorKind::CredentialUnusable,
            Error::Http(_) | Error::TokenExchange(_) => ErrorKind::ExchangeFailure,
            Error::GrantExpired => ErrorKind::GrantExpired,
            Error::StoreWrite(_) => ErrorKind::StoreWriteFailure,
            Error::StoreRead(_) => ErrorKind::StoreReadFailure,
            Error::Interaction(_) => ErrorKind::Interaction,
            Error::Context { inner, .. } => inner.kind(),
        }
    }

    /// Whether the caller has to run an interactive login before retrying.
    pub fn requires_login(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::CredentialUnavailable | ErrorKind::CredentialUnusable | ErrorKind::GrantExpired
        )
    }
}

/// Result alias for auth operations.
pub type Result<T> = std::result::Result<T, Error>;
