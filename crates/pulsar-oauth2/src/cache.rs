//! Token cache and token source seams
//!
//! The credential store implements [`TokenCache`]; the transport decorator
//! only sees a [`TokenSource`].

use chrono::{DateTime, Duration, Utc};

use crate::BoxFuture;
use crate::error::Result;
use crate::token::Token;

/// Seconds before expiry at which a cached token is treated as stale.
pub const EXPIRY_DELTA_SECS: i64 = 60;

/// Persisted cache of the current token for one audience.
pub trait TokenCache: Send + Sync {
    /// Current token, or `None` when it is missing, invalidated or about to expire.
    fn get_token(&self) -> BoxFuture<'_, Result<Option<Token>>>;

    /// Replace the cached token and persist it.
    fn update_token(&self, token: Token) -> BoxFuture<'_, Result<()>>;

    /// Drop the access token, keeping the refresh token.
    fn invalidate_token(&self) -> BoxFuture<'_, Result<()>>;
}

/// Something that can hand out a usable access token.
pub trait TokenSource: Send + Sync {
    fn token(&self) -> BoxFuture<'_, Result<Token>>;

    /// Tell the source the last token was rejected.
    fn invalidate(&self) -> BoxFuture<'_, Result<()>>;
}

/// Whether `token` is still good to hand out at `now`.
pub fn is_usable(token: &Token, now: DateTime<Utc>) -> bool {
    token.has_access_token() && !token.expires_within(now, Duration::seconds(EXPIRY_DELTA_SECS))
}
