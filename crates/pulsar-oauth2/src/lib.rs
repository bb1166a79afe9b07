//! OAuth 2.0 client authentication for the Pulsar admin CLI
//!
//! Login flows, refreshable grants and the HTTP exchanges behind them. This
//! crate knows nothing about where grants are persisted; `auth-store` owns
//! the keyring and the token cache built on the traits defined here.
//!
//! Login:
//! 1. A [`flow::Flow`] (client credentials or device code) authorizes an audience
//! 2. The resulting [`Grant`] is persisted as an [`AuthorizationGrant`]
//!
//! Request time:
//! 1. The grant is rebuilt with [`Grant::from_record`]
//! 2. [`Grant::refresh`] renews the access token when the cache has none

use std::future::Future;
use std::pin::Pin;

pub mod cache;
pub mod clock;
pub mod device;
pub mod error;
pub mod exchange;
pub mod flow;
pub mod grant;
pub mod issuer;
pub mod keyfile;
pub mod pkce;
pub mod token;

pub use cache::{TokenCache, TokenSource};
pub use clock::{Clock, SystemClock};
pub use device::{DeviceCodeProvider, DeviceCodeResult, LocalDeviceCodeProvider};
pub use error::{Error, ErrorKind, Result};
pub use exchange::{TokenExchanger, TokenRetriever};
pub use flow::{
    ClientCredentialsFlow, DeviceCodeCallback, DeviceCodeFlow, DeviceCodeFlowOptions, Flow,
};
pub use grant::{AuthorizationGrant, Grant, GrantType};
pub use issuer::{Issuer, WellKnownEndpoints};
pub use keyfile::{ClientCredentialsProvider, KeyFile, KeyFileProvider};
pub use token::{Token, TokenResult, extract_user_name};

/// Boxed future returned by the async trait methods in this crate, so the
/// traits stay usable as `dyn` objects.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
