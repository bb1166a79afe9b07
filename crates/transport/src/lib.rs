//! Authenticated HTTP transport for admin API requests
//!
//! [`AuthLayer`] wraps any tower service over `reqwest::Request` and attaches
//! `Authorization: Bearer <token>` from a [`TokenSource`]. [`Authentication`]
//! picks between that and plain anonymous requests.

pub mod auth;

pub use auth::{AuthLayer, AuthService};

use std::sync::Arc;

use pulsar_oauth2::TokenSource;
use tower::util::BoxCloneService;
use tower::{BoxError, Layer, ServiceExt};

/// Boxed request/response service handed to API clients.
pub type HttpService = BoxCloneService<reqwest::Request, reqwest::Response, BoxError>;

/// How outgoing requests authenticate.
#[derive(Clone)]
pub enum Authentication {
    /// Requests are sent as built.
    Anonymous,
    OAuth2(Arc<dyn TokenSource>),
}

impl Authentication {
    pub fn is_anonymous(&self) -> bool {
        matches!(self, Authentication::Anonymous)
    }

    /// Service executing requests on `client`, authenticated as configured.
    pub fn service(&self, client: reqwest::Client) -> HttpService {
        let base = tower::service_fn(move |request: reqwest::Request| {
            let client = client.clone();
            async move { client.execute(request).await }
        })
        .map_err(BoxError::from);

        match self {
            Authentication::Anonymous => BoxCloneService::new(base),
            Authentication::OAuth2(source) => {
                BoxCloneService::new(AuthLayer::new(source.clone()).layer(base))
            }
        }
    }
}

impl std::fmt::Debug for Authentication {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Authentication::Anonymous => f.write_str("Anonymous"),
            Authentication::OAuth2(_) => f.write_str("OAuth2"),
        }
    }
}
