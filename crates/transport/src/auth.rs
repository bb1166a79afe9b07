//! Bearer token decorator
//!
//! - A request that already carries a non-empty `Authorization` header is
//!   forwarded untouched, without asking the token source.
//! - Otherwise the current token is attached before forwarding.
//! - A 401 response invalidates the cached token once and is returned as is;
//!   the request is not retried.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use pulsar_oauth2::TokenSource;
use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, HeaderValue};
use tower::{BoxError, Layer, Service};
use tracing::{debug, warn};

#[derive(Clone)]
pub struct AuthLayer {
    source: Arc<dyn TokenSource>,
}

impl AuthLayer {
    pub fn new(source: Arc<dyn TokenSource>) -> Self {
        Self { source }
    }
}

impl<S> Layer<S> for AuthLayer {
    type Service = AuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthService {
            inner,
            source: self.source.clone(),
        }
    }
}

#[derive(Clone)]
pub struct AuthService<S> {
    inner: S,
    source: Arc<dyn TokenSource>,
}

impl<S> Service<reqwest::Request> for AuthService<S>
where
    S: Service<reqwest::Request, Response = reqwest::Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Into<BoxError>,
{
    type Response = reqwest::Response;
    type Error = BoxError;
    type Future = Pin<Box<dyn Future<Output = Result<reqwest::Response, BoxError>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(Into::into)
    }

    fn call(&mut self, mut request: reqwest::Request) -> Self::Future {
        // Take the service that was polled ready; leave a fresh clone behind.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let source = self.source.clone();

        Box::pin(async move {
            let preset = request
                .headers()
                .get(AUTHORIZATION)
                .is_some_and(|value| !value.is_empty());
            if preset {
                debug!(url = %request.url(), "authorization header already set");
                return inner.call(request).await.map_err(Into::into);
            }

            let token = source.token().await?;
            let mut value = HeaderValue::from_str(&token.authorization_header())?;
            value.set_sensitive(true);
            request.headers_mut().insert(AUTHORIZATION, value);

            let url = request.url().clone();
            let response = inner.call(request).await.map_err(Into::into)?;

            if response.status() == StatusCode::UNAUTHORIZED {
                warn!(url = %url, "request unauthorized, invalidating cached token");
                if let Err(e) = source.invalidate().await {
                    warn!(error = %e, "failed to invalidate token");
                }
            }
            Ok(response)
        })
    }
}
