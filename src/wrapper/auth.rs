//! Authentication wrapper.
//!
//! The wrapper is created before the identity client it authenticates against exists,
//! so it starts unbound and is bound exactly once during bootstrap. The binding is held
//! weakly: the identity client's own chain contains one of these wrappers, and a strong
//! reference would keep that client alive forever.
//!
//! Request-time behavior:
//! - unbound: the request passes through undecorated;
//! - token-endpoint requests are never decorated (they carry client credentials);
//! - otherwise the cached access token is attached unless the request already carries
//!   an `authorization` header;
//! - on [`ConnectionError::InvalidToken`] the token is refreshed through the identity
//!   client, stored in the cache, and the request is re-sent once.

use super::{ConnectionWrapper, WrapperKind};
use crate::config::TokenCache;
use crate::connection::{ApiRequest, ApiResponse, Connection, AUTHORIZATION};
use crate::error::ConnectionError;
use crate::identity::IdentityClient;
use futures::future::BoxFuture;
use std::any::Any;
use std::sync::{Arc, OnceLock, Weak};
use std::task::{Context, Poll};
use tower::ServiceExt;
use tower_layer::Layer;
use tower_service::Service;
use tracing::{debug, warn};

type Binding = Arc<OnceLock<Weak<IdentityClient>>>;

/// Authentication wrapper; shared handle used both to build chains and to bind later.
pub struct AuthenticationWrapper {
    binding: Binding,
    cache: Arc<dyn TokenCache>,
}

impl std::fmt::Debug for AuthenticationWrapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthenticationWrapper")
            .field("bound", &self.is_bound())
            .field("cache", &"<token cache>")
            .finish()
    }
}

impl AuthenticationWrapper {
    /// Create an unbound wrapper over `cache`.
    pub fn new(cache: Arc<dyn TokenCache>) -> Self {
        Self { binding: Arc::new(OnceLock::new()), cache }
    }

    /// Bind the identity client. Only the first call takes effect; returns whether it did.
    pub fn bind(&self, client: &Arc<IdentityClient>) -> bool {
        let bound = self.binding.set(Arc::downgrade(client)).is_ok();
        if !bound {
            warn!("authentication wrapper already bound; ignoring rebind");
        }
        bound
    }

    /// The bound identity client, if bound and still alive.
    pub fn client(&self) -> Option<Arc<IdentityClient>> {
        self.binding.get().and_then(Weak::upgrade)
    }

    /// Whether [`bind`](Self::bind) has been called.
    pub fn is_bound(&self) -> bool {
        self.binding.get().is_some()
    }

    /// Tower layer sharing this wrapper's binding.
    pub fn layer(&self) -> AuthenticationLayer {
        AuthenticationLayer { binding: self.binding.clone(), cache: self.cache.clone() }
    }
}

impl ConnectionWrapper for AuthenticationWrapper {
    fn kind(&self) -> WrapperKind {
        WrapperKind::Authentication
    }

    fn wrap(&self, inner: Connection) -> Connection {
        Connection::new(self.layer().layer(inner))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Tower layer produced by [`AuthenticationWrapper::layer`].
#[derive(Clone)]
pub struct AuthenticationLayer {
    binding: Binding,
    cache: Arc<dyn TokenCache>,
}

/// Service that injects credentials and refreshes expired tokens.
#[derive(Clone)]
pub struct AuthenticationService<S> {
    inner: S,
    binding: Binding,
    cache: Arc<dyn TokenCache>,
}

impl<S> Layer<S> for AuthenticationLayer {
    type Service = AuthenticationService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthenticationService { inner, binding: self.binding.clone(), cache: self.cache.clone() }
    }
}

impl<S> Service<ApiRequest> for AuthenticationService<S>
where
    S: Service<ApiRequest, Response = ApiResponse, Error = ConnectionError>
        + Clone
        + Send
        + 'static,
    S::Future: Send + 'static,
{
    type Response = ApiResponse;
    type Error = ConnectionError;
    type Future = BoxFuture<'static, Result<ApiResponse, ConnectionError>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), ConnectionError>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: ApiRequest) -> Self::Future {
        let binding = self.binding.clone();
        let cache = self.cache.clone();
        let mut inner = self.inner.clone();
        Box::pin(async move {
            let Some(weak) = binding.get() else {
                debug!(url = %req.url, "authentication wrapper unbound; passing through");
                return inner.oneshot(req).await;
            };
            if req.is_token_request() {
                return inner.oneshot(req).await;
            }

            let mut decorated = req.clone();
            if decorated.header(AUTHORIZATION).is_none() {
                let token = cache.access_token();
                if !token.is_empty() {
                    decorated.set_header(AUTHORIZATION, token);
                }
            }

            match inner.ready().await?.call(decorated).await {
                Err(ConnectionError::InvalidToken(body)) => {
                    let Some(client) = weak.upgrade() else {
                        return Err(ConnectionError::InvalidToken(body));
                    };
                    debug!(url = %req.url, "access token rejected; refreshing");
                    let tokens = client.refresh_access_token(&cache.refresh_token()).await?;
                    cache.set_access_token(tokens.authorization_token());
                    cache.set_refresh_token(tokens.refresh_token.clone());

                    let mut retried = req;
                    retried.set_header(AUTHORIZATION, tokens.authorization_token());
                    inner.ready().await?.call(retried).await
                }
                other => other,
            }
        })
    }
}
