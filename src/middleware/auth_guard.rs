/// Authorization Guard Middleware
///
/// Runs an [`AuthStrategy`] for every request to the wrapped route, stores
/// the resolved identity in request extensions and enforces the route's
/// [`RoutePolicy`]. Rejections short-circuit with 401 or 403.

use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    Error, HttpMessage,
};
use futures::future::LocalBoxFuture;
use std::rc::Rc;
use std::sync::Arc;

use crate::auth::{AuthStrategy, Role, RoutePolicy};
use crate::error::AppError;

pub struct AuthGuard {
    strategy: Arc<dyn AuthStrategy>,
    policy: Rc<RoutePolicy>,
}

impl AuthGuard {
    /// Any authenticated identity passes until roles are declared.
    pub fn new(strategy: Arc<dyn AuthStrategy>) -> Self {
        Self {
            strategy,
            policy: Rc::new(RoutePolicy::any_authenticated()),
        }
    }

    pub fn require_roles(mut self, roles: impl IntoIterator<Item = Role>) -> Self {
        self.policy = Rc::new(RoutePolicy::roles(roles));
        self
    }
}

impl<S, B> Transform<S, ServiceRequest> for AuthGuard
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = AuthGuardService<S>;
    type Future = std::future::Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        std::future::ready(Ok(AuthGuardService {
            service: Rc::new(service),
            strategy: self.strategy.clone(),
            policy: self.policy.clone(),
        }))
    }
}

pub struct AuthGuardService<S> {
    service: Rc<S>,
    strategy: Arc<dyn AuthStrategy>,
    policy: Rc<RoutePolicy>,
}

impl<S, B> Service<ServiceRequest> for AuthGuardService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();
        let strategy = self.strategy.clone();
        let policy = self.policy.clone();

        Box::pin(async move {
            let http_req = req.request().clone();
            let authenticated = strategy.authenticate(&http_req).await;
            drop(http_req);

            let authenticated = authenticated.map_err(|e| {
                tracing::warn!(path = %req.path(), error = %e, "Authentication failed");
                Error::from(e)
            })?;

            if let Err(e) = policy.check(authenticated.identity.role) {
                tracing::warn!(
                    path = %req.path(),
                    user_id = %authenticated.identity.id,
                    role = %authenticated.identity.role,
                    "Role not permitted for route"
                );
                return Err(AppError::from(e).into());
            }

            tracing::debug!(
                user_id = %authenticated.identity.id,
                role = %authenticated.identity.role,
                "Request authenticated"
            );

            {
                let mut extensions = req.extensions_mut();
                extensions.insert(authenticated.identity);
                if let Some(record) = authenticated.refresh_record {
                    extensions.insert(record);
                }
            }

            service.call(req).await
        })
    }
}
