use crate::state::AppState;
use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    web, Error, HttpRequest,
};
use futures_util::future::LocalBoxFuture;
use std::{
    future::{ready, Ready},
    time::Instant,
};

/// Per-endpoint request counters.
///
/// Endpoints are keyed by route template (`GET /api/v1/jobs/{job_id}`), so
/// every job id lands in the same bucket instead of growing the map.
pub struct MetricsMiddleware;

impl<S, B> Transform<S, ServiceRequest> for MetricsMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = MetricsMiddlewareService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(MetricsMiddlewareService { service }))
    }
}

pub struct MetricsMiddlewareService<S> {
    service: S,
}

/// `"METHOD /template"`, or `"METHOD <unmatched>"` when no route matched.
pub fn endpoint_key(req: &HttpRequest) -> String {
    let route = req
        .match_pattern()
        .unwrap_or_else(|| "<unmatched>".to_string());
    format!("{} {}", req.method(), route)
}

impl<S, B> Service<ServiceRequest> for MetricsMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let start_time = Instant::now();
        let state = req.app_data::<web::Data<AppState>>().cloned();
        if let Some(state) = &state {
            state.increment_request_count();
        }

        let fut = self.service.call(req);

        Box::pin(async move {
            let result = fut.await;
            let duration_ms = start_time.elapsed().as_millis() as u64;

            if let Some(state) = state {
                match &result {
                    Ok(response) => {
                        let status = response.status();
                        let is_error = status.is_client_error() || status.is_server_error();
                        state.record_endpoint_request(&endpoint_key(response.request()), duration_ms, is_error);
                        if is_error {
                            state.increment_error_count();
                        }
                    }
                    Err(_) => state.increment_error_count(),
                }
            }

            result
        })
    }
}
