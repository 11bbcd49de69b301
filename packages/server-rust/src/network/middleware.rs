//! HTTP middleware stack and the tenant context extractor.
//!
//! [`build_http_layers`] builds the transport-level Tower pipeline applied
//! to every request. Layer ordering follows the outer-to-inner convention:
//! the first layer listed processes the request first and the response
//! last.
//!
//! [`tenant_context_middleware`] sits inside that pipeline, directly around
//! the handlers. It turns the identity headers into a [`RequestContext`] and
//! runs the rest of the request inside a context scope.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Query, Request, State};
use axum::http::header::HeaderName;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tenantry_core::RequestContext;
use tower::ServiceBuilder;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::Instrument;
use uuid::Uuid;

use super::config::NetworkConfig;
use super::shutdown::ShutdownController;
use crate::context;
use crate::error::TenancyError;

/// Header carrying the tenant identifier.
pub const TENANT_HEADER: &str = "x-tenant-id";
/// Header carrying the acting user's identifier.
pub const ACTOR_HEADER: &str = "x-actor-id";
/// Query parameter that must never carry the tenant.
pub const TENANT_QUERY_PARAM: &str = "tenant_id";

/// The composed Tower layer type produced by [`build_http_layers`].
type HttpLayers = tower::layer::util::Stack<
    PropagateRequestIdLayer,
    tower::layer::util::Stack<
        TimeoutLayer,
        tower::layer::util::Stack<
            CorsLayer,
            tower::layer::util::Stack<
                CompressionLayer,
                tower::layer::util::Stack<
                    TraceLayer<
                        tower_http::classify::SharedClassifier<
                            tower_http::classify::ServerErrorsAsFailures,
                        >,
                    >,
                    tower::layer::util::Stack<
                        SetRequestIdLayer<MakeRequestUuid>,
                        tower::layer::util::Identity,
                    >,
                >,
            >,
        >,
    >,
>;

/// Builds the HTTP-level Tower middleware stack.
///
/// **Middleware ordering (outermost to innermost):**
/// 1. `SetRequestId`: assigns a UUID v4 `X-Request-Id` to every request
/// 2. `Tracing`: request/response spans
/// 3. `Compression`: gzip responses
/// 4. `CORS`: configured origins; identity headers are allowed
/// 5. `Timeout`: caps request handling at `request_timeout`
/// 6. `PropagateRequestId`: copies `X-Request-Id` onto the response
#[must_use]
pub fn build_http_layers(config: &NetworkConfig) -> HttpLayers {
    let x_request_id = HeaderName::from_static("x-request-id");

    ServiceBuilder::new()
        .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(build_cors_layer(config))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            config.request_timeout,
        ))
        .layer(PropagateRequestIdLayer::new(x_request_id))
        .into_inner()
}

fn build_cors_layer(config: &NetworkConfig) -> CorsLayer {
    let allow_origin = if config.allows_any_origin() {
        AllowOrigin::any()
    } else {
        let parsed: Vec<_> = config
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        AllowOrigin::list(parsed)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE])
        .allow_headers(Any)
}

fn tenant_in_query(uri: &Uri) -> bool {
    match Query::<HashMap<String, String>>::try_from_uri(uri) {
        Ok(Query(params)) => params.contains_key(TENANT_QUERY_PARAM),
        // Undecodable query strings are checked by raw key.
        Err(_) => uri.query().is_some_and(|q| {
            q.split('&')
                .any(|pair| pair.split('=').next() == Some(TENANT_QUERY_PARAM))
        }),
    }
}

fn uuid_header(headers: &HeaderMap, header: &'static str) -> Result<Option<Uuid>, TenancyError> {
    let Some(raw) = headers.get(header) else {
        return Ok(None);
    };
    let text = raw
        .to_str()
        .map_err(|_| TenancyError::InvalidHeader { header })?
        .trim();
    if text.is_empty() {
        return Ok(None);
    }
    Uuid::parse_str(text)
        .map(Some)
        .map_err(|_| TenancyError::InvalidHeader { header })
}

/// Builds the request context from identity headers.
///
/// # Errors
///
/// [`TenancyError::TenantIdInQuery`] if the tenant is passed in the query
/// string; [`TenancyError::InvalidHeader`] naming the first malformed header.
pub fn extract_context(uri: &Uri, headers: &HeaderMap) -> Result<RequestContext, TenancyError> {
    if tenant_in_query(uri) {
        return Err(TenancyError::TenantIdInQuery {
            header: TENANT_HEADER,
        });
    }
    let tenant_id = uuid_header(headers, TENANT_HEADER)?;
    let actor_id = uuid_header(headers, ACTOR_HEADER)?;
    Ok(RequestContext::for_tenant(tenant_id, actor_id))
}

/// Runs the request inside a context scope built from its identity headers.
///
/// The scope closes when the handler future completes, fails, or is
/// dropped, so the previous context is restored on every path.
pub async fn tenant_context_middleware(request: Request, next: Next) -> Response {
    let ctx = match extract_context(request.uri(), request.headers()) {
        Ok(ctx) => ctx,
        Err(err) => {
            tracing::debug!(error = %err, "rejected request identity");
            return err.into_response();
        }
    };

    let span = tracing::info_span!(
        "tenant_request",
        tenant_id = ?ctx.tenant_id,
        actor_id = ?ctx.actor_id,
    );
    context::scope(ctx, next.run(request)).instrument(span).await
}

/// Holds an in-flight guard for the duration of each request.
pub async fn track_in_flight(
    State(shutdown): State<Arc<ShutdownController>>,
    request: Request,
    next: Next,
) -> Response {
    let _guard = shutdown.in_flight_guard();
    next.run(request).await
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::http::HeaderValue;

    use super::*;

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_str(value).unwrap());
        }
        map
    }

    #[test]
    fn build_http_layers_with_custom_config() {
        let config = NetworkConfig {
            request_timeout: Duration::from_secs(5),
            cors_origins: vec!["https://example.com".to_string()],
            ..NetworkConfig::default()
        };
        let _layers = build_http_layers(&config);
    }

    #[test]
    fn headers_populate_context() {
        let (tenant, actor) = (Uuid::new_v4(), Uuid::new_v4());
        let ctx = extract_context(
            &Uri::from_static("/tenant"),
            &headers(&[
                (TENANT_HEADER, &tenant.to_string()),
                (ACTOR_HEADER, &actor.to_string()),
            ]),
        )
        .unwrap();
        assert_eq!(ctx, RequestContext::for_tenant(Some(tenant), Some(actor)));
        assert!(!ctx.include_deleted);
        assert!(!ctx.allow_global_access);
    }

    #[test]
    fn missing_headers_yield_empty_context() {
        let ctx = extract_context(&Uri::from_static("/health"), &HeaderMap::new()).unwrap();
        assert_eq!(ctx, RequestContext::default());
    }

    #[test]
    fn malformed_header_names_the_field() {
        let err = extract_context(
            &Uri::from_static("/tenant"),
            &headers(&[(TENANT_HEADER, &Uuid::new_v4().to_string()), (ACTOR_HEADER, "bob")]),
        )
        .unwrap_err();
        assert!(matches!(err, TenancyError::InvalidHeader { header: ACTOR_HEADER }));
    }

    #[test]
    fn tenant_in_query_is_rejected() {
        for uri in [
            "/tenant?tenant_id=abc",
            "/tenant/members?x=1&tenant_id=",
            "/tenant?tenant_id=%ZZ",
        ] {
            let err = extract_context(&Uri::from_static(uri), &HeaderMap::new()).unwrap_err();
            assert!(
                matches!(err, TenancyError::TenantIdInQuery { header: TENANT_HEADER }),
                "{uri}"
            );
        }
        assert!(extract_context(&Uri::from_static("/tenant?tenant=abc"), &HeaderMap::new()).is_ok());
    }
}
