//! Axum router construction and broker route mapping.
//!
//! The [`app`] function wires every broker endpoint to its handler and
//! returns a ready-to-serve [`axum::Router`].

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, HeaderValue, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, put},
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};
use utoipa::OpenApi;

use crate::auth::{self, AuthResult};
use crate::errors::BrokerError;
use crate::metrics::{metrics_handler, metrics_middleware};
use crate::AppState;

/// Request correlation header defined by the broker API.
pub const REQUEST_IDENTITY_HEADER: &str = "x-broker-api-request-identity";

// -- OpenAPI document ---------------------------------------------------------

/// OpenAPI documentation for the broker API.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Azure Storage Service Broker",
        version = "0.1.0",
        description = "Open Service Broker API for Azure Storage accounts"
    ),
    paths(
        health_check,
        crate::handlers::catalog::get_catalog,
        crate::handlers::instance::provision,
        crate::handlers::instance::last_operation,
        crate::handlers::instance::deprovision,
        crate::handlers::binding::bind,
        crate::handlers::binding::unbind,
    ),
    tags(
        (name = "Health", description = "Health check endpoints"),
        (name = "Catalog", description = "Service offerings"),
        (name = "Instance", description = "Service instance lifecycle"),
        (name = "Binding", description = "Service binding lifecycle"),
    )
)]
struct ApiDoc;

/// Build the axum [`Router`] with all broker routes.
///
/// The returned router is ready to be passed to `axum::serve`.
pub fn app(state: Arc<AppState>) -> Router {
    let openapi = ApiDoc::openapi();

    Router::new()
        // Health check endpoint (not part of the broker API).
        .route("/health", get(health_check))
        // Prometheus metrics endpoint.
        .route("/metrics", get(metrics_handler))
        .route(
            "/openapi.json",
            get(move || {
                let doc = openapi.clone();
                async move { Json(doc) }
            }),
        )
        .route("/v2/catalog", get(handle_get_catalog))
        .route(
            "/v2/service_instances/:instance_id",
            put(handle_provision).delete(handle_deprovision),
        )
        .route(
            "/v2/service_instances/:instance_id/last_operation",
            get(handle_last_operation),
        )
        .route(
            "/v2/service_instances/:instance_id/service_bindings/:binding_id",
            put(handle_bind).delete(handle_unbind),
        )
        // Application state shared across all handlers.
        .with_state(state.clone())
        // Layer ordering: inner layers run first, outer layers wrap them.
        // auth_middleware is innermost (closest to handlers, after routing).
        .layer(middleware::from_fn_with_state(state, auth_middleware))
        // request_identity_middleware echoes the correlation header.
        .layer(middleware::from_fn(request_identity_middleware))
        // metrics_middleware captures the full request lifecycle.
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
}

// -- Request identity middleware ---------------------------------------------

/// Copy `X-Broker-API-Request-Identity` from the request onto the response,
/// generating a UUID when the platform did not send one.
async fn request_identity_middleware(req: Request<axum::body::Body>, next: Next) -> Response {
    let identity = req
        .headers()
        .get(REQUEST_IDENTITY_HEADER)
        .cloned()
        .or_else(|| HeaderValue::from_str(&uuid::Uuid::new_v4().to_string()).ok());

    if let Some(ref id) = identity {
        debug!(
            "{} {} request identity {:?}",
            req.method(),
            req.uri().path(),
            id
        );
    }

    let mut response = next.run(req).await;
    if let Some(id) = identity {
        response.headers_mut().insert(REQUEST_IDENTITY_HEADER, id);
    }
    response
}

// -- Auth middleware ---------------------------------------------------------

/// Paths that bypass authentication.
const AUTH_SKIP_PATHS: &[&str] = &["/health", "/metrics", "/openapi.json", "/v2/catalog"];

/// HTTP Basic authentication middleware.
///
/// Runs before handlers and compares the credentials against the
/// configured broker username and password.  Returns `Unauthorized` on
/// any failure.
///
/// Skips auth for /health, /metrics, /openapi.json and /v2/catalog.
async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, BrokerError> {
    let path = req.uri().path().to_string();
    if AUTH_SKIP_PATHS.contains(&path.as_str()) {
        return Ok(next.run(req).await);
    }

    let header = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    let message = match auth::check_basic_auth(header, &state.config.auth) {
        AuthResult::Ok => return Ok(next.run(req).await),
        AuthResult::Missing => "No authentication information provided".to_string(),
        AuthResult::Malformed(reason) => reason,
        AuthResult::Mismatch => "Invalid broker credentials".to_string(),
    };

    warn!("Unauthorized {} {}: {}", req.method(), path, message);
    Err(BrokerError::Unauthorized { message })
}

// -- Health check ------------------------------------------------------------

/// `GET /health` -- Returns `{"status": "ok"}` with 200 OK.
#[utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    operation_id = "HealthCheck",
    responses(
        (status = 200, description = "Health check OK")
    )
)]
async fn health_check() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "application/json")],
        r#"{"status":"ok"}"#,
    )
}

// -- Route dispatch ----------------------------------------------------------

/// Query string of `PUT /v2/service_instances/:instance_id`.
#[derive(Debug, Default, Deserialize)]
struct ProvisionQuery {
    #[serde(default)]
    accepts_incomplete: Option<String>,
}

/// `GET /v2/catalog`
async fn handle_get_catalog(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Response, BrokerError> {
    crate::handlers::catalog::get_catalog(state, &headers).await
}

/// `PUT /v2/service_instances/:instance_id` -- Provision. Only the literal
/// `accepts_incomplete=true` opts in to asynchronous provisioning.
async fn handle_provision(
    State(state): State<Arc<AppState>>,
    Path(instance_id): Path<String>,
    Query(query): Query<ProvisionQuery>,
    body: axum::body::Bytes,
) -> Result<Response, BrokerError> {
    let accepts_incomplete = query.accepts_incomplete.as_deref() == Some("true");
    crate::handlers::instance::provision(state, &instance_id, accepts_incomplete, &body).await
}

/// `DELETE /v2/service_instances/:instance_id` -- Deprovision.
async fn handle_deprovision(
    State(state): State<Arc<AppState>>,
    Path(instance_id): Path<String>,
) -> Result<Response, BrokerError> {
    crate::handlers::instance::deprovision(state, &instance_id).await
}

/// `GET /v2/service_instances/:instance_id/last_operation`
async fn handle_last_operation(
    State(state): State<Arc<AppState>>,
    Path(instance_id): Path<String>,
) -> Result<Response, BrokerError> {
    crate::handlers::instance::last_operation(state, &instance_id).await
}

/// `PUT /v2/service_instances/:instance_id/service_bindings/:binding_id`
async fn handle_bind(
    State(state): State<Arc<AppState>>,
    Path((instance_id, binding_id)): Path<(String, String)>,
    body: axum::body::Bytes,
) -> Result<Response, BrokerError> {
    crate::handlers::binding::bind(state, &instance_id, &binding_id, &body).await
}

/// `DELETE /v2/service_instances/:instance_id/service_bindings/:binding_id`
async fn handle_unbind(
    State(state): State<Arc<AppState>>,
    Path((instance_id, binding_id)): Path<(String, String)>,
) -> Result<Response, BrokerError> {
    crate::handlers::binding::unbind(state, &instance_id, &binding_id).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::fake::FakeCloudClient;
    use crate::cloud::CloudClient;
    use crate::config::Config;
    use crate::model::OperationState;
    use crate::state::memory::MemoryBrokerStore;
    use crate::state::store::BrokerStore;
    use axum::body::Body;
    use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
    use base64::Engine;
    use serde_json::{json, Value};
    use tempfile::TempDir;
    use tower::ServiceExt;

    const CATALOG: &str = r#"{"services":[{"id":"azure-storage","name":"azurestorageservice","bindable":true,"plans":[{"id":"standard","name":"standard"}]}]}"#;

    const PROVISION_BODY: &str = r#"{
        "service_id": "azure-storage",
        "plan_id": "standard",
        "organization_guid": "org-1",
        "space_guid": "space-1"
    }"#;

    struct Harness {
        app: Router,
        cloud: Arc<FakeCloudClient>,
        store: Arc<MemoryBrokerStore>,
        _tmp: TempDir,
    }

    fn harness() -> Harness {
        let tmp = TempDir::new().expect("failed to create temp dir");
        let catalog_path = tmp.path().join("catalog.json");
        std::fs::write(&catalog_path, CATALOG).unwrap();

        let mut config = Config::default();
        config.auth.username = "broker".to_string();
        config.auth.password = "secret".to_string();
        config.catalog.path = catalog_path.to_str().unwrap().to_string();

        let cloud = Arc::new(FakeCloudClient::new());
        let store = Arc::new(MemoryBrokerStore::new());
        let state = Arc::new(AppState {
            config,
            store: store.clone() as Arc<dyn BrokerStore>,
            cloud: cloud.clone() as Arc<dyn CloudClient>,
        });

        Harness {
            app: app(state),
            cloud,
            store,
            _tmp: tmp,
        }
    }

    fn basic(user: &str, pass: &str) -> String {
        format!("Basic {}", BASE64_STANDARD.encode(format!("{user}:{pass}")))
    }

    struct Reply {
        status: StatusCode,
        headers: HeaderMap,
        body: Value,
    }

    async fn call(app: &Router, req: Request<Body>) -> Reply {
        let response = app.clone().oneshot(req).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        Reply {
            status,
            headers,
            body,
        }
    }

    /// Authenticated request.
    async fn send(app: &Router, method: &str, uri: &str, body: Option<&str>) -> Reply {
        let req = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::AUTHORIZATION, basic("broker", "secret"))
            .header(header::CONTENT_TYPE, "application/json")
            .body(body.map(|b| Body::from(b.to_string())).unwrap_or_else(Body::empty))
            .unwrap();
        call(app, req).await
    }

    async fn provision(app: &Router, id: &str) -> Reply {
        send(
            app,
            "PUT",
            &format!("/v2/service_instances/{id}?accepts_incomplete=true"),
            Some(PROVISION_BODY),
        )
        .await
    }

    async fn poll(app: &Router, id: &str) -> Reply {
        send(
            app,
            "GET",
            &format!("/v2/service_instances/{id}/last_operation"),
            None,
        )
        .await
    }

    async fn bind(app: &Router, id: &str, binding: &str) -> Reply {
        send(
            app,
            "PUT",
            &format!("/v2/service_instances/{id}/service_bindings/{binding}"),
            Some(r#"{"service_id":"azure-storage","plan_id":"standard","app_guid":"app-1"}"#),
        )
        .await
    }

    // -- Infrastructure ------------------------------------------------------

    #[tokio::test]
    async fn test_health_needs_no_auth() {
        let h = harness();
        let req = Request::get("/health").body(Body::empty()).unwrap();
        let reply = call(&h.app, req).await;
        assert_eq!(reply.status, StatusCode::OK);
        assert_eq!(reply.body["status"], "ok");
    }

    #[tokio::test]
    async fn test_openapi_lists_broker_routes() {
        let h = harness();
        let req = Request::get("/openapi.json").body(Body::empty()).unwrap();
        let reply = call(&h.app, req).await;
        assert_eq!(reply.status, StatusCode::OK);
        assert!(reply.body["paths"]["/v2/catalog"].is_object());
        assert!(reply.body["paths"]["/v2/service_instances/{instance_id}"].is_object());
    }

    #[tokio::test]
    async fn test_request_identity_echoed() {
        let h = harness();
        let req = Request::get("/health")
            .header(REQUEST_IDENTITY_HEADER, "e26cea65-1fa5-4a1f-8d5c-4b1b5e8b2b8a")
            .body(Body::empty())
            .unwrap();
        let reply = call(&h.app, req).await;
        assert_eq!(
            reply.headers.get(REQUEST_IDENTITY_HEADER).unwrap(),
            "e26cea65-1fa5-4a1f-8d5c-4b1b5e8b2b8a"
        );

        let req = Request::get("/health").body(Body::empty()).unwrap();
        let reply = call(&h.app, req).await;
        let generated = reply.headers.get(REQUEST_IDENTITY_HEADER).unwrap();
        assert!(uuid::Uuid::parse_str(generated.to_str().unwrap()).is_ok());
    }

    // -- Auth ------------------------------------------------------------------

    #[tokio::test]
    async fn test_missing_credentials_rejected() {
        let h = harness();
        let req = Request::put("/v2/service_instances/abc?accepts_incomplete=true")
            .body(Body::from(PROVISION_BODY))
            .unwrap();
        let reply = call(&h.app, req).await;
        assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
        assert!(reply.headers.contains_key(header::WWW_AUTHENTICATE));
        assert!(h.cloud.calls().is_empty());
    }

    #[tokio::test]
    async fn test_wrong_password_rejected() {
        let h = harness();
        let req = Request::get("/v2/service_instances/abc/last_operation")
            .header(header::AUTHORIZATION, basic("broker", "nope"))
            .body(Body::empty())
            .unwrap();
        let reply = call(&h.app, req).await;
        assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    }

    // -- Catalog ---------------------------------------------------------------

    #[tokio::test]
    async fn test_catalog_served_verbatim_without_auth() {
        let h = harness();
        let req = Request::get("/v2/catalog")
            .header("X-Broker-Api-Version", "2.13")
            .body(Body::empty())
            .unwrap();
        let reply = call(&h.app, req).await;
        assert_eq!(reply.status, StatusCode::OK);
        let expected: Value = serde_json::from_str(CATALOG).unwrap();
        assert_eq!(reply.body, expected);
    }

    #[tokio::test]
    async fn test_catalog_old_api_version() {
        let h = harness();
        let req = Request::get("/v2/catalog")
            .header("X-Broker-Api-Version", "2.4")
            .body(Body::empty())
            .unwrap();
        let reply = call(&h.app, req).await;
        assert_eq!(reply.status, StatusCode::PRECONDITION_FAILED);
    }

    #[tokio::test]
    async fn test_catalog_unreadable() {
        let h = harness();
        std::fs::remove_file(h._tmp.path().join("catalog.json")).unwrap();
        let req = Request::get("/v2/catalog").body(Body::empty()).unwrap();
        let reply = call(&h.app, req).await;
        assert_eq!(reply.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(reply.body["description"].is_string());
    }

    // -- Provision ---------------------------------------------------------------

    #[tokio::test]
    async fn test_provision_requires_accepts_incomplete() {
        let h = harness();
        for uri in [
            "/v2/service_instances/abc",
            "/v2/service_instances/abc?accepts_incomplete=false",
        ] {
            let reply = send(&h.app, "PUT", uri, Some(PROVISION_BODY)).await;
            assert_eq!(reply.status, StatusCode::UNPROCESSABLE_ENTITY);
            assert_eq!(
                reply.body,
                json!({
                    "error": "AsyncRequired",
                    "description": "This service plan requires client support for asynchronous service operations."
                })
            );
        }
        assert!(h.cloud.calls().is_empty());
        assert!(h.store.get_instance("abc").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_provision_accepted() {
        let h = harness();
        let reply = provision(&h.app, "abc").await;
        assert_eq!(reply.status, StatusCode::ACCEPTED);
        assert_eq!(reply.body["operation"], "provision");
        assert_eq!(reply.body["dashboard_url"], "http://dashboard_url");
        assert_eq!(h.cloud.count("create_instance"), 1);

        let instance = h.store.get_instance("abc").await.unwrap().unwrap();
        assert_eq!(instance.resource_group_name, "cloud-foundry-abc");
        assert_eq!(instance.storage_account_name, "cfabc");
        assert_eq!(instance.organization_guid, "org-1");
        assert_eq!(instance.last_operation.state, OperationState::InProgress);
        assert_eq!(
            instance.last_operation.description,
            "creating service instance..."
        );
    }

    #[tokio::test]
    async fn test_reprovision_identical_and_conflicting() {
        let h = harness();
        provision(&h.app, "abc").await;

        let again = provision(&h.app, "abc").await;
        assert_eq!(again.status, StatusCode::OK);

        let different = send(
            &h.app,
            "PUT",
            "/v2/service_instances/abc?accepts_incomplete=true",
            Some(r#"{"service_id":"azure-storage","plan_id":"premium"}"#),
        )
        .await;
        assert_eq!(different.status, StatusCode::CONFLICT);
        assert_eq!(h.cloud.count("create_instance"), 1);
    }

    #[tokio::test]
    async fn test_provision_invalid_parameters() {
        let h = harness();
        let reply = send(
            &h.app,
            "PUT",
            "/v2/service_instances/abc?accepts_incomplete=true",
            Some(r#"{"parameters":{"storage_account_name":"NOT_VALID"}}"#),
        )
        .await;
        assert_eq!(reply.status, StatusCode::BAD_REQUEST);
        assert!(h.cloud.calls().is_empty());
    }

    #[tokio::test]
    async fn test_provision_with_resource_group_override() {
        let h = harness();
        let reply = send(
            &h.app,
            "PUT",
            "/v2/service_instances/abc?accepts_incomplete=true",
            Some(
                r#"{"service_id":"azure-storage","plan_id":"standard",
                    "parameters":{"resource_group_name":"my-rg(1)_x.y"}}"#,
            ),
        )
        .await;
        assert_eq!(reply.status, StatusCode::ACCEPTED);

        let instance = h.store.get_instance("abc").await.unwrap().unwrap();
        assert_eq!(instance.resource_group_name, "my-rg(1)_x.y");
        assert_eq!(instance.storage_account_name, "cfabc");
    }

    #[tokio::test]
    async fn test_provision_rejects_bad_resource_group_name() {
        let h = harness();
        let reply = send(
            &h.app,
            "PUT",
            "/v2/service_instances/abc?accepts_incomplete=true",
            Some(r#"{"parameters":{"resource_group_name":"ends-with-dot."}}"#),
        )
        .await;
        assert_eq!(reply.status, StatusCode::BAD_REQUEST);
        assert!(h.cloud.calls().is_empty());
    }

    #[tokio::test]
    async fn test_provision_rejects_id_too_short_for_account_name() {
        let h = harness();
        let reply = provision(&h.app, "-").await;
        assert_eq!(reply.status, StatusCode::BAD_REQUEST);
        assert!(h.cloud.calls().is_empty());
        assert!(h.store.get_instance("-").await.unwrap().is_none());

        let explicit = send(
            &h.app,
            "PUT",
            "/v2/service_instances/-?accepts_incomplete=true",
            Some(r#"{"parameters":{"storage_account_name":"explicitname"}}"#),
        )
        .await;
        assert_eq!(explicit.status, StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn test_provision_cloud_failure_stores_nothing() {
        let h = harness();
        h.cloud.set_fail_create(true);
        let reply = provision(&h.app, "abc").await;
        assert_eq!(reply.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(h.store.get_instance("abc").await.unwrap().is_none());
    }

    // -- Last operation ----------------------------------------------------------

    #[tokio::test]
    async fn test_poll_while_creating() {
        let h = harness();
        provision(&h.app, "abc").await;
        h.cloud.set_remote_state("Creating");

        let reply = poll(&h.app, "abc").await;
        assert_eq!(reply.status, StatusCode::OK);
        assert_eq!(reply.body["state"], "in progress");
        assert_eq!(
            reply.body["description"],
            "Creating the service instance, state: Creating"
        );
        assert_eq!(reply.headers.get(header::RETRY_AFTER).unwrap(), "30");
    }

    #[tokio::test]
    async fn test_poll_terminal_state_not_repolled() {
        let h = harness();
        provision(&h.app, "abc").await;
        h.cloud.set_remote_state("Succeeded");

        let reply = poll(&h.app, "abc").await;
        assert_eq!(reply.body["state"], "succeeded");
        assert!(reply.headers.get(header::RETRY_AFTER).is_none());
        let stored = h.store.get_instance("abc").await.unwrap().unwrap();
        assert_eq!(stored.last_operation.state, OperationState::Succeeded);

        h.cloud.set_remote_state("Deleting");
        let reply = poll(&h.app, "abc").await;
        assert_eq!(reply.body["state"], "succeeded");
        assert_eq!(h.cloud.count("get_instance_state"), 1);
    }

    #[tokio::test]
    async fn test_poll_unexpected_remote_state_fails() {
        let h = harness();
        provision(&h.app, "abc").await;
        h.cloud.set_remote_state("Deleting");

        let reply = poll(&h.app, "abc").await;
        assert_eq!(reply.body["state"], "failed");
        assert_eq!(
            reply.body["description"],
            "Failed to create the service instance, state: Deleting"
        );
    }

    #[tokio::test]
    async fn test_poll_unknown_instance_gone() {
        let h = harness();
        let reply = poll(&h.app, "nope").await;
        assert_eq!(reply.status, StatusCode::GONE);
        assert_eq!(reply.body, json!({}));
        assert!(h.cloud.calls().is_empty());
    }

    #[tokio::test]
    async fn test_poll_remote_missing_gone() {
        let h = harness();
        provision(&h.app, "abc").await;
        h.cloud.set_missing(true);
        let reply = poll(&h.app, "abc").await;
        assert_eq!(reply.status, StatusCode::GONE);
    }

    // -- Deprovision -------------------------------------------------------------

    #[tokio::test]
    async fn test_deprovision_unknown_instance() {
        let h = harness();
        let reply = send(&h.app, "DELETE", "/v2/service_instances/nope", None).await;
        assert_eq!(reply.status, StatusCode::GONE);
        assert!(h.cloud.calls().is_empty());
    }

    #[tokio::test]
    async fn test_deprovision_cascades_to_bindings() {
        let h = harness();
        provision(&h.app, "abc").await;
        provision(&h.app, "other").await;
        bind(&h.app, "abc", "b1").await;
        bind(&h.app, "abc", "b2").await;
        bind(&h.app, "other", "b3").await;

        let reply = send(&h.app, "DELETE", "/v2/service_instances/abc", None).await;
        assert_eq!(reply.status, StatusCode::OK);
        assert_eq!(reply.body, json!({}));
        assert_eq!(h.cloud.count("delete_instance cloud-foundry-abc cfabc"), 1);

        assert!(h.store.get_instance("abc").await.unwrap().is_none());
        let remaining: Vec<String> = h
            .store
            .list_bindings()
            .await
            .unwrap()
            .into_iter()
            .map(|b| b.id)
            .collect();
        assert_eq!(remaining, vec!["b3".to_string()]);
    }

    // -- Bind / unbind -----------------------------------------------------------

    #[tokio::test]
    async fn test_bind_unknown_instance() {
        let h = harness();
        let reply = bind(&h.app, "nope", "b1").await;
        assert_eq!(reply.status, StatusCode::NOT_FOUND);
        assert!(h.store.list_bindings().await.unwrap().is_empty());
        assert!(h.cloud.calls().is_empty());
    }

    #[tokio::test]
    async fn test_bind_returns_credentials() {
        let h = harness();
        provision(&h.app, "abc").await;

        let reply = bind(&h.app, "abc", "b1").await;
        assert_eq!(reply.status, StatusCode::CREATED);
        let creds = &reply.body["credentials"];
        assert_eq!(creds["storage_account_name"], "cfabc");
        assert_eq!(creds["container_name"], "cloud-foundry-abc");
        assert_eq!(creds["primary_access_key"], "primary-0");
        assert_eq!(creds["secondary_access_key"], "secondary-0");

        let binding = h.store.get_binding("b1").await.unwrap().unwrap();
        assert_eq!(binding.app_id, "app-1");
        assert_eq!(binding.service_instance_id, "abc");
    }

    #[tokio::test]
    async fn test_bind_without_body_uses_instance_ids() {
        let h = harness();
        provision(&h.app, "abc").await;

        let reply = send(
            &h.app,
            "PUT",
            "/v2/service_instances/abc/service_bindings/b1",
            None,
        )
        .await;
        assert_eq!(reply.status, StatusCode::CREATED);
        let binding = h.store.get_binding("b1").await.unwrap().unwrap();
        assert_eq!(binding.service_id, "azure-storage");
        assert_eq!(binding.service_plan_id, "standard");
    }

    #[tokio::test]
    async fn test_unbind_regenerates_keys() {
        let h = harness();
        provision(&h.app, "abc").await;
        bind(&h.app, "abc", "b1").await;
        bind(&h.app, "abc", "b2").await;

        let uri = "/v2/service_instances/abc/service_bindings/b1";
        let reply = send(&h.app, "DELETE", uri, None).await;
        assert_eq!(reply.status, StatusCode::OK);
        assert_eq!(reply.body, json!({}));
        assert_eq!(h.cloud.key_generation(), 1);
        assert!(h.store.get_binding("b1").await.unwrap().is_none());
        assert!(h.store.get_binding("b2").await.unwrap().is_some());

        let again = send(&h.app, "DELETE", uri, None).await;
        assert_eq!(again.status, StatusCode::GONE);
        assert_eq!(h.cloud.key_generation(), 1);
    }

    #[tokio::test]
    async fn test_unbind_unknown_instance() {
        let h = harness();
        let reply = send(
            &h.app,
            "DELETE",
            "/v2/service_instances/nope/service_bindings/b1",
            None,
        )
        .await;
        assert_eq!(reply.status, StatusCode::GONE);
        assert!(h.cloud.calls().is_empty());
    }
}
