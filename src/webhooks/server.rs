//! Admission webhook server.
//!
//! Serves the synchronization admission guard for all four guarded kinds.
//!
//! To enable webhooks:
//! 1. Deploy cert-manager for TLS certificates
//! 2. Create a ValidatingWebhookConfiguration covering UPDATE on
//!    machine.openshift.io and cluster.x-k8s.io MachineSets/Machines
//! 3. Mount the TLS certificate secret to the operator pod at /etc/webhook/certs/
//!
//! The webhook server starts automatically when certificates are present.
//! Clusters without the webhook are still safe, just slower to converge: the
//! reconcilers evaluate the same predicate and revert drift after the fact.

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::post};
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation};
use kube::{Api, Client, Resource, ResourceExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::controller::authority::ApiSide;
use crate::controller::common::is_managed_mirror;
use crate::controller::context::{DEFAULT_CAPI_NAMESPACE, DEFAULT_MAPI_NAMESPACE};
use crate::crd::{
    AuthoritativeApi, CapiMachine, CapiMachineSet, MapiMachine, MapiMachineSet,
    AUTHORITY_ANNOTATION,
};
use crate::webhooks::policies::{
    mutations::{classify, GuardedView},
    validate_all, ValidationContext,
};

/// Default path to webhook TLS certificate
pub const WEBHOOK_CERT_PATH: &str = "/etc/webhook/certs/tls.crt";
/// Default path to webhook TLS private key
pub const WEBHOOK_KEY_PATH: &str = "/etc/webhook/certs/tls.key";
/// Default webhook server port
pub const WEBHOOK_PORT: u16 = 9443;

/// Shared state for webhook handlers
pub struct WebhookState {
    pub client: Client,
    pub mapi_namespace: String,
    pub capi_namespace: String,
}

impl WebhookState {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            mapi_namespace: std::env::var("MAPI_NAMESPACE")
                .unwrap_or_else(|_| DEFAULT_MAPI_NAMESPACE.to_string()),
            capi_namespace: std::env::var("CAPI_NAMESPACE")
                .unwrap_or_else(|_| DEFAULT_CAPI_NAMESPACE.to_string()),
        }
    }
}

/// Create a denial response with reason embedded in message.
/// kube-rs deny() only sets status.message, so we format as "[reason] message"
fn deny_with_reason<T: Resource<DynamicType = ()>>(
    request: &AdmissionRequest<T>,
    message: &str,
    reason: &str,
) -> AdmissionReview<kube::core::DynamicObject> {
    let full_message = format!("[{}] {}", reason, message);
    AdmissionResponse::from(request)
        .deny(full_message)
        .into_review()
}

/// Create the webhook router
pub fn create_webhook_router(state: Arc<WebhookState>) -> Router {
    Router::new()
        .route("/validate-mapi-machineset", post(validate_mapi_machineset))
        .route("/validate-mapi-machine", post(validate_mapi_machine))
        .route("/validate-capi-machineset", post(validate_capi_machineset))
        .route("/validate-capi-machine", post(validate_capi_machine))
        .with_state(state)
}

/// Build the guarded view of one object version.
fn guarded_view<K, S>(obj: &K, spec: &S) -> GuardedView
where
    K: Resource<DynamicType = ()>,
    S: Serialize,
{
    GuardedView {
        labels: obj.meta().labels.clone().unwrap_or_default(),
        annotations: obj.meta().annotations.clone().unwrap_or_default(),
        spec: serde_json::to_value(spec).unwrap_or(Value::Null),
    }
}

/// The pair authority recorded on a CAPI mirror, read from its annotation.
/// Unannotated CAPI objects are not mirrors and are not guarded.
fn capi_authority<K: Resource<DynamicType = ()>>(obj: &K) -> Option<AuthoritativeApi> {
    let value = obj.meta().annotations.as_ref()?.get(AUTHORITY_ANNOTATION)?;
    match value.as_str() {
        "MachineAPI" => Some(AuthoritativeApi::MachineApi),
        "ClusterAPI" => Some(AuthoritativeApi::ClusterApi),
        _ => None,
    }
}

/// Deny a CREATE whose same-named counterpart already exists on the other
/// side under a different lifecycle. Adoption of a foreign object would hand
/// its cloud instance a second owner, so the collision is rejected up front;
/// a counterpart that is one of our mirrors is fine (recreation flows).
/// Lookup failures allow the request: the reconciler re-checks and surfaces
/// `Synchronized=False/NameConflict` after the fact.
async fn deny_create_collision<K, C>(
    request: &AdmissionRequest<K>,
    counterpart_api: &Api<C>,
    counterpart_desc: &str,
) -> Option<(StatusCode, Json<AdmissionReview<kube::core::DynamicObject>>)>
where
    K: Resource<DynamicType = ()>,
    C: Resource<DynamicType = ()> + Clone + DeserializeOwned + std::fmt::Debug,
{
    if request.operation != Operation::Create {
        return None;
    }
    let name = match &request.object {
        Some(obj) => obj.name_any(),
        None => request.name.clone(),
    };
    if name.is_empty() {
        return None;
    }

    match counterpart_api.get_opt(&name).await {
        Ok(Some(counterpart)) if !is_managed_mirror(&counterpart) => {
            warn!(name = %name, "Denying CREATE: foreign same-named counterpart exists");
            Some((
                StatusCode::OK,
                Json(deny_with_reason(
                    request,
                    &format!(
                        "A {} named {} already exists and is not managed by this operator",
                        counterpart_desc, name
                    ),
                    "NameConflict",
                )),
            ))
        }
        Ok(_) => None,
        Err(e) => {
            warn!(name = %name, error = %e, "Counterpart lookup failed; allowing CREATE");
            None
        }
    }
}

/// Shared admission flow for all guarded kinds. `authority_of` decides the
/// pair's authority from the old object, returning `None` for objects the
/// guard does not apply to.
fn process_request<K>(
    request: &AdmissionRequest<K>,
    side: ApiSide,
    authority_of: impl Fn(&K) -> Option<AuthoritativeApi>,
    view_of: impl Fn(&K) -> GuardedView,
) -> (StatusCode, Json<AdmissionReview<kube::core::DynamicObject>>)
where
    K: Resource<DynamicType = ()>,
{
    let uid = &request.uid;
    debug!(
        uid = %uid,
        operation = ?request.operation,
        namespace = ?request.namespace,
        name = ?request.name,
        "Processing admission request"
    );

    // Only UPDATE reaches the mutation guard: CREATE collisions are judged
    // before this point, deletions follow the cascade rules, and status
    // writes go through the subresource.
    if request.operation != Operation::Update || request.sub_resource.is_some() {
        return (
            StatusCode::OK,
            Json(AdmissionResponse::from(request).into_review()),
        );
    }

    let (Some(new_obj), Some(old_obj)) = (&request.object, &request.old_object) else {
        error!(uid = %uid, "UPDATE request missing object or oldObject");
        return (
            StatusCode::OK,
            Json(deny_with_reason(
                request,
                "Missing object in request",
                "InvalidRequest",
            )),
        );
    };

    let Some(authority) = authority_of(old_obj) else {
        // Not part of a mirror pair.
        return (
            StatusCode::OK,
            Json(AdmissionResponse::from(request).into_review()),
        );
    };

    let mutations = classify(&view_of(old_obj), &view_of(new_obj));
    let username = request.user_info.username.as_deref().unwrap_or("");
    let ctx = ValidationContext {
        username,
        side,
        authority,
        mutations: &mutations,
    };

    let result = validate_all(&ctx);
    if !result.allowed {
        let reason = result
            .reason
            .unwrap_or_else(|| "ValidationFailed".to_string());
        let message = result
            .message
            .unwrap_or_else(|| "Validation failed".to_string());
        warn!(uid = %uid, reason = %reason, message = %message, "Admission request denied");
        return (
            StatusCode::OK,
            Json(deny_with_reason(request, &message, &reason)),
        );
    }

    info!(uid = %uid, "Admission request allowed");
    (
        StatusCode::OK,
        Json(AdmissionResponse::from(request).into_review()),
    )
}

fn extract_request<K>(
    review: AdmissionReview<K>,
) -> Result<AdmissionRequest<K>, (StatusCode, Json<AdmissionReview<kube::core::DynamicObject>>)>
where
    K: Resource<DynamicType = ()>,
{
    review.try_into().map_err(|e| {
        error!(error = %e, "Failed to extract admission request");
        (
            StatusCode::BAD_REQUEST,
            Json(
                AdmissionResponse::invalid(format!("Invalid AdmissionReview: {}", e))
                    .into_review(),
            ),
        )
    })
}

async fn validate_mapi_machineset(
    State(state): State<Arc<WebhookState>>,
    Json(review): Json<AdmissionReview<MapiMachineSet>>,
) -> impl IntoResponse {
    let request = match extract_request(review) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    let counterpart: Api<CapiMachineSet> =
        Api::namespaced(state.client.clone(), &state.capi_namespace);
    if let Some(denial) =
        deny_create_collision(&request, &counterpart, "cluster.x-k8s.io MachineSet").await
    {
        return denial;
    }
    process_request(
        &request,
        ApiSide::MachineApi,
        |obj: &MapiMachineSet| Some(obj.spec.authoritative_api),
        |obj| guarded_view(obj, &obj.spec),
    )
}

async fn validate_mapi_machine(
    State(state): State<Arc<WebhookState>>,
    Json(review): Json<AdmissionReview<MapiMachine>>,
) -> impl IntoResponse {
    let request = match extract_request(review) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    let counterpart: Api<CapiMachine> =
        Api::namespaced(state.client.clone(), &state.capi_namespace);
    if let Some(denial) =
        deny_create_collision(&request, &counterpart, "cluster.x-k8s.io Machine").await
    {
        return denial;
    }
    process_request(
        &request,
        ApiSide::MachineApi,
        |obj: &MapiMachine| Some(obj.spec.authoritative_api),
        |obj| guarded_view(obj, &obj.spec),
    )
}

async fn validate_capi_machineset(
    State(state): State<Arc<WebhookState>>,
    Json(review): Json<AdmissionReview<CapiMachineSet>>,
) -> impl IntoResponse {
    let request = match extract_request(review) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    let counterpart: Api<MapiMachineSet> =
        Api::namespaced(state.client.clone(), &state.mapi_namespace);
    if let Some(denial) =
        deny_create_collision(&request, &counterpart, "machine.openshift.io MachineSet").await
    {
        return denial;
    }
    process_request(&request, ApiSide::ClusterApi, capi_authority, |obj| {
        guarded_view(obj, &obj.spec)
    })
}

async fn validate_capi_machine(
    State(state): State<Arc<WebhookState>>,
    Json(review): Json<AdmissionReview<CapiMachine>>,
) -> impl IntoResponse {
    let request = match extract_request(review) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    let counterpart: Api<MapiMachine> =
        Api::namespaced(state.client.clone(), &state.mapi_namespace);
    if let Some(denial) =
        deny_create_collision(&request, &counterpart, "machine.openshift.io Machine").await
    {
        return denial;
    }
    process_request(&request, ApiSide::ClusterApi, capi_authority, |obj| {
        guarded_view(obj, &obj.spec)
    })
}

/// Errors that can occur when running the webhook server
#[derive(Debug)]
pub enum WebhookError {
    /// TLS configuration error
    TlsConfig(String),
    /// Server error
    Server(String),
}

impl std::fmt::Display for WebhookError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WebhookError::TlsConfig(msg) => write!(f, "TLS configuration error: {}", msg),
            WebhookError::Server(msg) => write!(f, "Webhook server error: {}", msg),
        }
    }
}

impl std::error::Error for WebhookError {}

/// Run the webhook server with TLS
///
/// Binds to 0.0.0.0:9443 and serves the validation endpoints. TLS
/// certificates are loaded from the paths specified.
pub async fn run_webhook_server(
    client: Client,
    cert_path: &str,
    key_path: &str,
) -> Result<(), WebhookError> {
    use axum_server::tls_rustls::RustlsConfig;
    use std::net::SocketAddr;
    use std::path::PathBuf;

    let state = Arc::new(WebhookState::new(client));
    let app = create_webhook_router(state);

    let config = RustlsConfig::from_pem_file(PathBuf::from(cert_path), PathBuf::from(key_path))
        .await
        .map_err(|e| WebhookError::TlsConfig(e.to_string()))?;

    let addr = SocketAddr::from(([0, 0, 0, 0], WEBHOOK_PORT));
    info!(port = WEBHOOK_PORT, "Webhook server listening with TLS");

    axum_server::bind_rustls(addr, config)
        .serve(app.into_make_service())
        .await
        .map_err(|e| WebhookError::Server(e.to_string()))?;

    Ok(())
}
