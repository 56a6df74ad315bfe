//! HTTP routes
//!
//! Both listeners serve the same router. Stage artifacts go out with a
//! freshly signed stage config appended; the agent goes out unmodified.

use crate::embedded::{EmbeddedConfig, EmbeddedConfigGenerator};
use crate::error::SeederError;
use crate::installer::Installer;
use crate::registration::{Registrar, RegistrationRequest, RegistrationStatus};
use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use futures::{future, stream, StreamExt};
use seeder_artifacts::{agent_key, stage_key, Arch, Artifact, ArtifactProvider, ProviderChain, Stage};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::io::ReaderStream;
use tower_http::trace::TraceLayer;
use tracing::{debug, error};

/// Header ONIE uses to announce the machine architecture
pub const ONIE_ARCH_HEADER: &str = "onie-arch";

/// Shared, read-only request context
#[derive(Clone)]
pub(crate) struct AppState {
    pub chain: Arc<ProviderChain>,
    pub generator: Arc<EmbeddedConfigGenerator>,
    pub installer: Arc<Installer>,
    pub registrar: Arc<Registrar>,
    pub errors: mpsc::UnboundedSender<SeederError>,
}

impl AppState {
    /// Hand an operational error to the error channel
    fn report(&self, err: SeederError) {
        error!(error = %err, "Request failed");
        let _ = self.errors.send(err);
    }

    fn signed_stage_config(&self, stage: Stage, arch: Arch) -> Result<EmbeddedConfig, Response> {
        self.generator
            .generate(&self.installer.stage_config(stage, arch))
            .map_err(|e| {
                self.report(e);
                internal_error()
            })
    }
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    let error = status.canonical_reason().unwrap_or("Error").to_string();
    (
        status,
        Json(ErrorResponse {
            error,
            message: message.into(),
        }),
    )
        .into_response()
}

fn not_found() -> Response {
    error_response(StatusCode::NOT_FOUND, "artifact not available")
}

fn internal_error() -> Response {
    error_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to prepare configuration")
}

pub(crate) fn router(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/onie", get(onie))
        .route("/agent/{arch}", get(agent))
        .route("/config/{stage}/{arch}", get(stage_config))
        .route("/register", post(register))
        .route("/register/{device_id}", get(registration_status));

    for stage in Stage::ALL {
        router = router.route(
            &format!("/{stage}/{{arch}}"),
            get(move |State(state): State<AppState>, Path(arch): Path<String>| async move {
                match arch.parse::<Arch>() {
                    Ok(arch) => serve_stage(&state, stage, arch).await,
                    Err(_) => not_found(),
                }
            }),
        );
    }

    router.layer(TraceLayer::new_for_http()).with_state(state)
}

/// ONIE entry point: stage0 for the architecture in the request header
async fn onie(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let Some(raw) = headers.get(ONIE_ARCH_HEADER).and_then(|v| v.to_str().ok()) else {
        return error_response(StatusCode::BAD_REQUEST, "missing ONIE-ARCH header");
    };
    match Arch::from_onie(raw.trim()) {
        Some(arch) => serve_stage(&state, Stage::Stage0, arch).await,
        None => {
            debug!(onie_arch = %raw, "Unsupported ONIE architecture");
            not_found()
        }
    }
}

async fn serve_stage(state: &AppState, stage: Stage, arch: Arch) -> Response {
    let Some(artifact) = state.chain.get(&stage_key(stage, arch)).await else {
        return not_found();
    };
    let config = match state.signed_stage_config(stage, arch) {
        Ok(config) => config,
        Err(response) => return response,
    };
    match config.embed_trailer() {
        Ok(trailer) => stream_artifact(artifact, Bytes::from(trailer)),
        Err(e) => {
            state.report(e);
            internal_error()
        }
    }
}

async fn agent(State(state): State<AppState>, Path(arch): Path<String>) -> Response {
    let Ok(arch) = arch.parse::<Arch>() else {
        return not_found();
    };
    match state.chain.get(&agent_key(arch)).await {
        Some(artifact) => stream_artifact(artifact, Bytes::new()),
        None => not_found(),
    }
}

async fn stage_config(State(state): State<AppState>, Path((stage, arch)): Path<(String, String)>) -> Response {
    let (Ok(stage), Ok(arch)) = (stage.parse::<Stage>(), arch.parse::<Arch>()) else {
        return not_found();
    };
    let config = match state.signed_stage_config(stage, arch) {
        Ok(config) => config,
        Err(response) => return response,
    };
    match config.to_json() {
        Ok(json) => ([(header::CONTENT_TYPE, "application/json")], json).into_response(),
        Err(e) => {
            state.report(e);
            internal_error()
        }
    }
}

async fn register(
    State(state): State<AppState>,
    payload: Result<Json<RegistrationRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(payload) => payload,
        Err(rejection) => return error_response(StatusCode::BAD_REQUEST, rejection.body_text()),
    };

    match state.registrar.submit(request).await {
        Ok(status @ RegistrationStatus::Approved { .. }) => (StatusCode::OK, Json(status)).into_response(),
        Ok(status @ RegistrationStatus::Pending) => (StatusCode::ACCEPTED, Json(status)).into_response(),
        Err(e) => {
            let status = match &e {
                SeederError::RegistrationConflict { .. } => StatusCode::CONFLICT,
                SeederError::RegistrationFull { .. } => StatusCode::SERVICE_UNAVAILABLE,
                SeederError::Io { .. } => StatusCode::INTERNAL_SERVER_ERROR,
                _ => StatusCode::BAD_REQUEST,
            };
            let message = e.to_string();
            state.report(e);
            error_response(status, message)
        }
    }
}

async fn registration_status(State(state): State<AppState>, Path(device_id): Path<String>) -> Response {
    match state.registrar.status(&device_id).await {
        Some(status) => (StatusCode::OK, Json(status)).into_response(),
        None => error_response(StatusCode::NOT_FOUND, "unknown device"),
    }
}

/// Stream an artifact, followed by `trailer` when it isn't empty
fn stream_artifact(artifact: Artifact, trailer: Bytes) -> Response {
    let content_length = artifact.len().map(|len| len + trailer.len() as u64);
    let reader = ReaderStream::new(artifact.into_reader());

    let body = if trailer.is_empty() {
        Body::from_stream(reader)
    } else {
        Body::from_stream(reader.chain(stream::once(future::ready(Ok::<_, std::io::Error>(trailer)))))
    };

    let mut response = Response::new(body);
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/octet-stream"));
    if let Some(len) = content_length {
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::installer::StageConfig;
    use crate::test_support::{seeder_config, write_pem, TestCa};
    use axum::body::to_bytes;
    use axum::http::Request;
    use seeder_artifacts::{EmbeddedProvider, EmbeddedTable};
    use seeder_config::RegistrySettings;
    use tower::ServiceExt;

    static ARTIFACTS: EmbeddedTable = &[
        ("stage0-x86_64", b"stage0 for x86_64"),
        ("stage0-arm", b"stage0 for arm"),
        ("stage2-arm64", b"stage2 for arm64"),
        ("agent-x86_64", b"agent binary"),
    ];

    struct Harness {
        router: Router,
        errors: mpsc::UnboundedReceiver<SeederError>,
        signature_ca: String,
        _dir: tempfile::TempDir,
    }

    fn harness(registry: impl FnOnce(&std::path::Path) -> RegistrySettings) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let config = seeder_config(dir.path());
        let (errors_tx, errors) = mpsc::unbounded_channel();

        let installer = Installer::from_settings(&config.installer_settings).unwrap();
        let signature_ca = installer.signature_ca().to_string();
        let state = AppState {
            chain: Arc::new(ProviderChain::new(vec![Arc::new(EmbeddedProvider::new(ARTIFACTS))])),
            generator: Arc::new(
                EmbeddedConfigGenerator::from_files(
                    &config.embedded_config_generator.key_path,
                    &config.embedded_config_generator.cert_path,
                )
                .unwrap(),
            ),
            installer: Arc::new(installer),
            registrar: Arc::new(Registrar::from_settings(&registry(dir.path())).unwrap()),
            errors: errors_tx,
        };

        Harness {
            router: router(state),
            errors,
            signature_ca,
            _dir: dir,
        }
    }

    async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Bytes) {
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        (status, to_bytes(response.into_body(), usize::MAX).await.unwrap())
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn register_request(body: String) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/register")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body))
            .unwrap()
    }

    fn csr_pem(device_id: &str) -> String {
        let key = rcgen::KeyPair::generate().unwrap();
        let mut params = rcgen::CertificateParams::new(Vec::<String>::new()).unwrap();
        params.distinguished_name.push(rcgen::DnType::CommonName, device_id);
        params.serialize_request(&key).unwrap().pem().unwrap()
    }

    #[tokio::test]
    async fn test_stage_carries_signed_config_trailer() {
        let h = harness(|_| RegistrySettings::default());

        let (status, body) = send(&h.router, get("/stage0/x86_64")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.starts_with(b"stage0 for x86_64"));

        let config = EmbeddedConfig::extract(&body).unwrap();
        config.verify(h.signature_ca.as_bytes()).unwrap();

        let payload: StageConfig = config.payload_as().unwrap();
        assert_eq!(payload.stage, "stage0");
        assert_eq!(payload.arch, "x86_64");
        assert_eq!(payload.next_url, "https://seeder.test:8443/stage1/x86_64");
        assert_eq!(payload.signature_ca, h.signature_ca);
    }

    #[tokio::test]
    async fn test_last_stage_points_at_agent() {
        let h = harness(|_| RegistrySettings::default());

        let (status, body) = send(&h.router, get("/stage2/arm64")).await;
        assert_eq!(status, StatusCode::OK);
        let payload: StageConfig = EmbeddedConfig::extract(&body).unwrap().payload_as().unwrap();
        assert_eq!(payload.next_url, "https://seeder.test:8443/agent/arm64");
    }

    #[tokio::test]
    async fn test_missing_and_unknown_artifacts_are_not_found() {
        let h = harness(|_| RegistrySettings::default());

        for uri in ["/stage1/x86_64", "/stage0/mips", "/agent/arm", "/agent/sparc", "/config/stage9/arm"] {
            let (status, _) = send(&h.router, get(uri)).await;
            assert_eq!(status, StatusCode::NOT_FOUND, "{uri}");
        }
    }

    #[tokio::test]
    async fn test_agent_is_served_unmodified() {
        let h = harness(|_| RegistrySettings::default());

        let (status, body) = send(&h.router, get("/agent/x86_64")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(&body[..], b"agent binary");
    }

    #[tokio::test]
    async fn test_onie_maps_header_to_stage0() {
        let h = harness(|_| RegistrySettings::default());

        let request = Request::builder()
            .uri("/onie")
            .header("ONIE-ARCH", "armhf")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&h.router, request).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.starts_with(b"stage0 for arm"));

        let (status, _) = send(&h.router, get("/onie")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_config_endpoint_returns_envelope() {
        let h = harness(|_| RegistrySettings::default());

        let (status, body) = send(&h.router, get("/config/stage1/arm")).await;
        assert_eq!(status, StatusCode::OK);

        let config = EmbeddedConfig::from_json(&body).unwrap();
        config.verify(h.signature_ca.as_bytes()).unwrap();
        let payload: StageConfig = config.payload_as().unwrap();
        assert_eq!(payload.next_url, "https://seeder.test:8443/stage2/arm");
    }

    #[tokio::test]
    async fn test_registration_pending_without_ca() {
        let h = harness(|_| RegistrySettings::default());

        let (status, _) = send(&h.router, get("/register/device-1")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let body = serde_json::json!({ "device_id": "device-1", "csr": csr_pem("device-1") }).to_string();
        let (status, body) = send(&h.router, register_request(body)).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(serde_json::from_slice::<serde_json::Value>(&body).unwrap()["status"], "pending");

        let (status, body) = send(&h.router, get("/register/device-1")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(serde_json::from_slice::<serde_json::Value>(&body).unwrap()["status"], "pending");
    }

    #[tokio::test]
    async fn test_registration_auto_approval() {
        let ca = TestCa::new("Registry CA");
        let mut h = harness(|dir| RegistrySettings {
            cert_path: Some(write_pem(dir, "registry-ca.pem", &ca.cert_pem)),
            key_path: Some(write_pem(dir, "registry-ca.key", &ca.key_pem)),
            ..Default::default()
        });

        let body = serde_json::json!({ "device_id": "device-2", "csr": csr_pem("device-2") }).to_string();
        let (status, body) = send(&h.router, register_request(body)).await;
        assert_eq!(status, StatusCode::OK);
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["status"], "approved");
        assert!(value["certificate"].as_str().unwrap().contains("BEGIN CERTIFICATE"));

        let body = serde_json::json!({ "device_id": "device-3", "csr": "not a csr" }).to_string();
        let (status, _) = send(&h.router, register_request(body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(matches!(h.errors.try_recv(), Ok(SeederError::Registration(_))));

        let (status, _) = send(&h.router, register_request("{".to_string())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_registration_is_bound_to_first_csr() {
        let ca = TestCa::new("Registry CA");
        let mut h = harness(|dir| RegistrySettings {
            cert_path: Some(write_pem(dir, "registry-ca.pem", &ca.cert_pem)),
            key_path: Some(write_pem(dir, "registry-ca.key", &ca.key_pem)),
            ..Default::default()
        });

        let csr = csr_pem("leaf-07");
        let body = serde_json::json!({ "device_id": "leaf-07", "csr": csr }).to_string();
        let (status, first) = send(&h.router, register_request(body.clone())).await;
        assert_eq!(status, StatusCode::OK);

        let (status, again) = send(&h.router, register_request(body)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(first, again);

        let hijack = serde_json::json!({ "device_id": "leaf-07", "csr": csr_pem("leaf-07") }).to_string();
        let (status, _) = send(&h.router, register_request(hijack)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(matches!(
            h.errors.try_recv(),
            Ok(SeederError::RegistrationConflict { .. })
        ));

        let (status, current) = send(&h.router, get("/register/leaf-07")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(current, first);
    }
}
