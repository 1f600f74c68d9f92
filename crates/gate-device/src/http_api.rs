//! Signed HTTP control API: `/api/gate/{action}`.
//!
//! Every request must carry a valid timestamp and signature, and the API key
//! when one is configured. The handler drives the same actuator as the MQTT
//! command path.

use std::sync::Arc;

use axum::Router;
use axum::extract::{Path, Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use chrono::Utc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use gate_protocol::GateAction;
use gate_protocol::signing::{
    API_KEY_HEADER, SIGNATURE_HEADER, SignatureError, TIMESTAMP_HEADER, constant_time_eq, verify,
};

use crate::actuator::Actuator;
use crate::device::DeviceError;

/// Credentials the API checks requests against.
#[derive(Debug, Clone)]
pub struct HttpApiConfig {
    /// HMAC key shared with clients. Must not be empty.
    pub secret: String,
    /// Additionally required in `X-API-Key` when set.
    pub api_key: Option<String>,
}

#[derive(Clone)]
struct ApiState {
    actuator: Arc<dyn Actuator>,
    secret: Arc<str>,
    api_key: Option<Arc<str>>,
}

/// The HTTP control surface of a gate device.
pub struct HttpApi {
    state: ApiState,
}

impl HttpApi {
    pub fn new(config: HttpApiConfig, actuator: Arc<dyn Actuator>) -> Result<Self, DeviceError> {
        if config.secret.is_empty() {
            return Err(DeviceError::MissingApiSecret);
        }
        Ok(Self {
            state: ApiState {
                actuator,
                secret: config.secret.into(),
                api_key: config.api_key.filter(|k| !k.is_empty()).map(Into::into),
            },
        })
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/api/gate/{action}", any(press_handler))
            .route_layer(middleware::from_fn_with_state(
                self.state.clone(),
                require_signature,
            ))
            .with_state(self.state.clone())
    }

    /// Serves on `listener` until `cancel` fires.
    pub async fn serve(
        &self,
        listener: TcpListener,
        cancel: CancellationToken,
    ) -> std::io::Result<()> {
        if let Ok(addr) = listener.local_addr() {
            info!(%addr, "HTTP control API listening");
        }
        axum::serve(listener, self.router())
            .with_graceful_shutdown(cancel.cancelled_owned())
            .await
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &'static str) -> Result<&'a str, SignatureError> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .ok_or(SignatureError::MissingHeader(name))
}

fn authorize(state: &ApiState, headers: &HeaderMap, path: &str) -> Result<(), SignatureError> {
    if let Some(expected) = &state.api_key {
        let presented = header(headers, API_KEY_HEADER)?;
        if !constant_time_eq(presented.as_bytes(), expected.as_bytes()) {
            return Err(SignatureError::Mismatch);
        }
    }
    let timestamp = header(headers, TIMESTAMP_HEADER)?;
    let signature = header(headers, SIGNATURE_HEADER)?;
    verify(timestamp, signature, path, &state.secret, Utc::now())
}

async fn require_signature(State(state): State<ApiState>, req: Request, next: Next) -> Response {
    if let Err(e) = authorize(&state, req.headers(), req.uri().path()) {
        warn!(path = %req.uri().path(), "rejected request: {e}");
        return (StatusCode::UNAUTHORIZED, "Unauthorized").into_response();
    }
    next.run(req).await
}

async fn press_handler(State(state): State<ApiState>, Path(action): Path<String>) -> Response {
    let Ok(action) = action.parse::<GateAction>() else {
        return StatusCode::NOT_FOUND.into_response();
    };
    info!(%action, "executing HTTP command");
    match state.actuator.press(action).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => {
            warn!(%action, "actuator error: {e}");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::Request;
    use gate_protocol::signing::signed_headers;
    use tower::ServiceExt;

    use super::*;
    use crate::actuator::{ActuatorError, MockActuator};

    fn api(api_key: Option<&str>) -> (HttpApi, Arc<MockActuator>) {
        let actuator = Arc::new(MockActuator::new(Duration::ZERO));
        let api = HttpApi::new(
            HttpApiConfig {
                secret: "s3cret".into(),
                api_key: api_key.map(Into::into),
            },
            actuator.clone(),
        )
        .unwrap();
        (api, actuator)
    }

    fn signed(path: &str, secret: &str, now: chrono::DateTime<Utc>) -> Request<Body> {
        let h = signed_headers(path, secret, now).unwrap();
        Request::builder()
            .uri(path)
            .header(TIMESTAMP_HEADER, h.timestamp)
            .header(SIGNATURE_HEADER, h.signature)
            .body(Body::empty())
            .unwrap()
    }

    #[test]
    fn empty_secret_is_rejected() {
        let result = HttpApi::new(
            HttpApiConfig {
                secret: String::new(),
                api_key: None,
            },
            Arc::new(MockActuator::default()),
        );
        assert!(matches!(result, Err(DeviceError::MissingApiSecret)));
    }

    #[tokio::test]
    async fn signed_request_presses() {
        let (api, actuator) = api(None);
        let resp = api
            .router()
            .oneshot(signed("/api/gate/pedestrian", "s3cret", Utc::now()))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(actuator.presses(), vec![GateAction::Pedestrian]);
    }

    #[tokio::test]
    async fn unsigned_and_stale_requests_are_unauthorized() {
        let (api, actuator) = api(None);

        let bare = Request::builder()
            .uri("/api/gate/full")
            .body(Body::empty())
            .unwrap();
        let resp = api.router().oneshot(bare).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let stale = Utc::now() - chrono::Duration::minutes(10);
        let resp = api
            .router()
            .oneshot(signed("/api/gate/full", "s3cret", stale))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let resp = api
            .router()
            .oneshot(signed("/api/gate/full", "wrong", Utc::now()))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert!(actuator.presses().is_empty());
    }

    #[tokio::test]
    async fn signature_is_bound_to_path() {
        let (api, actuator) = api(None);
        let h = signed_headers("/api/gate/left", "s3cret", Utc::now()).unwrap();
        let req = Request::builder()
            .uri("/api/gate/full")
            .header(TIMESTAMP_HEADER, h.timestamp)
            .header(SIGNATURE_HEADER, h.signature)
            .body(Body::empty())
            .unwrap();
        let resp = api.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert!(actuator.presses().is_empty());
    }

    #[tokio::test]
    async fn api_key_is_enforced_when_configured() {
        let (api, actuator) = api(Some("k3y"));

        let resp = api
            .router()
            .oneshot(signed("/api/gate/right", "s3cret", Utc::now()))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let mut req = signed("/api/gate/right", "s3cret", Utc::now());
        req.headers_mut()
            .insert(API_KEY_HEADER, "k3y".parse().unwrap());
        let resp = api.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(actuator.presses(), vec![GateAction::Right]);
    }

    #[tokio::test]
    async fn unknown_action_is_not_found() {
        let (api, actuator) = api(None);
        let resp = api
            .router()
            .oneshot(signed("/api/gate/open", "s3cret", Utc::now()))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert!(actuator.presses().is_empty());
    }

    #[tokio::test]
    async fn actuator_failure_is_server_error() {
        let (api, actuator) = api(None);
        actuator.fail_with(Some(ActuatorError::Gpio("pin 17 busy".into())));
        let resp = api
            .router()
            .oneshot(signed("/api/gate/full", "s3cret", Utc::now()))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = axum::body::to_bytes(resp.into_body(), 10_000).await.unwrap();
        assert_eq!(&body[..], b"GPIO error: pin 17 busy");
    }
}
