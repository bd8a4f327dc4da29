use axum::{
    async_trait,
    extract::{FromRequest, Request, State},
    http::{header::CONTENT_TYPE, StatusCode},
    response::Json,
    routing::{get, post},
    Form, Router,
};
use remote_proto::channel::ChannelSet;
use remote_proto::status::StatusRegister;
use serde::Deserialize;
use serde_json::Value;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

#[derive(Clone)]
struct HttpState {
    channels: ChannelSet,
}

#[derive(Debug, Deserialize)]
struct CommandBody {
    command: String,
}

/// `command` field from either a JSON body or an urlencoded form.
struct CommandRequest(String);

#[async_trait]
impl<S> FromRequest<S> for CommandRequest
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, String);

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_json = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("application/json"));

        let body = if is_json {
            Json::<CommandBody>::from_request(req, state)
                .await
                .map(|Json(body)| body)
                .map_err(|e| (StatusCode::BAD_REQUEST, e.body_text()))?
        } else {
            Form::<CommandBody>::from_request(req, state)
                .await
                .map(|Form(body)| body)
                .map_err(|e| (StatusCode::BAD_REQUEST, e.body_text()))?
        };
        Ok(CommandRequest(body.command))
    }
}

pub fn router(channels: ChannelSet) -> Router {
    Router::new()
        .route("/status", get(get_status))
        .route("/command", post(post_command))
        .layer(CorsLayer::permissive())
        .with_state(HttpState { channels })
}

pub fn start_server(
    bind_address: String,
    port: u16,
    channels: ChannelSet,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let app = router(channels);

        let addr = format!("{}:{}", bind_address, port);
        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind HTTP server to {}: {}", addr, e);
                return;
            }
        };

        info!("HTTP bridge listening on http://{}", addr);

        if let Err(e) = axum::serve(listener, app).await {
            error!("HTTP server error: {}", e);
        }
    })
}

async fn get_status(State(state): State<HttpState>) -> Result<Json<Value>, StatusCode> {
    let mut register = StatusRegister::new(&state.channels);
    let doc = register
        .pull()
        .and_then(|_| register.status().to_value())
        .map_err(|e| {
            warn!("http: status unavailable: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;
    Ok(Json(doc))
}

async fn post_command(
    State(state): State<HttpState>,
    CommandRequest(line): CommandRequest,
) -> (StatusCode, String) {
    let line = line.trim();
    if line.is_empty() {
        return (StatusCode::BAD_REQUEST, "empty command\n".to_string());
    }
    match state.channels.write_command(line) {
        Ok(()) => {
            info!("http: queued {:?}", line);
            (StatusCode::ACCEPTED, String::new())
        }
        Err(e) => {
            warn!("http: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request as HttpRequest;
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn setup() -> (TempDir, ChannelSet) {
        let dir = TempDir::new().unwrap();
        let channels = ChannelSet::new(dir.path());
        (dir, channels)
    }

    #[tokio::test]
    async fn test_status_defaults_without_file() {
        let (_dir, channels) = setup();
        let response = router(channels)
            .oneshot(HttpRequest::get("/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let doc: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(doc["running"], Value::Bool(false));
        assert_eq!(doc["error"]["code"], 0);
    }

    #[tokio::test]
    async fn test_status_reflects_channel() {
        let (_dir, channels) = setup();
        let mut reg = StatusRegister::new(&channels);
        reg.status_mut().running = true;
        reg.status_mut().name = "Numb".to_string();
        reg.push().unwrap();

        let response = router(channels)
            .oneshot(HttpRequest::get("/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let doc: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(doc["running"], Value::Bool(true));
        assert_eq!(doc["name"], "Numb");
    }

    #[tokio::test]
    async fn test_form_command_is_queued() {
        let (_dir, channels) = setup();
        let response = router(channels.clone())
            .oneshot(
                HttpRequest::post("/command")
                    .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
                    .body(Body::from("command=pause+1"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(channels.take_command().unwrap().as_deref(), Some("pause 1"));
    }

    #[tokio::test]
    async fn test_json_command_is_queued() {
        let (_dir, channels) = setup();
        let response = router(channels.clone())
            .oneshot(
                HttpRequest::post("/command")
                    .header(CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"command":"open \"a b.mp4\""}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(
            channels.take_command().unwrap().as_deref(),
            Some("open \"a b.mp4\"")
        );
    }

    #[tokio::test]
    async fn test_empty_command_rejected() {
        let (_dir, channels) = setup();
        let response = router(channels.clone())
            .oneshot(
                HttpRequest::post("/command")
                    .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
                    .body(Body::from("command=+"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(!channels.command_pending());
    }
}
