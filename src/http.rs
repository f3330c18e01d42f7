use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tower_http::{services::ServeDir, trace::TraceLayer};
use tracing::{debug, warn};

use crate::hub::{ClientConnection, HubHandle, HubStatus};
use crate::playlist::SpiritRecord;

#[derive(Clone)]
pub struct AppState {
    pub version: String,
    pub hub: HubHandle,
    pub public_dir: PathBuf,
}

#[derive(Serialize)]
struct StatusResponse {
    version: String,
    #[serde(flatten)]
    rotation: HubStatus,
}

pub fn build_router(state: AppState) -> Router {
    let assets = ServeDir::new(&state.public_dir);
    Router::new()
        // The browser opens `ws://host/`, so the root doubles as the socket.
        .route("/", get(root))
        .route("/ws", get(ws_upgrade))
        .route("/health", get(|| async { "OK" }))
        .route("/api/spirits", get(api_spirits))
        .route("/api/status", get(api_status))
        .fallback_service(assets)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn root(State(state): State<AppState>, ws: Option<WebSocketUpgrade>) -> Response {
    if let Some(ws) = ws {
        return upgrade(ws, state.hub);
    }
    match tokio::fs::read_to_string(state.public_dir.join("index.html")).await {
        Ok(page) => Html(page).into_response(),
        Err(_) => "Spirit shrine engine is running. Connect a WebSocket to / for spirits.".into_response(),
    }
}

async fn ws_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    upgrade(ws, state.hub)
}

fn upgrade(ws: WebSocketUpgrade, hub: HubHandle) -> Response {
    ws.on_upgrade(move |socket| client_session(socket, hub))
}

/// Pumps hub frames out to one browser until either side goes away.
async fn client_session(mut socket: WebSocket, hub: HubHandle) {
    let ClientConnection { id, mut frames } = match hub.connect() {
        Ok(conn) => conn,
        Err(e) => {
            warn!("rejecting websocket client: {e}");
            return;
        }
    };

    loop {
        tokio::select! {
            frame = frames.recv() => match frame {
                Some(text) => {
                    if socket.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                // Hub dropped us (teardown).
                None => break,
            },
            inbound = socket.recv() => match inbound {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    debug!(client = %id, "websocket error: {e}");
                    break;
                }
                // Server-push only; anything the client says is ignored.
                Some(Ok(_)) => {}
            },
        }
    }

    hub.disconnect(id);
}

async fn api_spirits(State(state): State<AppState>) -> Result<Json<Vec<Arc<SpiritRecord>>>, StatusCode> {
    state
        .hub
        .playlist()
        .await
        .map(Json)
        .map_err(|_| StatusCode::SERVICE_UNAVAILABLE)
}

async fn api_status(State(state): State<AppState>) -> Result<Json<StatusResponse>, StatusCode> {
    let rotation = state
        .hub
        .status()
        .await
        .map_err(|_| StatusCode::SERVICE_UNAVAILABLE)?;
    Ok(Json(StatusResponse {
        version: state.version.clone(),
        rotation,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::{Hub, HubSettings};
    use crate::playlist::{sample_json, Playlist};
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::Value;
    use std::time::Duration;
    use tower::ServiceExt;

    fn app(n: usize, public_dir: PathBuf) -> (Router, HubHandle) {
        let playlist = Playlist::from_json_str(&sample_json(n)).unwrap();
        let (hub, handle) = Hub::init(
            playlist,
            HubSettings {
                interval: Duration::from_secs(20),
                debounce: Duration::from_millis(100),
            },
        );
        tokio::spawn(hub.run());
        let state = AppState {
            version: "test".into(),
            hub: handle.clone(),
            public_dir,
        };
        (build_router(state), handle)
    }

    async fn fetch(router: Router, uri: &str) -> (StatusCode, String) {
        let res = router
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = res.status();
        let bytes = to_bytes(res.into_body(), 1 << 20).await.unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn health_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let (router, _hub) = app(2, dir.path().to_path_buf());
        let (status, body) = fetch(router, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "OK");
    }

    #[tokio::test]
    async fn spirits_lists_whole_playlist() {
        let dir = tempfile::tempdir().unwrap();
        let (router, _hub) = app(4, dir.path().to_path_buf());
        let (status, body) = fetch(router, "/api/spirits").await;
        assert_eq!(status, StatusCode::OK);
        let v: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(v.as_array().map(|a| a.len()), Some(4));
    }

    #[tokio::test]
    async fn status_reports_idle_rotation() {
        let dir = tempfile::tempdir().unwrap();
        let (router, _hub) = app(3, dir.path().to_path_buf());
        let (status, body) = fetch(router, "/api/status").await;
        assert_eq!(status, StatusCode::OK);
        let v: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(v["version"], "test");
        assert_eq!(v["running"], false);
        assert_eq!(v["clients"], 0);
        assert_eq!(v["playlist_len"], 3);
        assert_eq!(v["interval_ms"], 20_000);
    }

    #[tokio::test]
    async fn status_unavailable_after_teardown() {
        let dir = tempfile::tempdir().unwrap();
        let (router, hub) = app(3, dir.path().to_path_buf());
        hub.teardown().await;
        let (status, _) = fetch(router, "/api/status").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn root_serves_index_without_upgrade() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), "<h1>shrine</h1>").unwrap();
        let (router, _hub) = app(1, dir.path().to_path_buf());
        let (status, body) = fetch(router, "/").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "<h1>shrine</h1>");
    }

    #[tokio::test]
    async fn static_assets_come_from_public_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("assets/models")).unwrap();
        std::fs::write(dir.path().join("assets/models/fox.gltf"), "{}").unwrap();
        let (router, _hub) = app(1, dir.path().to_path_buf());

        let (status, body) = fetch(router.clone(), "/assets/models/fox.gltf").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "{}");

        let (status, _) = fetch(router, "/assets/models/missing.glb").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn websocket_on_root_streams_spirits_and_cleans_up() {
        use futures_util::StreamExt;
        use tokio_tungstenite::tungstenite::Message as WsMessage;

        let dir = tempfile::tempdir().unwrap();
        let (router, hub) = app(3, dir.path().to_path_buf());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/")).await.unwrap();
        let first = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("late-join frame in time")
            .expect("stream open")
            .unwrap();
        let text = match first {
            WsMessage::Text(text) => text,
            other => panic!("expected a text frame, got {other:?}"),
        };
        let v: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(v["type"], "spirit");
        assert!(v["data"]["Name"].is_string());
        assert!(v["timeSinceSpawnMs"].is_u64());
        assert_eq!(v["spiritIntervalMs"], 20_000);

        let st = hub.status().await.unwrap();
        assert_eq!(st.clients, 1);
        assert!(st.running);

        ws.close(None).await.unwrap();

        // Close reaches the session, which disconnects; the debounce then
        // takes the rotation Idle.
        let mut idle = false;
        for _ in 0..100 {
            let st = hub.status().await.unwrap();
            if st.clients == 0 && !st.running {
                idle = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(idle, "hub never saw the socket close");
    }
}
