use crate::core::{FeedEvent, SnapshotStore};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use feed_proto::protocol::FeedSnapshot;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

#[derive(Clone)]
struct HttpState {
    snapshot: SnapshotStore,
    event_tx: mpsc::Sender<FeedEvent>,
}

pub fn router(snapshot: SnapshotStore, event_tx: mpsc::Sender<FeedEvent>) -> Router {
    let app_state = HttpState { snapshot, event_tx };

    Router::new()
        .route("/api/feed", get(get_feed))
        .route("/api/scroll/:offset", post(scroll))
        .route("/api/viewable/:index/:percent", post(viewable))
        .route("/api/foreground/:state", post(foreground))
        .route("/api/toggle-pause", post(toggle_pause))
        .route("/api/memory-pressure", post(memory_pressure))
        .layer(CorsLayer::permissive())
        .with_state(app_state)
}

pub fn start_server(
    bind_address: String,
    port: u16,
    snapshot: SnapshotStore,
    event_tx: mpsc::Sender<FeedEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let app = router(snapshot, event_tx);

        let addr = format!("{}:{}", bind_address, port);
        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind HTTP server to {}: {}", addr, e);
                return;
            }
        };

        info!("HTTP API server listening on http://{}", addr);

        if let Err(e) = axum::serve(listener, app).await {
            error!("HTTP server error: {}", e);
        }
    })
}

async fn enqueue(state: &HttpState, evt: FeedEvent) -> StatusCode {
    if state.event_tx.send(evt).await.is_err() {
        error!("HTTP API: feed core is gone");
        return StatusCode::INTERNAL_SERVER_ERROR;
    }
    StatusCode::ACCEPTED
}

async fn get_feed(State(state): State<HttpState>) -> Result<Json<FeedSnapshot>, StatusCode> {
    let snapshot = state
        .snapshot
        .read()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .clone();
    Ok(Json(snapshot))
}

async fn scroll(State(state): State<HttpState>, Path(offset): Path<f64>) -> StatusCode {
    info!("HTTP API: scroll ended at {}", offset);
    enqueue(&state, FeedEvent::ScrollEnded { offset }).await
}

async fn viewable(
    State(state): State<HttpState>,
    Path((index, percent)): Path<(i64, u8)>,
) -> StatusCode {
    info!("HTTP API: index {} {}% visible", index, percent);
    let evt = FeedEvent::Viewable {
        index,
        percent_visible: percent.min(100),
    };
    enqueue(&state, evt).await
}

async fn foreground(State(state): State<HttpState>, Path(mode): Path<String>) -> StatusCode {
    let foreground = match mode.as_str() {
        "on" => true,
        "off" => false,
        _ => return StatusCode::BAD_REQUEST,
    };
    info!("HTTP API: foreground {}", mode);
    enqueue(&state, FeedEvent::Foreground(foreground)).await
}

async fn toggle_pause(State(state): State<HttpState>) -> StatusCode {
    info!("HTTP API: toggle pause");
    enqueue(&state, FeedEvent::TogglePause).await
}

async fn memory_pressure(State(state): State<HttpState>) -> StatusCode {
    info!("HTTP API: memory pressure");
    enqueue(&state, FeedEvent::MemoryPressure).await
}
