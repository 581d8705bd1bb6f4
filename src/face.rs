use anyhow::Context;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use uuid::Uuid;

use crate::config::{AgentSettings, Config};
use crate::error::MissionError;
use crate::extractor::DataExtractor;
use crate::hands::DriverFactory;
use crate::mission::{self, MissionEvent};
use crate::registry::{MissionRegistry, MissionState, MissionStatus};

#[derive(Clone)]
pub struct AppState {
    pub registry: MissionRegistry,
    pub factory: Arc<dyn DriverFactory>,
    pub extractor: Arc<dyn DataExtractor>,
    pub settings: Arc<AgentSettings>,
    pub public_ws_base: String,
    pub cors_origins: Vec<String>,
}

impl AppState {
    pub fn new(
        config: &Config,
        factory: Arc<dyn DriverFactory>,
        extractor: Arc<dyn DataExtractor>,
    ) -> Self {
        Self {
            registry: MissionRegistry::new(),
            factory,
            extractor,
            settings: Arc::new(config.agent.clone()),
            public_ws_base: config.public_ws_base.clone(),
            cors_origins: config.cors_origins.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct StartMissionRequest {
    pub goal: String,
    #[serde(default = "default_headless")]
    pub headless: bool,
    #[serde(default)]
    pub max_iterations: Option<u32>,
}

fn default_headless() -> bool {
    true
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StartMissionResponse {
    pub mission_id: Uuid,
    pub websocket_url: String,
}

/// Control messages accepted on the mission socket.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage {
    Stop,
}

impl IntoResponse for MissionError {
    fn into_response(self) -> Response {
        let status = match self {
            MissionError::NotFound(_) => StatusCode::NOT_FOUND,
            MissionError::AlreadyRunning(_) | MissionError::NotStartable { .. } => {
                StatusCode::CONFLICT
            }
            MissionError::EmptyGoal | MissionError::IterationsOutOfRange(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
        };
        (status, Json(json!({ "detail": self.to_string() }))).into_response()
    }
}

pub fn router(state: AppState) -> Router {
    let cors = cors_layer(&state.cors_origins);
    Router::new()
        .route("/", get(index_handler))
        .route("/health", get(health_handler))
        .route("/api/v1/mission/start", post(start_handler))
        .route("/api/v1/mission/{id}/status", get(status_handler))
        .route("/api/v1/mission/{id}/stop", post(stop_handler))
        .route("/api/v1/mission/{id}", delete(delete_handler))
        .route("/ws/{id}", get(ws_handler))
        .route("/favicon.ico", get(|| async { StatusCode::NO_CONTENT })) // Silence 404
        .layer(cors)
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.iter().any(|o| o == "*") {
        AllowOrigin::from(Any)
    } else {
        let list: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|origin| match HeaderValue::from_str(origin) {
                Ok(value) => Some(value),
                Err(_) => {
                    tracing::warn!(%origin, "ignoring invalid CORS origin");
                    None
                }
            })
            .collect();
        AllowOrigin::list(list)
    };
    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Bind the configured address and serve until the process stops.
pub async fn serve(config: &Config, state: AppState) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("could not bind {addr}"))?;

    tracing::info!(addr = %listener.local_addr()?, "MarketRadar listening");
    axum::serve(listener, router(state))
        .await
        .context("server error")?;
    Ok(())
}

async fn index_handler() -> Html<&'static str> {
    tracing::debug!("GET /");
    Html(INDEX_HTML)
}

async fn health_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "missions": state.registry.len() }))
}

async fn start_handler(
    State(state): State<AppState>,
    Json(payload): Json<StartMissionRequest>,
) -> Result<Json<StartMissionResponse>, MissionError> {
    let max_iterations = payload
        .max_iterations
        .unwrap_or(state.settings.max_iterations);
    let record = state.registry.create(
        &payload.goal,
        payload.headless,
        max_iterations,
        &state.settings,
    )?;

    tracing::info!(mission_id = %record.id, goal = %record.goal, "mission created");
    Ok(Json(StartMissionResponse {
        mission_id: record.id,
        websocket_url: format!("{}/ws/{}", state.public_ws_base, record.id),
    }))
}

async fn status_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<MissionStatus>, MissionError> {
    Ok(Json(state.registry.status(id)?))
}

async fn stop_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, MissionError> {
    let mission_state: MissionState = state.registry.stop(id)?;
    tracing::info!(mission_id = %id, "stop requested");
    Ok(Json(json!({ "message": "Stop requested", "state": mission_state })))
}

async fn delete_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, MissionError> {
    state.registry.delete(id)?;
    tracing::info!(mission_id = %id, "mission deleted");
    Ok(Json(json!({ "message": "Mission stopped" })))
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| stream_mission(socket, state, id))
}

/// Launch the mission and forward its events until `finished`.
/// A `{"type":"stop"}` message cancels; so does the client going away.
async fn stream_mission(mut socket: WebSocket, state: AppState, id: Uuid) {
    let launched = state.registry.get(id).and_then(|record| {
        let driver = state.factory.create(record.config.headless);
        mission::launch(
            &state.registry,
            id,
            driver,
            state.extractor.clone(),
            state.settings.clone(),
        )
    });

    let mut stream = match launched {
        Ok(stream) => stream,
        Err(e) => {
            tracing::warn!(mission_id = %id, error = %e, "mission not launched");
            let _ = send_event(&mut socket, &MissionEvent::Error { message: e.to_string() }).await;
            let _ = socket.send(Message::Close(None)).await;
            return;
        }
    };

    loop {
        tokio::select! {
            event = stream.next() => {
                let Some(event) = event else { break };
                let last = matches!(event, MissionEvent::Finished);
                if send_event(&mut socket, &event).await.is_err() {
                    tracing::info!(mission_id = %id, "client went away, cancelling mission");
                    stream.stop();
                    break;
                }
                if last {
                    break;
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        if let Ok(ClientMessage::Stop) = serde_json::from_str(text.as_str()) {
                            tracing::info!(mission_id = %id, "stop received over websocket");
                            stream.stop();
                        }
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => {
                        tracing::info!(mission_id = %id, "client disconnected, cancelling mission");
                        stream.stop();
                        break;
                    }
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    let _ = socket.send(Message::Close(None)).await;
}

async fn send_event(socket: &mut WebSocket, event: &MissionEvent) -> anyhow::Result<()> {
    let text = serde_json::to_string(event)?;
    socket.send(Message::Text(text.into())).await?;
    Ok(())
}

const INDEX_HTML: &str = r##"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<meta name="viewport" content="width=device-width, initial-scale=1.0">
<title>MarketRadar</title>
<style>
  * { margin: 0; padding: 0; box-sizing: border-box; }
  body {
    background: #0b0d12;
    color: #e0e0e0;
    font-family: system-ui, -apple-system, sans-serif;
    height: 100vh;
    display: flex;
    flex-direction: column;
  }
  header {
    padding: 20px 32px;
    border-bottom: 1px solid #1c2030;
    display: flex;
    align-items: center;
    gap: 12px;
  }
  header h1 { font-size: 20px; font-weight: 600; color: #fff; }
  header .dot { width: 8px; height: 8px; border-radius: 50%; background: #22c55e; }
  header .dot.busy { background: #f59e0b; }
  .main {
    flex: 1;
    display: flex;
    flex-direction: column;
    max-width: 880px;
    width: 100%;
    margin: 0 auto;
    padding: 24px 32px;
    gap: 16px;
    overflow: hidden;
  }
  #log { flex: 1; overflow-y: auto; display: flex; flex-direction: column; gap: 8px; }
  .entry { padding: 10px 14px; border-radius: 8px; font-size: 14px; line-height: 1.5; white-space: pre-wrap; }
  .entry.goal { background: #1a1a2e; border-left: 3px solid #6366f1; }
  .entry.action { background: #111118; border-left: 3px solid #3b82f6; font-family: monospace; font-size: 13px; }
  .entry.action .num { color: #6366f1; font-weight: 700; margin-right: 8px; }
  .entry.action.failed { border-left-color: #f97316; }
  .entry.error { background: #1a0a0a; border-left: 3px solid #ef4444; color: #fca5a5; }
  .entry.done { background: #0a1a0a; border-left: 3px solid #22c55e; color: #86efac; }
  .entry.status { background: #111118; border-left: 3px solid #f59e0b; color: #fcd34d; }
  .input-area { display: flex; gap: 8px; }
  #goal {
    flex: 1;
    background: #111118;
    border: 1px solid #222;
    border-radius: 8px;
    padding: 12px 16px;
    color: #fff;
    font-size: 16px;
    outline: none;
  }
  #goal:focus { border-color: #6366f1; }
  button {
    background: #6366f1;
    color: #fff;
    border: none;
    border-radius: 8px;
    padding: 12px 20px;
    font-size: 15px;
    font-weight: 600;
    cursor: pointer;
  }
  button:disabled { background: #333; cursor: not-allowed; }
  #stop { background: #b91c1c; }
</style>
</head>
<body>
  <header>
    <div class="dot" id="status-dot"></div>
    <h1>MarketRadar</h1>
  </header>
  <div class="main">
    <div id="log"></div>
    <div class="input-area">
      <input type="text" id="goal" placeholder="Find the average price of Creatine in Brazil" autofocus />
      <button id="start" onclick="start()">Start</button>
      <button id="stop" onclick="stop()" disabled>Stop</button>
    </div>
  </div>
<script>
  const log = document.getElementById('log');
  const goal = document.getElementById('goal');
  const startBtn = document.getElementById('start');
  const stopBtn = document.getElementById('stop');
  const dot = document.getElementById('status-dot');
  let ws = null;

  const esc = s => String(s ?? '').replace(/&/g, '&amp;').replace(/</g, '&lt;');

  function addEntry(cls, html) {
    const div = document.createElement('div');
    div.className = 'entry ' + cls;
    div.innerHTML = html;
    log.appendChild(div);
    log.scrollTop = log.scrollHeight;
  }

  function setBusy(b) {
    goal.disabled = b;
    startBtn.disabled = b;
    stopBtn.disabled = !b;
    dot.className = b ? 'dot busy' : 'dot';
    if (!b) goal.focus();
  }

  async function start() {
    const text = goal.value.trim();
    if (!text || ws) return;
    addEntry('goal', '<strong>Goal:</strong> ' + esc(text));
    setBusy(true);
    const res = await fetch('/api/v1/mission/start', {
      method: 'POST',
      headers: {'Content-Type': 'application/json'},
      body: JSON.stringify({goal: text}),
    });
    const body = await res.json();
    if (!res.ok) {
      addEntry('error', '<strong>Rejected:</strong> ' + esc(body.detail || res.status));
      setBusy(false);
      return;
    }
    const proto = location.protocol === 'https:' ? 'wss://' : 'ws://';
    ws = new WebSocket(proto + location.host + '/ws/' + body.mission_id);
    ws.onmessage = e => render(JSON.parse(e.data));
    ws.onclose = () => { ws = null; setBusy(false); };
  }

  function stop() {
    if (ws) ws.send(JSON.stringify({type: 'stop'}));
  }

  function render(ev) {
    switch (ev.type) {
      case 'status':
        addEntry('status', esc(ev.message) + (ev.url ? ' (' + esc(ev.url) + ')' : ''));
        break;
      case 'action':
        addEntry('action' + (ev.result.success ? '' : ' failed'),
          '<span class="num">#' + ev.iteration + '</span>' + esc(ev.action.name) +
          ' | ' + esc(ev.thought_process) + '\n' + esc(ev.url) +
          ' | sources: ' + ev.sources_visited + ', data points: ' + ev.extracted_data_count +
          (ev.result.error ? '\n' + esc(ev.result.error) : ''));
        break;
      case 'complete':
        addEntry('done', '<strong>Complete</strong> after ' + ev.total_iterations + ' iterations\n' + esc(ev.summary));
        break;
      case 'incomplete':
        addEntry('error', '<strong>' + esc(ev.message) + '</strong>\n' + esc(ev.summary));
        break;
      case 'error':
        addEntry('error', '<strong>Error:</strong> ' + esc(ev.message));
        break;
      case 'finished':
        setBusy(false);
        break;
    }
  }

  goal.addEventListener('keydown', e => {
    if (e.key === 'Enter') start();
  });

  addEntry('done', 'Ready. Describe what to research.');
</script>
</body>
</html>
"##;
