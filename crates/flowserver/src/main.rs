use actix_cors::Cors;
use actix_web::{get, web, App, HttpResponse, HttpServer, Responder, Result as ActixResult};
use actix_ws::Message;
use flowcore::{EngineMessage, HostMessage};
use flowruntime::{ComponentRegistry, EngineConfig, FlowRuntime, RuntimeHandle};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

/// Application state shared across handlers
struct AppState {
    registry: Arc<ComponentRegistry>,
    config: EngineConfig,
    sessions: Arc<RwLock<HashMap<Uuid, SessionInfo>>>,
}

#[derive(Debug, Clone, Serialize)]
struct SessionInfo {
    id: Uuid,
    peer: Option<String>,
}

#[derive(Debug, Serialize)]
struct ComponentTypeResponse {
    type_id: flowcore::ComponentTypeId,
    name: String,
    description: String,
    category: String,
}

/// Health check endpoint
#[get("/health")]
async fn health_check(data: web::Data<AppState>) -> impl Responder {
    let sessions = data.sessions.read().await.len();
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "flowengine",
        "assetVersion": flowcore::ASSET_VERSION,
        "sessions": sessions,
    }))
}

/// List available component types
#[get("/api/components")]
async fn list_component_types(data: web::Data<AppState>) -> ActixResult<impl Responder> {
    let components: Vec<_> = data
        .registry
        .list_component_types()
        .into_iter()
        .map(|(type_id, name)| {
            let metadata = data.registry.get_metadata(type_id).unwrap_or_default();
            ComponentTypeResponse {
                type_id,
                name,
                description: metadata.description,
                category: metadata.category,
            }
        })
        .collect();

    Ok(HttpResponse::Ok().json(components))
}

/// List connected engine sessions
#[get("/api/sessions")]
async fn list_sessions(data: web::Data<AppState>) -> ActixResult<impl Responder> {
    let sessions: Vec<_> = data.sessions.read().await.values().cloned().collect();
    Ok(HttpResponse::Ok().json(sessions))
}

/// One engine per WebSocket connection. Text or binary frames carry JSON
/// host messages; engine messages go back as JSON text frames.
#[get("/api/engine")]
async fn engine_socket(
    req: actix_web::HttpRequest,
    stream: web::Payload,
    data: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    let (res, mut session, mut msg_stream) = actix_ws::handle(&req, stream)?;

    let id = Uuid::new_v4();
    let peer = req.peer_addr().map(|addr| addr.to_string());
    info!("Engine session {} opened from {:?}", id, peer);

    let mut handle = FlowRuntime::spawn(Arc::clone(&data.registry), data.config.clone());
    let sessions = Arc::clone(&data.sessions);
    sessions.write().await.insert(id, SessionInfo { id, peer });

    actix_web::rt::spawn(async move {
        loop {
            tokio::select! {
                // Engine to host
                message = handle.recv() => {
                    let Some(message) = message else { break };
                    let stopped = message.stopped == Some(true);
                    if send_message(&mut session, &message).await.is_err() {
                        break;
                    }
                    if stopped {
                        info!("Engine session {} stopped", id);
                        break;
                    }
                }

                // Host to engine
                Some(Ok(msg)) = msg_stream.recv() => {
                    match msg {
                        Message::Text(text) => forward(&handle, id, text.as_bytes()),
                        Message::Binary(bytes) => forward(&handle, id, &bytes),
                        Message::Ping(bytes) => {
                            if session.pong(&bytes).await.is_err() {
                                break;
                            }
                        }
                        Message::Close(_) => break,
                        _ => {}
                    }
                }

                else => break,
            }
        }

        for message in handle.shutdown().await {
            if send_message(&mut session, &message).await.is_err() {
                break;
            }
        }
        sessions.write().await.remove(&id);
        info!("Engine session {} closed", id);
        let _ = session.close(None).await;
    });

    Ok(res)
}

fn forward(handle: &RuntimeHandle, session: Uuid, bytes: &[u8]) {
    match HostMessage::decode(bytes) {
        Ok(message) => {
            if let Err(e) = handle.send(message) {
                warn!("Session {}: {}", session, e);
            }
        }
        Err(e) => warn!("Session {}: dropping malformed host message: {}", session, e),
    }
}

async fn send_message(
    session: &mut actix_ws::Session,
    message: &EngineMessage,
) -> Result<(), actix_ws::Closed> {
    match serde_json::to_string(message) {
        Ok(json) => session.text(json).await,
        Err(e) => {
            warn!("Failed to encode engine message: {}", e);
            Ok(())
        }
    }
}

fn engine_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    if let Some(ms) = env_u64("TICK_INTERVAL_MS") {
        config.tick_interval = std::time::Duration::from_millis(ms.max(1));
    }
    if let Some(secs) = env_u64("REQUEST_TIMEOUT_SECS") {
        config.request_timeout = std::time::Duration::from_secs(secs);
    }
    config
}

fn env_u64(name: &str) -> Option<u64> {
    let raw = std::env::var(name).ok()?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Ignoring {}={:?}: not a number", name, raw);
            None
        }
    }
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!("🚀 Starting Flow Engine Server");

    let registry = flownodes::standard_registry()?;

    info!("✅ Registry initialized with {} standard components", registry.len());

    let app_state = web::Data::new(AppState {
        registry,
        config: engine_config(),
        sessions: Arc::new(RwLock::new(HashMap::new())),
    });

    let bind_address = std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string());

    info!("🌐 Server starting on http://{}", bind_address);

    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(app_state.clone())
            .wrap(cors)
            .wrap(actix_web::middleware::Logger::default())
            .service(health_check)
            .service(list_component_types)
            .service(list_sessions)
            .service(engine_socket)
    })
    .bind(&bind_address)?
    .run()
    .await?;

    Ok(())
}
