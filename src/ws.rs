//! WebSocket endpoints for the broadcast hub's two topics.
//!
//! - `/ws/notifier`: one message per alert event.
//! - `/ws/dashboard`: periodic snapshots plus group/device updates; clients
//!   may send `{type, data}` management envelopes on the same socket.
//!
//! Every connection gets a 30 s ping heartbeat; a failed read or ping
//! unregisters the subscriber.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::broadcast::Hub;
use crate::shutdown::Shutdown;

const HEARTBEAT: Duration = Duration::from_secs(30);

#[derive(Clone)]
struct WsState {
    hub: Arc<Hub>,
    shutdown: Shutdown,
}

/// Bind the WebSocket server and serve until shutdown. Returns the bound
/// address (useful when the port is 0 in tests).
pub async fn serve(hub: Arc<Hub>, port: u16, shutdown: Shutdown) -> anyhow::Result<SocketAddr> {
    let state = WsState {
        hub,
        shutdown: shutdown.clone(),
    };

    let app = Router::new()
        .route("/ws/notifier", get(notifier_handler))
        .route("/ws/dashboard", get(dashboard_handler))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    let addr = listener.local_addr()?;
    info!("websocket server listening on {addr}");

    tokio::spawn(async move {
        let server = axum::serve(listener, app).with_graceful_shutdown(async move {
            shutdown.cancelled().await;
        });
        if let Err(e) = server.await {
            tracing::error!("websocket server error: {e}");
        }
    });

    Ok(addr)
}

async fn notifier_handler(ws: WebSocketUpgrade, State(state): State<WsState>) -> Response {
    ws.on_upgrade(move |socket| async move {
        let (id, rx) = state.hub.subscribe_notifier();
        run_connection(socket, rx, state.clone(), false).await;
        state.hub.unsubscribe_notifier(id);
        debug!(subscriber = id, "notifier client disconnected");
    })
}

async fn dashboard_handler(ws: WebSocketUpgrade, State(state): State<WsState>) -> Response {
    ws.on_upgrade(move |socket| async move {
        let (id, rx) = state.hub.subscribe_dashboard();
        run_connection(socket, rx, state.clone(), true).await;
        state.hub.unsubscribe_dashboard(id);
        debug!(subscriber = id, "dashboard client disconnected");
    })
}

/// Pump hub payloads out, heartbeats on a timer, and (for dashboard
/// sockets) management envelopes back in.
async fn run_connection(
    socket: WebSocket,
    mut rx: mpsc::Receiver<Vec<u8>>,
    state: WsState,
    is_dashboard: bool,
) {
    let (mut sender, mut receiver) = socket.split();

    if is_dashboard {
        // Reconnecting clients get the current state before the periodic
        // stream resumes.
        if let Some(snapshot) = state.hub.last_dashboard_payload().await {
            if send_payload(&mut sender, snapshot).await.is_err() {
                return;
            }
        }
        for payload in state.hub.initial_management_payloads().await {
            if send_payload(&mut sender, payload).await.is_err() {
                return;
            }
        }
    }

    let mut heartbeat = tokio::time::interval(HEARTBEAT);
    heartbeat.tick().await; // immediate first tick

    loop {
        tokio::select! {
            maybe = rx.recv() => match maybe {
                Some(payload) => {
                    if send_payload(&mut sender, payload).await.is_err() {
                        break;
                    }
                }
                // The hub dropped us (slow subscriber) or is shutting down.
                None => {
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
            },

            _ = heartbeat.tick() => {
                if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }

            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Text(text))) if is_dashboard => {
                    state.hub.handle_management_message(text.as_bytes()).await;
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(_)) => break,
            },

            _ = state.shutdown.cancelled() => {
                let _ = sender.send(Message::Close(None)).await;
                break;
            }
        }
    }
}

async fn send_payload(
    sender: &mut (impl SinkExt<Message> + Unpin),
    payload: Vec<u8>,
) -> Result<(), ()> {
    let text = String::from_utf8_lossy(&payload).into_owned();
    sender.send(Message::Text(text.into())).await.map_err(|_| ())
}
