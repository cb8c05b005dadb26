//! In-process stand-in for the execution service and the snippet store

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use playground_protocol::{ErrorBody, SaveResponse, Source, TIMEOUT_REASON};
use playground_session::Endpoints;
use tokio::task::JoinHandle;

/// Programs the fake service knows how to "run"
pub const PRINT_ONE: &str = "print(1)";
pub const ECHO_INPUT: &str = "while True: print(input())";
pub const NEVER_ENDS: &str = "while True: pass";

/// Languages the fake store refuses in particular ways
pub const REJECTED_LANGUAGE: &str = "rejected";
pub const MALFORMED_LANGUAGE: &str = "malformed";

#[derive(Default)]
struct Store {
    snippets: HashMap<String, Source>,
    next: usize,
}

type Shared = Arc<Mutex<Store>>;

pub struct MockService {
    pub addr: SocketAddr,
    task: JoinHandle<()>,
}

impl MockService {
    pub async fn start() -> Self {
        let app = Router::new()
            .route("/execute", get(execute))
            .route("/save", post(save))
            .route("/share/{id}", get(load))
            .with_state(Shared::default());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let task = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self { addr, task }
    }

    pub fn endpoints(&self) -> Endpoints {
        Endpoints::new(&self.addr.to_string(), false).unwrap()
    }
}

impl Drop for MockService {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Endpoints pointing at a port nothing listens on
pub async fn unreachable_endpoints() -> Endpoints {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    Endpoints::new(&addr.to_string(), false).unwrap()
}

async fn execute(ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(run_program)
}

async fn run_program(mut socket: WebSocket) {
    let source: Source = match socket.recv().await {
        Some(Ok(Message::Text(text))) => serde_json::from_str(text.as_str()).unwrap(),
        _ => return,
    };

    match source.code.as_str() {
        PRINT_ONE => {
            let _ = socket.send(Message::Text("1".into())).await;
            close(&mut socket, "").await;
        }
        ECHO_INPUT => {
            while let Some(Ok(message)) = socket.recv().await {
                match message {
                    Message::Text(line) if line.as_str() == "exit" => break,
                    Message::Text(line) => {
                        let _ = socket.send(Message::Text(line)).await;
                    }
                    Message::Close(_) => return,
                    _ => {}
                }
            }
            close(&mut socket, "").await;
        }
        NEVER_ENDS => close(&mut socket, TIMEOUT_REASON).await,
        other => {
            let reply = format!("unsupported program: {other}");
            let _ = socket.send(Message::Text(reply.into())).await;
            close(&mut socket, "").await;
        }
    }
}

async fn close(socket: &mut WebSocket, reason: &'static str) {
    let frame = CloseFrame {
        code: 1000,
        reason: reason.into(),
    };
    let _ = socket.send(Message::Close(Some(frame))).await;
}

async fn save(State(store): State<Shared>, Json(source): Json<Source>) -> Response {
    match source.language.as_str() {
        REJECTED_LANGUAGE => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorBody {
                error: "Failed to save code".to_string(),
            }),
        )
            .into_response(),
        MALFORMED_LANGUAGE => (StatusCode::OK, "not json").into_response(),
        _ => {
            let mut store = store.lock().unwrap();
            let id = if store.next == 0 {
                "abc123".to_string()
            } else {
                format!("abc123-{}", store.next)
            };
            store.next += 1;
            store.snippets.insert(id.clone(), source);
            Json(SaveResponse { id }).into_response()
        }
    }
}

async fn load(State(store): State<Shared>, Path(id): Path<String>) -> Response {
    match store.lock().unwrap().snippets.get(&id) {
        Some(source) => Json(source.clone()).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(ErrorBody {
                error: "Code not found".to_string(),
            }),
        )
            .into_response(),
    }
}
