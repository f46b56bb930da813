#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::{to_bytes, Body},
    http::{Method, Request, StatusCode},
    Router,
};
use futures::StreamExt;
use ptymux_server::{create_router, AppState};
use ptymux_terminal::{PtyRegistry, RegistryConfig, SessionConfig};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tower::ServiceExt;

pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub const WAIT: Duration = Duration::from_secs(10);

pub struct TestApp {
    pub router: Router,
    pub registry: Arc<PtyRegistry>,
}

impl TestApp {
    pub fn new() -> Self {
        let registry = Arc::new(PtyRegistry::new(RegistryConfig {
            session: SessionConfig {
                scrollback_lines: 1000,
                reader_queue_capacity: 256,
                kill_grace: Duration::from_millis(300),
                default_shell: "sh".to_string(),
            },
            ..RegistryConfig::default()
        }));
        let router = create_router(AppState {
            registry: Arc::clone(&registry),
        });
        Self { router, registry }
    }

    pub async fn request(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| {
                Value::String(String::from_utf8_lossy(&bytes).into_owned())
            })
        };
        (status, json)
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.request(empty_request(Method::GET, uri)).await
    }

    pub async fn delete(&self, uri: &str) -> (StatusCode, Value) {
        self.request(empty_request(Method::DELETE, uri)).await
    }

    pub async fn post(&self, uri: &str, body: &str) -> (StatusCode, Value) {
        self.request(json_request(Method::POST, uri, body)).await
    }

    /// Serve the router on an ephemeral loopback port
    pub async fn serve(&self) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let router = self.router.clone();
        tokio::spawn(async move { axum::serve(listener, router).await });
        addr
    }

    /// Spawn an interactive `sh` in group `ws` and return its id
    pub async fn spawn_shell(&self) -> String {
        let (status, body) = self
            .post("/session/ws/pty", r#"{"env": {"PS1": "$ ", "ENV": ""}}"#)
            .await;
        assert_eq!(status, StatusCode::CREATED, "{}", body);
        body["id"].as_str().unwrap().to_string()
    }

    /// Poll the snapshot route until its text contains `needle`
    pub async fn wait_for_text(&self, pty: &str, needle: &str) -> String {
        let deadline = tokio::time::Instant::now() + WAIT;
        loop {
            let (_, body) = self.get(&format!("/session/ws/pty/{}/snapshot", pty)).await;
            let text = body["text"].as_str().unwrap_or_default().to_string();
            if text.contains(needle) {
                return text;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "timed out waiting for {:?}, screen was:\n{}",
                needle,
                text
            );
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

pub fn empty_request(method: Method, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

pub fn json_request(method: Method, uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

/// Next JSON event from a websocket, or `None` once the server closed it
pub async fn next_ws_event(socket: &mut WsClient) -> Option<Value> {
    loop {
        let frame = tokio::time::timeout(WAIT, socket.next())
            .await
            .expect("timed out waiting for websocket frame");
        match frame {
            Some(Ok(Message::Text(text))) => return Some(serde_json::from_str(&text).unwrap()),
            Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return None,
            Some(Ok(_)) => continue,
        }
    }
}
