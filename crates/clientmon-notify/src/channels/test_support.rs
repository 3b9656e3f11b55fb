//! Local HTTP endpoint for exercising the JSON channels.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::Value;

#[derive(Default)]
struct Recorded {
    /// Statuses to answer with in order; the last one repeats.
    script: VecDeque<u16>,
    bodies: Vec<Value>,
}

pub(crate) struct Endpoint {
    addr: SocketAddr,
    recorded: Arc<Mutex<Recorded>>,
}

impl Endpoint {
    pub(crate) async fn start(script: Vec<u16>) -> std::io::Result<Self> {
        let recorded = Arc::new(Mutex::new(Recorded {
            script: script.into(),
            bodies: Vec::new(),
        }));
        let app = Router::new()
            .route("/hook", post(receive))
            .with_state(recorded.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        Ok(Self { addr, recorded })
    }

    pub(crate) fn url(&self) -> String {
        format!("http://{}/hook", self.addr)
    }

    pub(crate) fn hits(&self) -> usize {
        self.recorded.lock().unwrap().bodies.len()
    }

    pub(crate) fn bodies(&self) -> Vec<Value> {
        self.recorded.lock().unwrap().bodies.clone()
    }
}

async fn receive(
    State(recorded): State<Arc<Mutex<Recorded>>>,
    Json(body): Json<Value>,
) -> StatusCode {
    let mut recorded = recorded.lock().unwrap();
    recorded.bodies.push(body);
    let status = if recorded.script.len() > 1 {
        recorded.script.pop_front()
    } else {
        recorded.script.front().copied()
    };
    status
        .and_then(|code| StatusCode::from_u16(code).ok())
        .unwrap_or(StatusCode::OK)
}

/// A URL nothing listens on.
pub(crate) async fn dead_url() -> std::io::Result<String> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    drop(listener);
    Ok(format!("http://{addr}/hook"))
}

/// HTTP client that ignores proxy environment variables.
pub(crate) fn client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}
