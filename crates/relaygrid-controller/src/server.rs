//! HTTP shell.
//!
//! Everything lives on `/`. `POST` carries encrypted peer traffic, the
//! custom `PUSH` verb carries plaintext command pushes from the local DB,
//! so routing matches on the raw method string rather than axum's typed
//! method routers. A fresh controller (with its own registry snapshot) is
//! built per request; concurrent requests share nothing mutable.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::extract::{Request, State};
use axum::http::{header, HeaderMap};
use axum::response::Response;
use axum::routing::any;
use axum::Router;

use relaygrid_protocol::{FORWARD_TIMEOUT_SECS, MAX_ENVELOPE_SIZE};

use crate::db::Db;
use crate::handler::{NetworkController, RequestMeta};

/// Shared per-process state handed to every request.
#[derive(Clone)]
pub struct AppState {
    pub db:             Arc<dyn Db>,
    pub http:           reqwest::Client,
    pub local_instance: String,
}

/// Outbound client for anonymizer round-trips: 300 s read timeout, 300 s
/// overall deadline.
pub fn outbound_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(FORWARD_TIMEOUT_SECS))
        .read_timeout(Duration::from_secs(FORWARD_TIMEOUT_SECS))
        .build()
        .unwrap_or_default()
}

pub fn router(state: AppState) -> Router {
    Router::new().route("/", any(root)).with_state(state)
}

pub async fn serve(
    state: AppState,
    addr: SocketAddr,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("[NC] listening on http://{addr}");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

async fn root(State(state): State<AppState>, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let meta = RequestMeta {
        cookie:        header_string(&parts.headers, header::COOKIE.as_str()),
        forwarded_for: header_string(&parts.headers, "x-forwarded-for"),
    };

    let bytes = match to_bytes(body, MAX_ENVELOPE_SIZE).await {
        Ok(b) => b,
        // Peers only distinguish 200 from 500 on this wire.
        Err(_) => return plain(500, "request body too large"),
    };

    let controller = match NetworkController::bootstrap(
        state.db.clone(),
        state.http.clone(),
        &state.local_instance,
    )
    .await
    {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("[NC] controller bootstrap failed: {e}");
            return plain(500, e.to_string());
        }
    };

    match controller.act(parts.method.as_str(), &bytes, &meta).await {
        Some(reply) => {
            let mut builder = Response::builder().status(reply.status);
            if let Some(cookie) = reply.cookie {
                builder = builder.header(header::SET_COOKIE, cookie);
            }
            builder
                .body(Body::from(reply.body))
                .unwrap_or_else(|_| plain(500, "response build failed"))
        }
        None => plain(405, "method not allowed"),
    }
}

fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
}

fn plain(status: u16, body: impl Into<String>) -> Response {
    Response::builder()
        .status(status)
        .body(Body::from(body.into()))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{anon, MockDb};
    use relaygrid_protocol::envelope;
    use serde_json::json;

    async fn spawn(state: AppState) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, router(state)).await;
        });
        addr
    }

    fn state_with(db: MockDb) -> AppState {
        AppState {
            db: Arc::new(db),
            http: reqwest::Client::new(),
            local_instance: "local".into(),
        }
    }

    #[tokio::test]
    async fn post_round_trip_sets_cookie() {
        let element = anon("a1", "alpha", "abc");
        let key = element.key.clone();
        let addr = spawn(state_with(MockDb {
            anonymizer_list: vec![element],
            ..Default::default()
        }))
        .await;

        let body = envelope::seal(
            &key,
            &json!({ "command": "STATUS", "params": { "status": "OK" } }),
        )
        .unwrap();

        let response = reqwest::Client::new()
            .post(format!("http://{addr}/"))
            .header(header::COOKIE.as_str(), "ID=abc")
            .body(body)
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), 200);
        assert_eq!(
            response
                .headers()
                .get(header::SET_COOKIE.as_str())
                .and_then(|v| v.to_str().ok()),
            Some("ID=abc")
        );

        let sealed = response.text().await.unwrap();
        let decrypted = envelope::open(&key, &sealed).unwrap();
        assert_eq!(decrypted[0]["result"]["status"], "OK");
    }

    #[tokio::test]
    async fn push_verb_reaches_the_forwarder() {
        // No such receiver: the push fails inside the forwarder, proving
        // the custom verb routed past the method match.
        let addr = spawn(state_with(MockDb::default())).await;

        let response = reqwest::Client::new()
            .request(
                reqwest::Method::from_bytes(b"PUSH").unwrap(),
                format!("http://{addr}/"),
            )
            .body(r#"{"anon":"ghost","command":"check"}"#)
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), 500);
        assert!(response.text().await.unwrap().contains("unknown anonymizer"));
    }

    #[tokio::test]
    async fn undefined_methods_get_405() {
        let addr = spawn(state_with(MockDb::default())).await;
        let response = reqwest::Client::new()
            .get(format!("http://{addr}/"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 405);
    }
}
