//! Shared test fixtures: canned elements, a call-recording DB, and a
//! one-shot peer endpoint for exercising the outbound forwarder.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::db::{Db, DbError, TransferSession};
use crate::handler::NetworkController;
use crate::registry::{Element, ElementKind};

// ============================================================================
// Elements
// ============================================================================

/// Deterministic per-id 32-byte key so fixtures can re-derive it.
fn key_for(id: &str) -> Vec<u8> {
    let mut key = vec![0u8; 32];
    for (i, b) in id.bytes().enumerate() {
        key[i % 32] ^= b;
    }
    key
}

pub fn anon_at(
    id: &str,
    name: &str,
    cookie: &str,
    address: &str,
    port: u16,
    next: Option<&str>,
) -> Element {
    Element {
        id: id.to_owned(),
        name: name.to_owned(),
        kind: ElementKind::Anonymizer,
        cookie: cookie.to_owned(),
        key: key_for(id),
        address: address.to_owned(),
        port,
        instance: format!("inst-{id}"),
        next: next.map(str::to_owned).into_iter().collect(),
    }
}

pub fn anon(id: &str, name: &str, cookie: &str) -> Element {
    anon_at(id, name, cookie, "10.0.0.1", 80, None)
}

pub fn anon_with_next(id: &str, name: &str, cookie: &str, next: Option<String>) -> Element {
    anon_at(id, name, cookie, "10.0.0.1", 80, next.as_deref())
}

pub fn injector(id: &str, name: &str, cookie: &str) -> Element {
    let mut e = anon(id, name, cookie);
    e.kind = ElementKind::Injector;
    e.address = String::new();
    e.port = 0;
    e
}

pub async fn controller_with(db: Arc<MockDb>, local_instance: &str) -> NetworkController {
    NetworkController::bootstrap(db, reqwest::Client::new(), local_instance)
        .await
        .expect("controller bootstrap")
}

// ============================================================================
// Recording DB
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum DbCall {
    UpdateStatus {
        name:    String,
        address: String,
        status:  String,
        msg:     String,
        stats:   Value,
        kind:    String,
        version: String,
    },
    UpdateCollectorVersion { id: String, version: String },
    UpdateInjectorVersion { id: String, version: String },
    CollectorAddLog { id: String, time: i64, kind: String, desc: String },
    InjectorAddLog { id: String, time: i64, kind: String, desc: String },
    InjectorConfig { id: String },
    InjectorUpgrade { id: String },
    AgentStatus { ident: String, instance: String, subtype: String },
    SyncStart { bid: u64, instance: String },
    SendEvidence { instance: String, blob: Vec<u8> },
    SyncEnd { instance: String },
}

/// Call-recording in-memory DB with knobs for the failure paths.
#[derive(Default)]
pub struct MockDb {
    pub anonymizer_list: Vec<Element>,
    pub injector_list:   Vec<Element>,
    pub config_blob:     Option<Vec<u8>>,
    pub upgrade_blob:    Option<Vec<u8>>,
    /// What `agent_status` resolves to; `0` leaves the agent unresolved.
    pub agent_bid:       u64,
    pub disconnected:    bool,
    pub fail_updates:    bool,
    pub fail_sync_start: bool,
    /// Evidence payloads `send_evidence` rejects.
    pub fail_blobs:      Vec<Vec<u8>>,
    pub recorded:        Mutex<Vec<DbCall>>,
}

impl MockDb {
    pub fn calls(&self) -> Vec<DbCall> {
        self.recorded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn record(&self, call: DbCall) {
        self.recorded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call);
    }
}

#[async_trait]
impl Db for MockDb {
    async fn connected(&self) -> bool {
        !self.disconnected
    }

    async fn anonymizers(&self) -> Result<Vec<Element>, DbError> {
        Ok(self.anonymizer_list.clone())
    }

    async fn injectors(&self) -> Result<Vec<Element>, DbError> {
        Ok(self.injector_list.clone())
    }

    async fn update_status(
        &self,
        name: &str,
        address: &str,
        status: &str,
        msg: &str,
        stats: serde_json::Map<String, Value>,
        kind: &str,
        version: &str,
    ) -> Result<(), DbError> {
        if self.fail_updates {
            return Err(DbError::Remote("update refused".into()));
        }
        self.record(DbCall::UpdateStatus {
            name: name.into(),
            address: address.into(),
            status: status.into(),
            msg: msg.into(),
            stats: Value::Object(stats),
            kind: kind.into(),
            version: version.into(),
        });
        Ok(())
    }

    async fn update_collector_version(&self, id: &str, version: &str) -> Result<(), DbError> {
        self.record(DbCall::UpdateCollectorVersion { id: id.into(), version: version.into() });
        Ok(())
    }

    async fn update_injector_version(&self, id: &str, version: &str) -> Result<(), DbError> {
        self.record(DbCall::UpdateInjectorVersion { id: id.into(), version: version.into() });
        Ok(())
    }

    async fn collector_add_log(
        &self,
        id: &str,
        time: i64,
        kind: &str,
        desc: &str,
    ) -> Result<(), DbError> {
        self.record(DbCall::CollectorAddLog {
            id: id.into(),
            time,
            kind: kind.into(),
            desc: desc.into(),
        });
        Ok(())
    }

    async fn injector_add_log(
        &self,
        id: &str,
        time: i64,
        kind: &str,
        desc: &str,
    ) -> Result<(), DbError> {
        self.record(DbCall::InjectorAddLog {
            id: id.into(),
            time,
            kind: kind.into(),
            desc: desc.into(),
        });
        Ok(())
    }

    async fn injector_config(&self, id: &str) -> Result<Option<Vec<u8>>, DbError> {
        self.record(DbCall::InjectorConfig { id: id.into() });
        Ok(self.config_blob.clone())
    }

    async fn injector_upgrade(&self, id: &str) -> Result<Option<Vec<u8>>, DbError> {
        self.record(DbCall::InjectorUpgrade { id: id.into() });
        Ok(self.upgrade_blob.clone())
    }

    async fn agent_status(
        &self,
        ident: &str,
        instance: &str,
        subtype: &str,
    ) -> Result<(String, u64), DbError> {
        self.record(DbCall::AgentStatus {
            ident: ident.into(),
            instance: instance.into(),
            subtype: subtype.into(),
        });
        Ok(("OK".into(), self.agent_bid))
    }

    async fn sync_start(&self, session: &TransferSession) -> Result<(), DbError> {
        if self.fail_sync_start {
            return Err(DbError::Remote("sync refused".into()));
        }
        self.record(DbCall::SyncStart { bid: session.bid, instance: session.instance.clone() });
        Ok(())
    }

    async fn send_evidence(&self, instance: &str, blob: &[u8]) -> Result<(), DbError> {
        if self.fail_blobs.iter().any(|b| b == blob) {
            return Err(DbError::Remote("evidence rejected".into()));
        }
        self.record(DbCall::SendEvidence { instance: instance.into(), blob: blob.to_vec() });
        Ok(())
    }

    async fn sync_end(&self, session: &TransferSession) -> Result<(), DbError> {
        self.record(DbCall::SyncEnd { instance: session.instance.clone() });
        Ok(())
    }
}

// ============================================================================
// One-shot peer endpoint
// ============================================================================

/// What the fake peer saw on its inbound request.
pub struct PeerCapture {
    pub cookie: String,
    pub body:   String,
}

type PeerState = (mpsc::UnboundedSender<PeerCapture>, Option<String>, String);

async fn peer_handler(
    axum::extract::State((tx, set_cookie, reply)): axum::extract::State<PeerState>,
    request: axum::extract::Request,
) -> axum::response::Response {
    let (parts, body) = request.into_parts();
    let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap_or_default();
    let cookie = parts
        .headers
        .get(axum::http::header::COOKIE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_owned();
    let _ = tx.send(PeerCapture {
        cookie,
        body: String::from_utf8_lossy(&bytes).into_owned(),
    });

    let mut response = axum::response::Response::new(axum::body::Body::from(reply));
    if let Some(value) = set_cookie {
        response
            .headers_mut()
            .insert(axum::http::header::SET_COOKIE, value.parse().expect("cookie value"));
    }
    response
}

/// Bind an ephemeral peer on localhost that records each request and
/// answers with `reply_body` (plus `Set-Cookie` when given). Returns the
/// port and the capture stream.
pub async fn spawn_peer(
    set_cookie: Option<String>,
    reply_body: String,
) -> (u16, mpsc::UnboundedReceiver<PeerCapture>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let app = axum::Router::new()
        .route("/", axum::routing::any(peer_handler))
        .with_state((tx, set_cookie, reply_body));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test peer");
    let port = listener.local_addr().expect("local addr").port();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (port, rx)
}
