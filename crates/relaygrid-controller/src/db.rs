//! Upstream metadata store interface.
//!
//! The controller consumes the DB through this trait; the concrete store
//! lives elsewhere and is reached over plain HTTP on the local backend
//! network. Everything the controller needs is a handful of JSON POSTs and
//! two registry reads, so the client stays deliberately thin.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use crate::registry::{Element, ElementKind, ElementRecord};

#[derive(Debug, Error)]
pub enum DbError {
    #[error("DB transport error: {0}")]
    Http(String),

    #[error("DB refused: {0}")]
    Remote(String),

    #[error("DB decode error: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for DbError {
    fn from(e: reqwest::Error) -> Self {
        Self::Http(e.to_string())
    }
}

/// Per-instance dispatch context for one evidence upload session.
///
/// `bid == 0` means the agent id is unknown and must be resolved with
/// [`Db::agent_status`] before anything is uploaded.
#[derive(Debug, Clone, Serialize)]
pub struct TransferSession {
    pub bid:       u64,
    pub ident:     String,
    pub subtype:   String,
    pub instance:  String,
    pub version:   String,
    pub user:      String,
    pub device:    String,
    pub source:    String,
    pub sync_time: i64,
}

/// Everything the controller and the evidence worker ask of the upstream
/// store. Implementations must be internally thread-safe; the evidence
/// worker calls this from one task per instance concurrently.
#[async_trait]
pub trait Db: Send + Sync {
    /// Cheap liveness probe. The evidence worker skips a tick when this is
    /// false rather than queueing failures.
    async fn connected(&self) -> bool;

    async fn anonymizers(&self) -> Result<Vec<Element>, DbError>;
    async fn injectors(&self) -> Result<Vec<Element>, DbError>;

    #[allow(clippy::too_many_arguments)]
    async fn update_status(
        &self,
        name: &str,
        address: &str,
        status: &str,
        msg: &str,
        stats: serde_json::Map<String, Value>,
        kind: &str,
        version: &str,
    ) -> Result<(), DbError>;

    async fn update_collector_version(&self, id: &str, version: &str) -> Result<(), DbError>;
    async fn update_injector_version(&self, id: &str, version: &str) -> Result<(), DbError>;

    async fn collector_add_log(&self, id: &str, time: i64, kind: &str, desc: &str)
        -> Result<(), DbError>;
    async fn injector_add_log(&self, id: &str, time: i64, kind: &str, desc: &str)
        -> Result<(), DbError>;

    /// Pending rules blob for an injector, if any.
    async fn injector_config(&self, id: &str) -> Result<Option<Vec<u8>>, DbError>;
    /// Pending upgrade blob for an injector, if any.
    async fn injector_upgrade(&self, id: &str) -> Result<Option<Vec<u8>>, DbError>;

    /// Resolve an agent's backend id. Returns `(status, bid)`; `bid == 0`
    /// means the store does not know the agent either.
    async fn agent_status(
        &self,
        ident: &str,
        instance: &str,
        subtype: &str,
    ) -> Result<(String, u64), DbError>;

    async fn sync_start(&self, session: &TransferSession) -> Result<(), DbError>;
    async fn send_evidence(&self, instance: &str, blob: &[u8]) -> Result<(), DbError>;
    async fn sync_end(&self, session: &TransferSession) -> Result<(), DbError>;
}

// ============================================================================
// HTTP client implementation
// ============================================================================

/// Generic `{status, result?}` reply shape the store uses everywhere.
#[derive(Deserialize)]
struct DbReply {
    status: String,
    #[serde(default)]
    result: Value,
}

/// Thin JSON-over-HTTP client for the upstream store.
pub struct HttpDb {
    base_url: String,
    http:     reqwest::Client,
}

impl HttpDb {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_owned(),
            http: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
        }
    }

    async fn call(&self, path: &str, payload: Value) -> Result<Value, DbError> {
        let reply: DbReply = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .json(&payload)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        if reply.status != relaygrid_protocol::STATUS_OK {
            return Err(DbError::Remote(reply.status));
        }
        Ok(reply.result)
    }

    async fn elements(&self, path: &str, kind: ElementKind) -> Result<Vec<Element>, DbError> {
        let result = self.call(path, json!({})).await?;
        let records: Vec<ElementRecord> =
            serde_json::from_value(result).map_err(|e| DbError::Decode(e.to_string()))?;
        records
            .into_iter()
            .map(|r| {
                r.into_element(kind).map_err(|e| match e {
                    crate::error::ControllerError::Db(db) => db,
                    other => DbError::Decode(other.to_string()),
                })
            })
            .collect()
    }

    /// Fetch an optional binary blob: the store answers `result: null` when
    /// there is nothing pending, or a base64 string.
    async fn blob(&self, path: &str, id: &str) -> Result<Option<Vec<u8>>, DbError> {
        use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
        match self.call(path, json!({ "id": id })).await? {
            Value::Null => Ok(None),
            Value::String(b64) if b64.is_empty() => Ok(None),
            Value::String(b64) => B64
                .decode(b64)
                .map(Some)
                .map_err(|_| DbError::Decode("blob is not base64".into())),
            other => Err(DbError::Decode(format!("unexpected blob shape: {other}"))),
        }
    }
}

#[async_trait]
impl Db for HttpDb {
    async fn connected(&self) -> bool {
        self.call("/ping", json!({})).await.is_ok()
    }

    async fn anonymizers(&self) -> Result<Vec<Element>, DbError> {
        self.elements("/registry/anonymizers", ElementKind::Anonymizer).await
    }

    async fn injectors(&self) -> Result<Vec<Element>, DbError> {
        self.elements("/registry/injectors", ElementKind::Injector).await
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
        self.call(
            "/status/update",
            json!({
                "name": name,
                "address": address,
                "status": status,
                "msg": msg,
                "stats": stats,
                "kind": kind,
                "version": version,
            }),
        )
        .await
        .map(|_| ())
    }

    async fn update_collector_version(&self, id: &str, version: &str) -> Result<(), DbError> {
        self.call("/collectors/version", json!({ "id": id, "version": version }))
            .await
            .map(|_| ())
    }

    async fn update_injector_version(&self, id: &str, version: &str) -> Result<(), DbError> {
        self.call("/injectors/version", json!({ "id": id, "version": version }))
            .await
            .map(|_| ())
    }

    async fn collector_add_log(
        &self,
        id: &str,
        time: i64,
        kind: &str,
        desc: &str,
    ) -> Result<(), DbError> {
        self.call(
            "/collectors/log",
            json!({ "id": id, "time": time, "type": kind, "desc": desc }),
        )
        .await
        .map(|_| ())
    }

    async fn injector_add_log(
        &self,
        id: &str,
        time: i64,
        kind: &str,
        desc: &str,
    ) -> Result<(), DbError> {
        self.call(
            "/injectors/log",
            json!({ "id": id, "time": time, "type": kind, "desc": desc }),
        )
        .await
        .map(|_| ())
    }

    async fn injector_config(&self, id: &str) -> Result<Option<Vec<u8>>, DbError> {
        self.blob("/injectors/config", id).await
    }

    async fn injector_upgrade(&self, id: &str) -> Result<Option<Vec<u8>>, DbError> {
        self.blob("/injectors/upgrade", id).await
    }

    async fn agent_status(
        &self,
        ident: &str,
        instance: &str,
        subtype: &str,
    ) -> Result<(String, u64), DbError> {
        let result = self
            .call(
                "/agents/status",
                json!({ "ident": ident, "instance": instance, "subtype": subtype }),
            )
            .await?;
        let status = result
            .get("status")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned();
        let bid = result.get("bid").and_then(Value::as_u64).unwrap_or(0);
        Ok((status, bid))
    }

    async fn sync_start(&self, session: &TransferSession) -> Result<(), DbError> {
        self.call("/sync/start", json!(session)).await.map(|_| ())
    }

    async fn send_evidence(&self, instance: &str, blob: &[u8]) -> Result<(), DbError> {
        use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
        self.call(
            "/sync/evidence",
            json!({ "instance": instance, "blob": B64.encode(blob) }),
        )
        .await
        .map(|_| ())
    }

    async fn sync_end(&self, session: &TransferSession) -> Result<(), DbError> {
        self.call("/sync/end", json!(session)).await.map(|_| ())
    }
}
