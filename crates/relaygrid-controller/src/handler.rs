//! Request handling.
//!
//! One `NetworkController` is constructed per inbound HTTP request; it owns
//! that request's registry snapshot and element binding and shares nothing
//! mutable with concurrent invocations. `POST` is the encrypted peer flow,
//! `PUSH` the plaintext command-origination flow from the local DB.

use std::sync::Arc;

use relaygrid_protocol::command::{self, response, CommandName};
use relaygrid_protocol::{cookie, envelope};

use crate::chain::Chain;
use crate::db::Db;
use crate::error::ControllerError;
use crate::executor;
use crate::forwarder::{self, PushRequest};
use crate::registry::Registry;

/// Transport metadata the host server hands down with each request.
#[derive(Debug, Clone, Default)]
pub struct RequestMeta {
    /// Raw `Cookie` header value, if any.
    pub cookie: Option<String>,
    /// `X-Forwarded-For`, used as the observed address of injectors.
    pub forwarded_for: Option<String>,
}

/// What the host server should send back.
#[derive(Debug)]
pub struct Reply {
    pub status: u16,
    pub body:   String,
    /// `Set-Cookie` value echoing the bound element's token.
    pub cookie: Option<String>,
}

impl Reply {
    fn ok(body: String, cookie: Option<String>) -> Self {
        Self { status: 200, body, cookie }
    }

    fn error(message: impl std::fmt::Display) -> Self {
        Self { status: 500, body: message.to_string(), cookie: None }
    }
}

pub struct NetworkController {
    db:       Arc<dyn Db>,
    http:     reqwest::Client,
    registry: Registry,
    chain:    Chain,
}

impl NetworkController {
    /// Fetch the registry snapshots and freeze the forwarding chain.
    pub async fn bootstrap(
        db: Arc<dyn Db>,
        http: reqwest::Client,
        local_instance: &str,
    ) -> Result<Self, ControllerError> {
        let anonymizers = db.anonymizers().await?;
        let injectors = db.injectors().await?;
        let chain = Chain::resolve(&anonymizers, local_instance);
        if chain.is_empty() {
            tracing::warn!(
                "[NC] no anonymizer record for local instance {local_instance}; chain is empty"
            );
        }
        Ok(Self {
            db,
            http,
            registry: Registry::new(anonymizers, injectors),
            chain,
        })
    }

    /// Entry point. Returns `None` for methods this controller does not
    /// define; the host server applies its own default then.
    pub async fn act(&self, method: &str, body: &[u8], meta: &RequestMeta) -> Option<Reply> {
        match method {
            "POST" => Some(self.handle_post(body, meta).await),
            "PUSH" => Some(self.handle_push(body, meta).await),
            _ => None,
        }
    }

    /// Peer-initiated encrypted command batch.
    async fn handle_post(&self, body: &[u8], meta: &RequestMeta) -> Reply {
        let element = match self
            .registry
            .bind_by_cookie(meta.cookie.as_deref().unwrap_or_default())
        {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!("[NC] rejecting request: {e}");
                return Reply::error(e);
            }
        };
        let echo = Some(cookie::header(&element.cookie));

        let blob = String::from_utf8_lossy(body);
        let payload = match envelope::open(&element.key, &blob) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!("[NC] cannot decrypt request from {}: {e}", element.name);
                return Reply::error(ControllerError::from(e));
            }
        };
        let batch = command::normalize_batch(payload);

        match executor::execute(self.db.as_ref(), element, &batch, meta).await {
            Ok(responses) => match envelope::seal(&element.key, &responses) {
                Ok(sealed) => Reply::ok(sealed, echo),
                Err(e) => Reply::error(ControllerError::from(e)),
            },
            Err(e) => {
                // The whole response list collapses into one STATUS/ERROR
                // entry, still sealed for the peer, under a 500.
                tracing::error!("[NC] command execution failed for {}: {e}", element.name);
                let fallback = vec![response::error(CommandName::Status, &e)];
                match envelope::seal(&element.key, &fallback) {
                    Ok(sealed) => Reply { status: 500, body: sealed, cookie: echo },
                    Err(seal_err) => Reply::error(ControllerError::from(seal_err)),
                }
            }
        }
    }

    /// DB-originated plaintext push: locate the receiver, wrap the command
    /// through the chain, report the far status back as plain text.
    async fn handle_push(&self, body: &[u8], meta: &RequestMeta) -> Reply {
        let push: PushRequest = match serde_json::from_slice(body) {
            Ok(p) => p,
            Err(e) => return Reply::error(format!("malformed push request: {e}")),
        };

        match forwarder::forward(
            self.db.as_ref(),
            &self.registry,
            &self.chain,
            &self.http,
            push,
            meta,
        )
        .await
        {
            Ok(status) => Reply::ok(status, None),
            Err(e) => {
                tracing::error!("[NC] push failed: {e}");
                Reply::error(e)
            }
        }
    }
}
