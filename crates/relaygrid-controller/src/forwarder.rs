//! Outbound command forwarding.
//!
//! A PUSH names a receiver anonymizer and a command. The command is sealed
//! for the receiver, then wrapped outward-in: each hop on the forwarding
//! chain (walked back to front) adds a FORWARD layer sealed with its own
//! key, carrying only the next peer's endpoint, its cookie, and an opaque
//! body. A hop can route the message one step; only the receiver can read
//! it.

use reqwest::header;
use serde::Deserialize;
use serde_json::{json, Value};

use relaygrid_protocol::command::CommandName;
use relaygrid_protocol::{cookie, envelope};

use crate::chain::Chain;
use crate::db::Db;
use crate::error::ControllerError;
use crate::executor;
use crate::handler::RequestMeta;
use crate::registry::{Element, Registry};

/// Plaintext PUSH body from the DB.
#[derive(Debug, Deserialize)]
pub struct PushRequest {
    /// Receiver anonymizer id.
    pub anon: String,
    /// One of `config`, `upgrade`, `check`.
    pub command: String,
    /// Base64 payload for config/upgrade pushes.
    #[serde(default)]
    pub body: Option<String>,
}

/// Route a push through the chain and return the far element's reported
/// status string.
pub async fn forward(
    db: &dyn Db,
    registry: &Registry,
    chain: &Chain,
    http: &reqwest::Client,
    push: PushRequest,
    meta: &RequestMeta,
) -> Result<String, ControllerError> {
    let target = registry.find_anonymizer(&push.anon)?;

    let inner = match push.command.as_str() {
        "config" => json!({
            "command": CommandName::Config.as_str(),
            "params": {},
            "body": push.body.clone().unwrap_or_default(),
        }),
        "upgrade" => json!({
            "command": CommandName::Upgrade.as_str(),
            "params": {},
            "body": push.body.clone().unwrap_or_default(),
        }),
        "check" => json!({ "command": CommandName::Check.as_str(), "params": {} }),
        other => return Err(ControllerError::Exec(format!("unknown push command: {other}"))),
    };

    let mut receiver = target.clone();
    let mut msg = envelope::seal(&receiver.key, &inner)?;

    // Wrap back to front until the route is consumed or only *self*
    // remains; *self* sends direct.
    let mut route: Vec<Element> = chain.forwarding_chain(target).to_vec();
    while route.len() > 1 {
        let Some(hop) = route.pop() else { break };
        let forward = json!({
            "command": CommandName::Forward.as_str(),
            "params": {
                "address": receiver.endpoint(),
                "cookie": cookie::header(&receiver.cookie),
            },
            "body": msg,
        });
        msg = envelope::seal(&hop.key, &forward)?;
        receiver = hop;
    }

    tracing::info!(
        "[NC] pushing {} to {} via {} ({} hop layers)",
        push.command,
        target.name,
        receiver.name,
        chain.forwarding_chain(target).len().saturating_sub(1),
    );

    let transport_err = |name: &str, e: &dyn std::fmt::Display| ControllerError::Transport {
        name: name.to_owned(),
        reason: e.to_string(),
    };

    let response = http
        .post(format!("http://{}/", receiver.endpoint()))
        .header(header::COOKIE, cookie::header(&receiver.cookie))
        .body(msg)
        .send()
        .await
        .map_err(|e| transport_err(&receiver.name, &e))?;

    let set_cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
        .ok_or(ControllerError::InvalidResponseCookie)?;

    let reply_blob = response
        .text()
        .await
        .map_err(|e| transport_err(&receiver.name, &e))?;

    // The echoed cookie names the element whose key seals the reply.
    let bound = registry.bind_by_cookie(&set_cookie)?;
    let mut reply = envelope::open(&bound.key, &reply_blob)?;

    // A STATUS reply doubles as a health report: run it through the
    // executor (DB updates included), then synthesize the uniform result
    // shape the caller expects.
    if reply.get("command").and_then(Value::as_str) == Some(CommandName::Status.as_str()) {
        executor::execute(db, bound, std::slice::from_ref(&reply), meta).await?;
        let status = reply
            .get("params")
            .and_then(|p| p.get("status"))
            .cloned()
            .unwrap_or(Value::Null);
        reply["result"] = json!({ "status": status });
    }

    match reply.get("result").and_then(|r| r.get("status")) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(other) => Ok(other.to_string()),
        None => Err(ControllerError::Exec("peer reply carried no result".into())),
    }
}
