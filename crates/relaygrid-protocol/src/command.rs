//! Command catalogue.
//!
//! A command on the wire is a JSON object `{command, params?, body?}`.
//! Inbound payloads may be a single object or an array of them; unknown
//! command tags are dropped silently so older controllers and newer
//! elements can coexist on one grid.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::constants::{STATUS_ERROR, STATUS_OK};
use crate::error::ProtocolError;

// ============================================================================
// Command names
// ============================================================================

/// All command tags understood anywhere on the grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandName {
    /// Element → controller: periodic health report.
    Status,
    /// Element → controller: append an operational log line.
    Log,
    /// Injector → controller: "give me my current rules".
    ConfigRequest,
    /// Injector → controller: "give me my pending binary upgrade".
    UpgradeRequest,
    /// Controller → element: push a config blob.
    Config,
    /// Controller → element: push an upgrade blob.
    Upgrade,
    /// Controller → element: liveness probe.
    Check,
    /// Hop → hop: relay the encrypted body to the addressed peer.
    Forward,
}

impl CommandName {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Status => "STATUS",
            Self::Log => "LOG",
            Self::ConfigRequest => "CONFIG_REQUEST",
            Self::UpgradeRequest => "UPGRADE_REQUEST",
            Self::Config => "CONFIG",
            Self::Upgrade => "UPGRADE",
            Self::Check => "CHECK",
            Self::Forward => "FORWARD",
        }
    }

    /// Parse a wire tag. Returns `None` for tags this build does not know;
    /// callers drop those commands rather than failing the batch.
    pub fn parse(tag: &str) -> Option<Self> {
        match tag {
            "STATUS" => Some(Self::Status),
            "LOG" => Some(Self::Log),
            "CONFIG_REQUEST" => Some(Self::ConfigRequest),
            "UPGRADE_REQUEST" => Some(Self::UpgradeRequest),
            "CONFIG" => Some(Self::Config),
            "UPGRADE" => Some(Self::Upgrade),
            "CHECK" => Some(Self::Check),
            "FORWARD" => Some(Self::Forward),
            _ => None,
        }
    }
}

impl std::fmt::Display for CommandName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Per-command parameters
// ============================================================================

/// STATUS parameters. Elements in the field omit fields freely, so
/// everything defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusParams {
    #[serde(default)]
    pub status: String,
    /// Free-form counters; keys arrive as arbitrary strings and are
    /// canonicalized by the executor before reaching the DB.
    #[serde(default)]
    pub stats: serde_json::Map<String, Value>,
    #[serde(default)]
    pub msg: String,
    #[serde(default)]
    pub version: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogParams {
    /// Unix seconds at the element.
    #[serde(default)]
    pub time: i64,
    /// Log severity/category tag as the element reports it.
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub desc: String,
}

/// FORWARD parameters: where the next hop must deliver the opaque body,
/// and the cookie to present there.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForwardParams {
    /// `<host>:<port>` of the addressed peer.
    pub address: String,
    /// Full `ID=<token>` cookie header value for the addressed peer.
    pub cookie: String,
}

// ============================================================================
// Parsed commands
// ============================================================================

/// A decoded inbound command.
#[derive(Debug, Clone)]
pub enum Command {
    Status(StatusParams),
    Log(LogParams),
    ConfigRequest,
    UpgradeRequest,
    Config { body: Option<String> },
    Upgrade { body: Option<String> },
    Check,
    Forward { params: ForwardParams, body: String },
}

impl Command {
    pub fn name(&self) -> CommandName {
        match self {
            Self::Status(_) => CommandName::Status,
            Self::Log(_) => CommandName::Log,
            Self::ConfigRequest => CommandName::ConfigRequest,
            Self::UpgradeRequest => CommandName::UpgradeRequest,
            Self::Config { .. } => CommandName::Config,
            Self::Upgrade { .. } => CommandName::Upgrade,
            Self::Check => CommandName::Check,
            Self::Forward { .. } => CommandName::Forward,
        }
    }

    /// Decode one element of a normalized batch.
    ///
    /// `Ok(None)` — not an object, no tag, or a tag this build does not
    /// know: the command is skipped. `Err` — a known tag whose parameters
    /// do not parse; that fails the batch.
    pub fn decode(value: &Value) -> Result<Option<Self>, ProtocolError> {
        let Some(obj) = value.as_object() else {
            return Ok(None);
        };
        let Some(tag) = obj.get("command").and_then(Value::as_str) else {
            return Ok(None);
        };
        let Some(name) = CommandName::parse(tag) else {
            return Ok(None);
        };

        // `params` may be absent or an explicit null; both read as empty.
        let params = match obj.get("params") {
            None | Some(Value::Null) => json!({}),
            Some(p) => p.clone(),
        };
        let body = obj.get("body").and_then(Value::as_str).map(str::to_owned);

        let malformed = |reason: String| ProtocolError::MalformedCommand {
            command: name.as_str().to_owned(),
            reason,
        };

        let cmd = match name {
            CommandName::Status => Self::Status(
                serde_json::from_value(params).map_err(|e| malformed(e.to_string()))?,
            ),
            CommandName::Log => Self::Log(
                serde_json::from_value(params).map_err(|e| malformed(e.to_string()))?,
            ),
            CommandName::ConfigRequest => Self::ConfigRequest,
            CommandName::UpgradeRequest => Self::UpgradeRequest,
            CommandName::Config => Self::Config { body },
            CommandName::Upgrade => Self::Upgrade { body },
            CommandName::Check => Self::Check,
            CommandName::Forward => {
                let params =
                    serde_json::from_value(params).map_err(|e| malformed(e.to_string()))?;
                let body = body.ok_or_else(|| malformed("missing body".into()))?;
                Self::Forward { params, body }
            }
        };
        Ok(Some(cmd))
    }
}

/// Normalize a decrypted payload to a command batch: arrays pass through,
/// a single object becomes a one-element batch.
pub fn normalize_batch(payload: Value) -> Vec<Value> {
    match payload {
        Value::Array(items) => items,
        other => vec![other],
    }
}

// ============================================================================
// Response builders
// ============================================================================

pub mod response {
    use super::*;

    /// `{command, result: {status: OK}}`
    pub fn ok(command: CommandName) -> Value {
        json!({ "command": command.as_str(), "result": { "status": STATUS_OK } })
    }

    /// `{command, result: {status: OK, msg: <msg>}}`
    pub fn ok_with(command: CommandName, msg: Value) -> Value {
        json!({ "command": command.as_str(), "result": { "status": STATUS_OK, "msg": msg } })
    }

    /// `{command, result: {status: ERROR, msg: <msg>}}`
    pub fn error(command: CommandName, msg: impl std::fmt::Display) -> Value {
        json!({
            "command": command.as_str(),
            "result": { "status": STATUS_ERROR, "msg": msg.to_string() },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_tags_round_trip() {
        for tag in [
            "STATUS",
            "LOG",
            "CONFIG_REQUEST",
            "UPGRADE_REQUEST",
            "CONFIG",
            "UPGRADE",
            "CHECK",
            "FORWARD",
        ] {
            let name = CommandName::parse(tag).unwrap();
            assert_eq!(name.as_str(), tag);
        }
        assert!(CommandName::parse("REBOOT").is_none());
    }

    #[test]
    fn decode_status_with_defaults() {
        let v = json!({ "command": "STATUS", "params": { "status": "OK" } });
        let Some(Command::Status(p)) = Command::decode(&v).unwrap() else {
            panic!("expected STATUS");
        };
        assert_eq!(p.status, "OK");
        assert!(p.stats.is_empty());
        assert_eq!(p.version, "");
    }

    #[test]
    fn decode_unknown_tag_is_skipped() {
        let v = json!({ "command": "REBOOT", "params": {} });
        assert!(Command::decode(&v).unwrap().is_none());
        assert!(Command::decode(&json!("not an object")).unwrap().is_none());
        assert!(Command::decode(&json!({ "params": {} })).unwrap().is_none());
    }

    #[test]
    fn decode_forward_requires_body() {
        let v = json!({
            "command": "FORWARD",
            "params": { "address": "10.0.0.9:80", "cookie": "ID=tok" },
        });
        assert!(matches!(
            Command::decode(&v),
            Err(ProtocolError::MalformedCommand { .. })
        ));
    }

    #[test]
    fn normalize_object_and_array() {
        assert_eq!(normalize_batch(json!({ "command": "CHECK" })).len(), 1);
        assert_eq!(
            normalize_batch(json!([{ "command": "CHECK" }, { "command": "STATUS" }])).len(),
            2
        );
    }

    #[test]
    fn response_shapes() {
        let ok = response::ok(CommandName::Status);
        assert_eq!(ok["command"], "STATUS");
        assert_eq!(ok["result"]["status"], "OK");

        let err = response::error(CommandName::ConfigRequest, "No new config");
        assert_eq!(err["result"]["status"], "ERROR");
        assert_eq!(err["result"]["msg"], "No new config");
    }
}
