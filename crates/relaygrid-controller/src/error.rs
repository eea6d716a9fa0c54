use relaygrid_protocol::ProtocolError;
use thiserror::Error;

use crate::db::DbError;
use crate::evidence::EvidenceError;

/// Controller-side error taxonomy. Request paths catch these at the top
/// and turn them into `(500, <display text>)`; the evidence worker catches
/// them per dispatch task and keeps running. Nothing here aborts the
/// process.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// No element matches the supplied cookie. The text is part of the
    /// operator-visible contract; peers grep for it.
    #[error("Invalid cookie")]
    InvalidCookie,

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("unknown anonymizer: {0}")]
    UnknownAnon(String),

    #[error("Cannot communicate with {name}: {reason}")]
    Transport { name: String, reason: String },

    /// The peer's reply carried no `Set-Cookie`, so there is no key to
    /// decrypt it with.
    #[error("invalid response cookie")]
    InvalidResponseCookie,

    #[error("command execution failed: {0}")]
    Exec(String),

    #[error(transparent)]
    Db(#[from] DbError),

    #[error(transparent)]
    Evidence(#[from] EvidenceError),

    /// The DB could not resolve an agent id for this instance; the
    /// dispatch task aborts and the queue entry survives for a later tick.
    #[error("agent id unresolved for {ident} ({instance})")]
    ZeroBid { ident: String, instance: String },
}
