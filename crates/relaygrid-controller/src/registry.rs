//! In-memory view of the element registries.
//!
//! The registry is a per-request snapshot of the anonymizer and injector
//! sets, fetched from the DB when the controller is constructed and
//! immutable for the lifetime of that request. Two concurrent requests each
//! hold their own snapshot and never share mutable state.

use relaygrid_protocol::cookie;
use serde::Deserialize;

use crate::error::ControllerError;

/// What kind of network element a record describes.
///
/// Decided once at registry load. Anonymizers are addressable relays that
/// participate in forwarding chains; injectors call in from the field and
/// are only ever reached through their own requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    Anonymizer,
    Injector,
}

/// Immutable snapshot of one registered element.
#[derive(Debug, Clone)]
pub struct Element {
    pub id:       String,
    pub name:     String,
    pub kind:     ElementKind,
    /// Shared secret: auth token on the wire and key lookup handle here.
    pub cookie:   String,
    /// Symmetric AES key bytes.
    pub key:      Vec<u8>,
    /// Transport endpoint. Meaningful for anonymizers only; an injector's
    /// address is observed per request from `X-Forwarded-For`.
    pub address:  String,
    pub port:     u16,
    /// Local-node identity marker. The record whose instance matches this
    /// process's `local_instance` is *self*.
    pub instance: String,
    /// Ordered successor ids; only the first is followed.
    pub next:     Vec<String>,
}

impl Element {
    pub fn is_anonymizer(&self) -> bool {
        self.kind == ElementKind::Anonymizer
    }

    /// `<host>:<port>` endpoint string.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

/// DB wire shape for one element record. The key travels base64-encoded.
#[derive(Debug, Deserialize)]
pub struct ElementRecord {
    pub id:   String,
    pub name: String,
    #[serde(default)]
    pub cookie: String,
    pub key: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub instance: String,
    #[serde(default)]
    pub next: Vec<String>,
}

impl ElementRecord {
    pub fn into_element(self, kind: ElementKind) -> Result<Element, ControllerError> {
        use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
        let key = B64.decode(&self.key).map_err(|_| {
            crate::db::DbError::Decode(format!("element {}: key is not base64", self.id))
        })?;
        Ok(Element {
            id: self.id,
            name: self.name,
            kind,
            cookie: self.cookie,
            key,
            address: self.address,
            port: self.port,
            instance: self.instance,
            next: self.next,
        })
    }
}

/// Per-request registry snapshot.
pub struct Registry {
    anonymizers: Vec<Element>,
    injectors:   Vec<Element>,
}

impl Registry {
    pub fn new(anonymizers: Vec<Element>, injectors: Vec<Element>) -> Self {
        Self { anonymizers, injectors }
    }

    pub fn anonymizers(&self) -> &[Element] {
        &self.anonymizers
    }

    pub fn injectors(&self) -> &[Element] {
        &self.injectors
    }

    /// Resolve the element a request is authenticated as.
    ///
    /// The raw `Cookie` header value is reduced to the token after its last
    /// `=`. Anonymizers are searched before injectors; first match wins.
    pub fn bind_by_cookie(&self, cookie_header: &str) -> Result<&Element, ControllerError> {
        let token = cookie::token(cookie_header);
        self.anonymizers
            .iter()
            .chain(self.injectors.iter())
            .find(|e| e.cookie == token)
            .ok_or(ControllerError::InvalidCookie)
    }

    /// Look up an anonymizer by id (PUSH receivers are always anonymizers).
    pub fn find_anonymizer(&self, id: &str) -> Result<&Element, ControllerError> {
        self.anonymizers
            .iter()
            .find(|e| e.id == id)
            .ok_or_else(|| ControllerError::UnknownAnon(id.to_owned()))
    }
}
