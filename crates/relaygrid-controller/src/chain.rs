//! Forwarding chain resolution.
//!
//! The chain is the ordered anonymizer path rooted at this node: *self*
//! first, then each record reached by following `next.first` links. It is
//! built once per controller from the registry snapshot and frozen.

use crate::registry::Element;

/// Ordered anonymizer chain starting at *self*.
///
/// An empty chain means this node has no anonymizer record of its own
/// (outbound pushes then go direct to the receiver).
pub struct Chain {
    hops: Vec<Element>,
}

impl Chain {
    /// Walk the registry from the record whose `instance` matches
    /// `local_instance`.
    ///
    /// Traversal stops at a record with no successor, at a successor id the
    /// registry does not know, at a repeated id, and in any case after
    /// `anonymizers.len()` hops, so cyclic `next` links terminate.
    pub fn resolve(anonymizers: &[Element], local_instance: &str) -> Self {
        let Some(start) = anonymizers.iter().find(|e| e.instance == local_instance) else {
            return Self { hops: Vec::new() };
        };

        let mut hops = vec![start.clone()];
        let mut cursor = start.next.first().cloned();
        while let Some(id) = cursor {
            if hops.len() >= anonymizers.len() || hops.iter().any(|e| e.id == id) {
                break;
            }
            let Some(element) = anonymizers.iter().find(|e| e.id == id) else {
                break;
            };
            cursor = element.next.first().cloned();
            hops.push(element.clone());
        }
        Self { hops }
    }

    pub fn hops(&self) -> &[Element] {
        &self.hops
    }

    pub fn is_empty(&self) -> bool {
        self.hops.is_empty()
    }

    /// The chain prefix strictly before `target` — the hops a command must
    /// traverse to reach it. A target that is not on the chain gets the
    /// whole chain.
    pub fn forwarding_chain(&self, target: &Element) -> &[Element] {
        let end = self
            .hops
            .iter()
            .position(|e| e.id == target.id)
            .unwrap_or(self.hops.len());
        &self.hops[..end]
    }
}
