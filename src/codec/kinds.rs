//! Kind registry - maps message names to the kinds written on the wire.
//!
//! Both peers must agree on the mapping. Kinds are either assigned
//! sequentially in registration order (starting at 1, 0 is reserved) or
//! pinned explicitly with [`KindRegistry::register_with_kind`].
//!
//! # Example
//!
//! ```
//! use wirelink::codec::KindRegistry;
//!
//! let mut kinds = KindRegistry::new();
//! let login = kinds.register("Login").unwrap();
//! kinds.register_with_kind("Ping", 100).unwrap();
//!
//! assert_eq!(login, 1);
//! assert_eq!(kinds.kind_of("Ping"), Some(100));
//! assert_eq!(kinds.name_of(1), Some("Login"));
//! ```

use std::collections::HashMap;

use super::{Message, MessageKind, RESERVED_KIND};
use crate::error::{Result, WireError};

/// Registry mapping message names to kinds and back.
#[derive(Debug, Clone)]
pub struct KindRegistry {
    by_name: HashMap<String, MessageKind>,
    by_kind: HashMap<MessageKind, String>,
    next_kind: MessageKind,
}

impl KindRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            by_name: HashMap::new(),
            by_kind: HashMap::new(),
            next_kind: 1,
        }
    }

    /// Register a name under the next free sequential kind.
    ///
    /// Registering a name twice returns its existing kind.
    pub fn register(&mut self, name: &str) -> Result<MessageKind> {
        if let Some(&kind) = self.by_name.get(name) {
            return Ok(kind);
        }

        while self.by_kind.contains_key(&self.next_kind) {
            self.next_kind = self.next_kind.checked_add(1).ok_or_else(|| WireError::InvalidKind {
                name: name.to_string(),
                kind: MessageKind::MAX,
            })?;
        }

        let kind = self.next_kind;
        self.insert(name, kind);
        Ok(kind)
    }

    /// Register a name under an explicit kind.
    ///
    /// # Errors
    ///
    /// `InvalidKind` if the kind is 0, already taken by another name, or the
    /// name is already registered under a different kind.
    pub fn register_with_kind(&mut self, name: &str, kind: MessageKind) -> Result<()> {
        let invalid = || WireError::InvalidKind {
            name: name.to_string(),
            kind,
        };

        if kind == RESERVED_KIND {
            return Err(invalid());
        }
        match (self.by_name.get(name), self.by_kind.get(&kind)) {
            (Some(&existing), _) if existing == kind => return Ok(()),
            (Some(_), _) | (None, Some(_)) => return Err(invalid()),
            (None, None) => {}
        }

        self.insert(name, kind);
        Ok(())
    }

    /// Register a message type by its `NAME`.
    pub fn register_message<M: Message>(&mut self) -> Result<MessageKind> {
        self.register(M::NAME)
    }

    fn insert(&mut self, name: &str, kind: MessageKind) {
        self.by_name.insert(name.to_string(), kind);
        self.by_kind.insert(kind, name.to_string());
    }

    /// Get the kind registered for a name.
    pub fn kind_of(&self, name: &str) -> Option<MessageKind> {
        self.by_name.get(name).copied()
    }

    /// Get the kind registered for a message type, failing with `UnknownMessage`.
    pub fn kind_for<M: Message>(&self) -> Result<MessageKind> {
        self.kind_of(M::NAME)
            .ok_or_else(|| WireError::UnknownMessage(M::NAME.to_string()))
    }

    /// Get the name registered for a kind.
    pub fn name_of(&self, kind: MessageKind) -> Option<&str> {
        self.by_kind.get(&kind).map(|s| s.as_str())
    }

    /// Number of registered kinds.
    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    /// True when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

impl Default for KindRegistry {
    fn default() -> Self {
        Self::new()
    }
}
