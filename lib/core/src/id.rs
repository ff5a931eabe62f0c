//! Prefixed ULID identifiers.
//!
//! An [`Id`] is a ULID tagged with a zero-sized kind, so a conversation id
//! can never be passed where a message id is expected. Ids render as
//! `conv_01J...` and parse with or without the prefix. On the wire they are
//! the bare ULID.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;
use ulid::Ulid;

/// Names the entity an [`Id`] points at.
pub trait IdKind {
    /// Display prefix, without the separator.
    const PREFIX: &'static str;
    /// Type name used in parse errors.
    const NAME: &'static str;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseIdError {
    pub id_type: &'static str,
    pub reason: String,
}

impl fmt::Display for ParseIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid {}: {}", self.id_type, self.reason)
    }
}

impl std::error::Error for ParseIdError {}

/// A ULID-backed identifier for entities of kind `K`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent, bound = "")]
pub struct Id<K> {
    ulid: Ulid,
    #[serde(skip)]
    kind: PhantomData<K>,
}

impl<K> Id<K> {
    /// Generates a fresh id; later ids sort after earlier ones.
    #[must_use]
    pub fn new() -> Self {
        Ulid::new().into()
    }

    #[must_use]
    pub const fn as_ulid(&self) -> Ulid {
        self.ulid
    }
}

impl<K> Default for Id<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K> From<Ulid> for Id<K> {
    fn from(ulid: Ulid) -> Self {
        Self {
            ulid,
            kind: PhantomData,
        }
    }
}

impl<K: IdKind> fmt::Display for Id<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", K::PREFIX, self.ulid)
    }
}

impl<K: IdKind> fmt::Debug for Id<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl<K: IdKind> FromStr for Id<K> {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s
            .strip_prefix(K::PREFIX)
            .and_then(|rest| rest.strip_prefix('_'))
            .unwrap_or(s);
        Ulid::from_string(raw)
            .map(Self::from)
            .map_err(|e| ParseIdError {
                id_type: K::NAME,
                reason: e.to_string(),
            })
    }
}

/// A user-visible chat thread, the unit of state isolation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Conversation {}

impl IdKind for Conversation {
    const PREFIX: &'static str = "conv";
    const NAME: &'static str = "ConversationId";
}

/// A stored message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Message {}

impl IdKind for Message {
    const PREFIX: &'static str = "msg";
    const NAME: &'static str = "MessageId";
}

pub type ConversationId = Id<Conversation>;
pub type MessageId = Id<Message>;
