//! Versioned state channels.
//!
//! `VersionedState` is built from independently-versioned channels. Each
//! channel owns a `Vec<T>` plus a monotonically increasing version number
//! used for optimistic concurrency checks and scheduler gating. Reducers
//! mutate channel contents; bumping the version is the barrier's job, not
//! the reducer's (see [`crate::reducers`]).

pub mod errors;

pub use errors::{ErrorEvent, ErrorScope, LadderError};

use crate::message::Message;
use crate::types::ChannelType;
use serde_json::Value;

/// Common behavior shared by all versioned state channels.
pub trait Channel {
    /// Inner item type stored by this channel.
    type Item: Clone;

    /// Which [`ChannelType`] this channel implements.
    fn get_channel_type(&self) -> ChannelType;

    /// Whether this channel's contents should survive across checkpoints.
    /// All current channels are persistent; the hook exists for future
    /// transient/scratch channels.
    fn persistent(&self) -> bool {
        true
    }

    /// Current version number.
    fn version(&self) -> u32;

    /// Overwrite the version number, typically by the barrier after a merge.
    fn set_version(&mut self, version: u32);

    /// Number of items currently stored.
    fn len(&self) -> usize;

    /// True when the channel holds no items.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clone the current contents.
    fn snapshot(&self) -> Vec<Self::Item>;

    /// Mutable access to the underlying storage, for reducers.
    fn get_mut(&mut self) -> &mut Vec<Self::Item>;
}

/// Conversation message channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessagesChannel {
    items: Vec<Message>,
    version: u32,
}

impl MessagesChannel {
    #[must_use]
    pub fn new(items: Vec<Message>, version: u32) -> Self {
        Self { items, version }
    }
}

impl Default for MessagesChannel {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            version: 1,
        }
    }
}

impl Channel for MessagesChannel {
    type Item = Message;

    fn get_channel_type(&self) -> ChannelType {
        ChannelType::Message
    }

    fn version(&self) -> u32 {
        self.version
    }

    fn set_version(&mut self, version: u32) {
        self.version = version;
    }

    fn len(&self) -> usize {
        self.items.len()
    }

    fn snapshot(&self) -> Vec<Message> {
        self.items.clone()
    }

    fn get_mut(&mut self) -> &mut Vec<Message> {
        &mut self.items
    }
}

/// Custom metadata / intermediate-result channel, keyed by string.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtrasChannel {
    map: crate::utils::collections::ExtraMap,
    version: u32,
}

impl ExtrasChannel {
    #[must_use]
    pub fn new(map: crate::utils::collections::ExtraMap, version: u32) -> Self {
        Self { map, version }
    }

    /// Look up a single key without cloning the whole map.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.map.get(key)
    }
}

impl Default for ExtrasChannel {
    fn default() -> Self {
        Self {
            map: crate::utils::collections::new_extra_map(),
            version: 1,
        }
    }
}

/// `ExtrasChannel` stores a map rather than a `Vec`; it implements `Channel`
/// with the map's values as its notional item sequence so callers that treat
/// channels generically (`len`, `is_empty`, `snapshot`) still work, while
/// `get`/`get_mut` below give map-shaped access for reducers like `MapMerge`.
impl Channel for ExtrasChannel {
    type Item = (String, Value);

    fn get_channel_type(&self) -> ChannelType {
        ChannelType::Extra
    }

    fn version(&self) -> u32 {
        self.version
    }

    fn set_version(&mut self, version: u32) {
        self.version = version;
    }

    fn len(&self) -> usize {
        self.map.len()
    }

    fn snapshot(&self) -> Vec<(String, Value)> {
        self.map.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }

    fn get_mut(&mut self) -> &mut Vec<(String, Value)> {
        unimplemented!(
            "ExtrasChannel is map-backed; use ExtrasChannel::get_mut() for the FxHashMap view"
        )
    }
}

impl ExtrasChannel {
    /// Mutable access to the underlying key/value map.
    #[must_use]
    pub fn get_mut(&mut self) -> &mut crate::utils::collections::ExtraMap {
        &mut self.map
    }

    /// Clone the underlying key/value map.
    #[must_use]
    pub fn snapshot(&self) -> crate::utils::collections::ExtraMap {
        self.map.clone()
    }
}

/// Non-fatal error / diagnostic channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ErrorsChannel {
    items: Vec<ErrorEvent>,
    version: u32,
}

impl ErrorsChannel {
    #[must_use]
    pub fn new(items: Vec<ErrorEvent>, version: u32) -> Self {
        Self { items, version }
    }
}

impl Default for ErrorsChannel {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            version: 1,
        }
    }
}

impl Channel for ErrorsChannel {
    type Item = ErrorEvent;

    fn get_channel_type(&self) -> ChannelType {
        ChannelType::Error
    }

    fn version(&self) -> u32 {
        self.version
    }

    fn set_version(&mut self, version: u32) {
        self.version = version;
    }

    fn len(&self) -> usize {
        self.items.len()
    }

    fn snapshot(&self) -> Vec<ErrorEvent> {
        self.items.clone()
    }

    fn get_mut(&mut self) -> &mut Vec<ErrorEvent> {
        &mut self.items
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_channel_defaults() {
        let ch = MessagesChannel::default();
        assert_eq!(ch.get_channel_type(), ChannelType::Message);
        assert_eq!(ch.version(), 1);
        assert!(ch.is_empty());
    }

    #[test]
    fn errors_channel_push_and_version() {
        let mut ch = ErrorsChannel::default();
        assert_eq!(ch.len(), 0);
        ch.get_mut().push(ErrorEvent::default());
        assert_eq!(ch.len(), 1);
        ch.set_version(3);
        assert_eq!(ch.version(), 3);
    }
}
