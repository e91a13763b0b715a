use std::collections::BTreeMap;

use super::Tag;
use crate::engine::array_index;

/// Per-object shadow slot: property name to tag, the prototype-link tag and
/// the instrumented-function marker. Stored beside the object's properties, so
/// it never shows up in enumeration.
///
/// A key mapped to `None` was recorded without a tag; an absent key was never
/// recorded and gets a synthesized tag on first read.
#[derive(Debug, Clone, Default)]
pub struct ShadowTable {
    pub props: BTreeMap<String, Option<Tag>>,
    pub proto_tag: Option<Tag>,
    pub instrumented: bool,
}

impl ShadowTable {
    pub fn lookup(&self, key: &str) -> Option<&Option<Tag>> {
        self.props.get(key)
    }

    /// Recorded tag for `key`, `None` both when untagged and when unrecorded.
    pub fn tag(&self, key: &str) -> Option<Tag> {
        self.props.get(key).cloned().flatten()
    }

    pub fn set(&mut self, key: &str, tag: Option<Tag>) {
        self.props.insert(key.to_string(), tag);
    }

    pub fn remove(&mut self, key: &str) -> Option<Option<Tag>> {
        self.props.remove(key)
    }

    /// Forgets index entries at or above `len` after an array shrinks.
    pub fn truncate_indices(&mut self, len: u32) {
        self.props
            .retain(|key, _| array_index(key).map_or(true, |i| i < len));
    }
}
