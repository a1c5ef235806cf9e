use std::collections::HashMap;

use crate::model::{DestId, EntityKind, SourceId};

/// Run-scoped association between source ids and destination ids, one
/// instance per workspace execution. Nothing is persisted: a later run
/// rebuilds the map from the destination's current contents.
#[derive(Debug, Default, Clone)]
pub struct IdentityMap {
    forward: HashMap<(EntityKind, SourceId), DestId>,
    reverse: HashMap<(EntityKind, DestId), SourceId>,
}

impl IdentityMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an association. A later `put` for the same source id replaces
    /// the earlier one in both directions.
    pub fn put(&mut self, kind: EntityKind, source_id: SourceId, dest_id: impl Into<DestId>) {
        let dest_id = dest_id.into();
        if let Some(previous) = self.forward.insert((kind, source_id), dest_id.clone()) {
            self.reverse.remove(&(kind, previous));
        }
        self.reverse.insert((kind, dest_id), source_id);
    }

    pub fn get(&self, kind: EntityKind, source_id: SourceId) -> Option<&DestId> {
        self.forward.get(&(kind, source_id))
    }

    pub fn source_of(&self, kind: EntityKind, dest_id: &str) -> Option<SourceId> {
        self.reverse.get(&(kind, dest_id.to_string())).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get_round_trips_per_kind() {
        let mut map = IdentityMap::new();
        map.put(EntityKind::Client, 1, "c-1");
        map.put(EntityKind::Project, 1, "p-1");

        assert_eq!(map.get(EntityKind::Client, 1).map(String::as_str), Some("c-1"));
        assert_eq!(map.get(EntityKind::Project, 1).map(String::as_str), Some("p-1"));
        assert_eq!(map.get(EntityKind::Tag, 1), None);
        assert_eq!(map.source_of(EntityKind::Project, "p-1"), Some(1));
        assert_eq!(map.source_of(EntityKind::Client, "p-1"), None);
    }

    #[test]
    fn replacing_a_mapping_drops_the_stale_reverse_entry() {
        let mut map = IdentityMap::new();
        map.put(EntityKind::Tag, 7, "old");
        map.put(EntityKind::Tag, 7, "new");

        assert_eq!(map.get(EntityKind::Tag, 7).map(String::as_str), Some("new"));
        assert_eq!(map.source_of(EntityKind::Tag, "old"), None);
        assert_eq!(map.source_of(EntityKind::Tag, "new"), Some(7));
    }

    #[test]
    fn empty_map_reports_absent() {
        let map = IdentityMap::new();
        assert_eq!(map.get(EntityKind::User, 3), None);
        assert_eq!(map.source_of(EntityKind::User, "u-3"), None);
    }
}
