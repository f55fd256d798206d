use crate::{
    access::AccessSets,
    types::{HashMap, IndexMap, InstrId},
};
use std::sync::Arc;

/// Hazard and cost information for one instance type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeSemantics {
    id: InstrId,
    name: String,
    access: AccessSets,
    weight: u32,
}

impl TypeSemantics {
    /// Describe type `id` named `name`.
    pub fn new(id: InstrId, name: impl Into<String>, access: AccessSets, weight: u32) -> Self {
        Self {
            id,
            name: name.into(),
            access,
            weight,
        }
    }

    /// Type id.
    #[must_use]
    pub fn id(&self) -> InstrId {
        self.id
    }

    /// Type name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Global variables the type touches.
    #[must_use]
    pub fn access(&self) -> &AccessSets {
        &self.access
    }

    /// Relative cost estimate.
    #[must_use]
    pub fn weight(&self) -> u32 {
        self.weight
    }
}

/// Registry of per-type semantics, queried by id or by name.
#[derive(Debug, Clone, Default)]
pub struct SemanticRegistry {
    by_id: IndexMap<InstrId, Arc<TypeSemantics>>,
    by_name: HashMap<String, InstrId>,
}

impl SemanticRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `semantics`, replacing any previous entry for the same id.
    ///
    /// Returns the replaced entry.
    pub fn register(&mut self, semantics: TypeSemantics) -> Option<Arc<TypeSemantics>> {
        let id = semantics.id;
        let previous = self.by_id.insert(id, Arc::new(semantics));
        if let Some(previous) = &previous {
            self.by_name.remove(previous.name());
        }
        self.by_name.insert(self.by_id[&id].name.clone(), id);
        previous
    }

    /// Change the weight of type `id`, keeping its access sets.
    ///
    /// Graphs built earlier keep the old weight. Returns `false` when the
    /// type is unknown or already has that weight.
    pub fn reweigh(&mut self, id: InstrId, weight: u32) -> bool {
        let Some(entry) = self.by_id.get_mut(&id) else {
            return false;
        };
        if entry.weight == weight {
            return false;
        }
        Arc::make_mut(entry).weight = weight;
        true
    }

    /// Semantics of type `id`.
    #[must_use]
    pub fn get(&self, id: InstrId) -> Option<&Arc<TypeSemantics>> {
        self.by_id.get(&id)
    }

    /// Semantics of the type called `name`.
    #[must_use]
    pub fn get_by_name(&self, name: &str) -> Option<&Arc<TypeSemantics>> {
        self.by_name.get(name).and_then(|id| self.by_id.get(id))
    }

    /// Number of registered types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// `true` when nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Registered types in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<TypeSemantics>> {
        self.by_id.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::num::NonZeroU16;

    fn iid(x: u16) -> InstrId {
        NonZeroU16::new(x).unwrap()
    }

    #[test]
    fn lookup_by_id_and_name() {
        let mut registry = SemanticRegistry::new();
        registry.register(TypeSemantics::new(iid(1), "osc", AccessSets::new(), 3));
        registry.register(TypeSemantics::new(
            iid(2),
            "reverb",
            AccessSets::new().reads(["gasend"]),
            7,
        ));
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get(iid(2)).unwrap().name(), "reverb");
        assert_eq!(registry.get_by_name("osc").unwrap().weight(), 3);
        assert!(registry.get(iid(3)).is_none());
    }

    #[test]
    fn re_registering_replaces_name() {
        let mut registry = SemanticRegistry::new();
        registry.register(TypeSemantics::new(iid(1), "old", AccessSets::new(), 1));
        let previous = registry.register(TypeSemantics::new(iid(1), "new", AccessSets::new(), 2));
        assert_eq!(previous.unwrap().name(), "old");
        assert!(registry.get_by_name("old").is_none());
        assert_eq!(registry.get_by_name("new").unwrap().weight(), 2);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn reweigh_leaves_shared_copies_alone() {
        let mut registry = SemanticRegistry::new();
        registry.register(TypeSemantics::new(iid(1), "osc", AccessSets::new().reads(["gk"]), 5));
        let before = registry.get(iid(1)).unwrap().clone();
        assert!(registry.reweigh(iid(1), 40));
        assert!(!registry.reweigh(iid(1), 40));
        assert!(!registry.reweigh(iid(9), 1));
        assert_eq!(before.weight(), 5);
        let after = registry.get_by_name("osc").unwrap();
        assert_eq!(after.weight(), 40);
        assert_eq!(after.access(), before.access());
    }
}
