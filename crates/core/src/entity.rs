//! Entity trait: identity + continuity across state changes.

/// Entity marker + minimal interface.
///
/// Used for the children owned by an aggregate (ledger entries, requirement
/// groups, alternatives) that are addressed by id inside their root.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier.
    fn id(&self) -> &Self::Id;
}

/// Find an entity by id in a slice.
pub fn find<'a, E: Entity>(entities: &'a [E], id: &E::Id) -> Option<&'a E> {
    entities.iter().find(|e| e.id() == id)
}

/// Find an entity by id in a mutable slice.
pub fn find_mut<'a, E: Entity>(entities: &'a mut [E], id: &E::Id) -> Option<&'a mut E> {
    entities.iter_mut().find(|e| e.id() == id)
}
