use crate::{Event, EventEnvelope};

/// A projection folds an append-only event stream into derived state.
///
/// Projections must be **idempotent** and, for unordered feeds,
/// **commutative**: applying the same envelope twice, or a set of envelopes in
/// any order, must yield the same state. Derived state is disposable and can be
/// rebuilt by replaying the feeds.
pub trait Projection {
    type Ev: Event;

    /// Fold one envelope into the projection.
    ///
    /// Returns `true` when the envelope changed the current state of its
    /// entity (i.e. downstream consumers have something to recompute).
    fn apply(&mut self, envelope: &EventEnvelope<Self::Ev>) -> bool;
}
