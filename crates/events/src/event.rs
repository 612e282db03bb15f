/// A raw activity event.
///
/// Events are:
/// - **immutable** (treat them as facts)
/// - **keyed** (many events may update the same entity)
/// - designed to be **append-only**
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable event name/type identifier (e.g. "activity.shipment").
    fn event_type(&self) -> &'static str;

    /// Key of the entity this event updates.
    fn entity_key(&self) -> &str;

    /// Event time exactly as it appeared in the feed (not yet normalized).
    fn raw_event_time(&self) -> &str;
}
