use chrono::{DateTime, Utc};

/// A business fact recorded by an aggregate.
///
/// Never mutated once appended; new facts supersede old ones.
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Dotted name, `<module>.<aggregate>.<fact>` (e.g. `"inventory.stock.consumed"`).
    fn event_type(&self) -> &'static str;

    /// Payload schema version; bump when the serialized shape changes.
    fn version(&self) -> u32;

    /// Business time, taken from the command that produced the event.
    fn occurred_at(&self) -> DateTime<Utc>;
}
