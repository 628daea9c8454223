use chrono::{DateTime, Utc};

/// An immutable fact decided by an aggregate and appended to its stream.
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// `<module>.<aggregate>.<what happened>`, e.g. `invoicing.invoice.issued`.
    /// Never renamed once events of that type are stored.
    fn event_type(&self) -> &'static str;

    /// Payload schema version. Bump when a stored shape changes.
    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc>;
}
