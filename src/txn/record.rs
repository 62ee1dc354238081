use super::Timestamp;

/// Per-key unit of truth: the stored payload plus commit-time metadata.
///
/// `value: None` is the absence marker. A record can hold it for two
/// reasons: the key has only ever been read (a metadata-only record), or
/// the last committed write was a removal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueRecord<V> {
    value: Option<V>,
    last_written: Option<Timestamp>,
    last_read: Option<Timestamp>,
}

impl<V> ValueRecord<V> {
    pub(crate) fn new(value: Option<V>) -> Self {
        Self {
            value,
            last_written: None,
            last_read: None,
        }
    }

    /// Record for a key that was read before any write ever committed.
    pub(crate) fn placeholder(read_at: Timestamp) -> Self {
        Self {
            value: None,
            last_written: None,
            last_read: Some(read_at),
        }
    }

    pub fn value(&self) -> Option<&V> {
        self.value.as_ref()
    }

    /// Tick of the most recent committed write, if any write ever landed.
    pub fn last_written(&self) -> Option<Timestamp> {
        self.last_written
    }

    /// Tick of the most recent committed read, if any read ever landed.
    pub fn last_read(&self) -> Option<Timestamp> {
        self.last_read
    }

    pub(crate) fn set_value(&mut self, value: Option<V>) {
        self.value = value;
    }

    pub(crate) fn set_last_written(&mut self, at: Timestamp) {
        self.last_written = Some(at);
    }

    pub(crate) fn set_last_read(&mut self, at: Timestamp) {
        self.last_read = Some(at);
    }
}
