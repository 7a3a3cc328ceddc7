/// Immutable, timestamped sets of connection descriptors
use super::ConnectionDescriptor;
use crate::utils::monotonic_millis;
use serde::Serialize;

/// The descriptors resolved by one lookup
///
/// Never modified after construction. The routing cache hands these out as
/// `Arc<ConnectionDescriptors>`, and callers may compare pointers to detect
/// that nothing changed since their last call.
#[derive(Debug, Serialize)]
pub struct ConnectionDescriptors {
    descriptors: Vec<ConnectionDescriptor>,
    /// Milliseconds since the epoch, strictly increasing across instances
    timestamp: u64,
}

impl ConnectionDescriptors {
    pub fn new(descriptors: Vec<ConnectionDescriptor>) -> Self {
        Self {
            descriptors,
            timestamp: monotonic_millis(),
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn descriptors(&self) -> &[ConnectionDescriptor] {
        &self.descriptors
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ConnectionDescriptor> {
        self.descriptors.iter()
    }

    /// True when `other` lists the same endpoints in the same order
    pub fn same_endpoints(&self, other: &[ConnectionDescriptor]) -> bool {
        self.descriptors.as_slice() == other
    }
}

impl<'a> IntoIterator for &'a ConnectionDescriptors {
    type Item = &'a ConnectionDescriptor;
    type IntoIter = std::slice::Iter<'a, ConnectionDescriptor>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
