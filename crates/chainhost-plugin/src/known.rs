//! The list of plugins the host knows how to instantiate.

use serde::{Deserialize, Serialize};

use crate::PluginDescriptor;

/// Descriptors registered with the host, in registration order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnownPluginList {
    types: Vec<PluginDescriptor>,
}

impl KnownPluginList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a descriptor. Returns false if one with the same
    /// `file_or_identifier` and format is already present.
    pub fn add(&mut self, descriptor: PluginDescriptor) -> bool {
        let exists = self.types.iter().any(|d| {
            d.file_or_identifier == descriptor.file_or_identifier && d.format == descriptor.format
        });
        if exists {
            return false;
        }
        self.types.push(descriptor);
        true
    }

    pub fn remove(&mut self, file_or_identifier: &str) -> Option<PluginDescriptor> {
        let index = self
            .types
            .iter()
            .position(|d| d.file_or_identifier == file_or_identifier)?;
        Some(self.types.remove(index))
    }

    /// First descriptor registered under `file_or_identifier`.
    pub fn find_by_identifier(&self, file_or_identifier: &str) -> Option<&PluginDescriptor> {
        self.types
            .iter()
            .find(|d| d.file_or_identifier == file_or_identifier)
    }

    /// Drop every descriptor that cannot take part in a stereo chain.
    ///
    /// Returns the number of descriptors removed.
    pub fn retain_stereo_capable(&mut self) -> usize {
        let before = self.types.len();
        self.types.retain(PluginDescriptor::is_stereo_capable);
        before - self.types.len()
    }

    pub fn types(&self) -> &[PluginDescriptor] {
        &self.types
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

impl FromIterator<PluginDescriptor> for KnownPluginList {
    fn from_iter<I: IntoIterator<Item = PluginDescriptor>>(iter: I) -> Self {
        let mut list = Self::new();
        for descriptor in iter {
            list.add(descriptor);
        }
        list
    }
}
