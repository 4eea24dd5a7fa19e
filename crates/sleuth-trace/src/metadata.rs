//! Static side information recorded alongside the event log.

use indexmap::{IndexMap, IndexSet};

use crate::event::{DataAddress, LocationId, ThreadId};

/// Location signatures, thread names and volatile addresses.
///
/// Lookups never fail: unknown ids render with a synthetic name so reports
/// stay readable for partially recorded metadata.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct Metadata {
    #[cfg_attr(feature = "serialize", serde(default))]
    pub locations: IndexMap<LocationId, String>,
    #[cfg_attr(feature = "serialize", serde(default))]
    pub threads: IndexMap<ThreadId, String>,
    #[cfg_attr(feature = "serialize", serde(default))]
    pub volatile: IndexSet<DataAddress>,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn location_signature(&self, id: LocationId) -> String {
        self.locations
            .get(&id)
            .cloned()
            .unwrap_or_else(|| format!("loc#{}", id.0))
    }

    pub fn thread_name(&self, id: ThreadId) -> String {
        self.threads
            .get(&id)
            .cloned()
            .unwrap_or_else(|| id.to_string())
    }

    pub fn is_volatile(&self, address: DataAddress) -> bool {
        self.volatile.contains(&address)
    }

    /// Return the id for `signature`, allocating the next free id on first use.
    pub fn intern_location(&mut self, signature: &str) -> LocationId {
        if let Some((id, _)) = self.locations.iter().find(|(_, s)| s.as_str() == signature) {
            return *id;
        }
        let next = self
            .locations
            .keys()
            .map(|id| id.0 + 1)
            .max()
            .unwrap_or(1);
        let id = LocationId(next);
        self.locations.insert(id, signature.to_string());
        id
    }

    pub fn name_thread(&mut self, id: ThreadId, name: impl Into<String>) {
        self.threads.insert(id, name.into());
    }

    pub fn mark_volatile(&mut self, address: DataAddress) {
        self.volatile.insert(address);
    }

    #[cfg(feature = "serialize")]
    pub fn from_json_str(source: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(source)
    }
}
