use std::sync::atomic::{AtomicBool, Ordering};

use log::{trace, warn};

use crate::format::DecodeError;
use crate::format::m2::M2Description;
use crate::format::wmo::{DoodadDefinition, WmoGroupDescription, WmoRootDescription};
use crate::streaming::jobs::{JobKind, Payload};
use crate::streaming::resource::{ExternalHandle, StreamedResource, unexpected_payload};

/// The doodads of one doodad set. Groups reference doodads by their index into the root's whole
/// definition list, so lookups subtract the start of the set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DoodadSetSelection {
    pub name: String,
    pub start: u32,
    pub entries: Vec<DoodadDefinition>,
}

impl DoodadSetSelection {
    pub fn entry(&self, doodad_index: u32) -> Option<&DoodadDefinition> {
        let local = doodad_index.checked_sub(self.start)?;
        self.entries.get(local as usize)
    }

    pub fn contains(&self, doodad_index: u32) -> bool {
        self.entry(doodad_index).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub struct WmoRoot {
    key: String,
    handle: ExternalHandle,
    description: WmoRootDescription,
    disposed: AtomicBool,
}

impl WmoRoot {
    pub fn description(&self) -> &WmoRootDescription {
        &self.description
    }

    pub fn group_count(&self) -> u32 {
        self.description.group_count()
    }

    /// Group files are named after the root: `TOWER.WMO` has `TOWER_000.WMO`, `TOWER_001.WMO`, ...
    pub fn group_path(&self, index: u32) -> String {
        let stem = self.key.strip_suffix(".WMO").unwrap_or(&self.key);
        format!("{}_{:0>3}.WMO", stem, index)
    }

    pub fn doodad_set(&self, index: u16) -> DoodadSetSelection {
        let Some(set) = self.description.doodad_sets.get(index as usize) else {
            if !self.description.doodad_sets.is_empty() {
                warn!("{} has no doodad set {}, not loading any doodads", self.key, index);
            }
            return DoodadSetSelection::default();
        };

        let definitions = &self.description.doodad_definitions;
        let start = (set.start_index as usize).min(definitions.len());
        let end = (set.start_index as usize + set.count as usize).min(definitions.len());
        if end - start != set.count as usize {
            warn!(
                "Doodad set {} of {} exceeds the {} doodad definitions",
                set.name,
                self.key,
                definitions.len()
            );
        }

        trace!("Doodad Set: {} from {} to {}", set.name, start, end);
        DoodadSetSelection {
            name: set.name.clone(),
            start: start as u32,
            entries: definitions[start..end].to_vec(),
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }
}

impl StreamedResource for WmoRoot {
    const KIND: JobKind = JobKind::WmoRoot;

    fn from_payload(key: &str, payload: Payload) -> Result<Self, DecodeError> {
        match payload {
            Payload::WmoRoot(description) => Ok(Self {
                key: key.to_string(),
                handle: ExternalHandle::next(),
                description,
                disposed: AtomicBool::new(false),
            }),
            other => Err(unexpected_payload(Self::KIND, &other)),
        }
    }

    fn cache_key(&self) -> &str {
        &self.key
    }

    fn external_handle(&self) -> ExternalHandle {
        self.handle
    }

    fn dispose(&self) {
        self.disposed.store(true, Ordering::Release);
    }
}

pub struct WmoGroup {
    key: String,
    handle: ExternalHandle,
    index: u32,
    description: WmoGroupDescription,
    disposed: AtomicBool,
}

impl WmoGroup {
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn flags(&self) -> u32 {
        self.description.flags
    }

    pub fn vertex_count(&self) -> u32 {
        self.description.vertex_count
    }

    pub fn doodad_refs(&self) -> &[u16] {
        &self.description.doodad_refs
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }
}

impl StreamedResource for WmoGroup {
    const KIND: JobKind = JobKind::WmoGroup;

    fn from_payload(key: &str, payload: Payload) -> Result<Self, DecodeError> {
        match payload {
            Payload::WmoGroup { index, description } => Ok(Self {
                key: key.to_string(),
                handle: ExternalHandle::next(),
                index,
                description,
                disposed: AtomicBool::new(false),
            }),
            other => Err(unexpected_payload(Self::KIND, &other)),
        }
    }

    fn cache_key(&self) -> &str {
        &self.key
    }

    fn external_handle(&self) -> ExternalHandle {
        self.handle
    }

    fn dispose(&self) {
        self.disposed.store(true, Ordering::Release);
    }
}

pub struct M2Doodad {
    key: String,
    handle: ExternalHandle,
    description: M2Description,
    disposed: AtomicBool,
}

impl M2Doodad {
    pub fn name(&self) -> &str {
        &self.description.name
    }

    pub fn is_animated(&self) -> bool {
        self.description.animated
    }

    pub fn vertex_count(&self) -> u32 {
        self.description.vertex_count
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }
}

impl StreamedResource for M2Doodad {
    const KIND: JobKind = JobKind::M2;

    fn from_payload(key: &str, payload: Payload) -> Result<Self, DecodeError> {
        match payload {
            Payload::M2(description) => Ok(Self {
                key: key.to_string(),
                handle: ExternalHandle::next(),
                description,
                disposed: AtomicBool::new(false),
            }),
            other => Err(unexpected_payload(Self::KIND, &other)),
        }
    }

    fn cache_key(&self) -> &str {
        &self.key
    }

    fn external_handle(&self) -> ExternalHandle {
        self.handle
    }

    fn dispose(&self) {
        self.disposed.store(true, Ordering::Release);
    }
}
