use std::collections::{BTreeSet, HashMap};

/// Which groups reference which doodad. A doodad is kept loaded as long as at least one group
/// references it.
#[derive(Debug, Default)]
pub struct DoodadReferences {
    groups_by_doodad: HashMap<u32, BTreeSet<u32>>,
}

impl DoodadReferences {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of groups referencing the doodad afterwards.
    pub fn add(&mut self, doodad: u32, group: u32) -> usize {
        let groups = self.groups_by_doodad.entry(doodad).or_default();
        groups.insert(group);
        groups.len()
    }

    /// Returns the number of groups still referencing the doodad, or `None` if the group did not
    /// reference it in the first place. Doodads without references are forgotten.
    pub fn remove(&mut self, doodad: u32, group: u32) -> Option<usize> {
        let groups = self.groups_by_doodad.get_mut(&doodad)?;
        if !groups.remove(&group) {
            return None;
        }

        let remaining = groups.len();
        if remaining == 0 {
            self.groups_by_doodad.remove(&doodad);
        }
        Some(remaining)
    }

    pub fn groups_for(&self, doodad: u32) -> Vec<u32> {
        self.groups_by_doodad
            .get(&doodad)
            .map(|groups| groups.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn doodads_for(&self, group: u32) -> Vec<u32> {
        let mut doodads: Vec<u32> = self
            .groups_by_doodad
            .iter()
            .filter(|(_, groups)| groups.contains(&group))
            .map(|(doodad, _)| *doodad)
            .collect();
        doodads.sort_unstable();
        doodads
    }

    pub fn reference_count(&self, doodad: u32) -> usize {
        self.groups_by_doodad.get(&doodad).map_or(0, BTreeSet::len)
    }

    pub fn len(&self) -> usize {
        self.groups_by_doodad.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups_by_doodad.is_empty()
    }

    pub fn clear(&mut self) {
        self.groups_by_doodad.clear();
    }
}

#[cfg(test)]
mod tests {
    use crate::world::doodad_references::DoodadReferences;

    #[test]
    pub fn tracks_shared_doodads() {
        let mut references = DoodadReferences::new();
        assert_eq!(references.add(7, 1), 1);
        assert_eq!(references.add(7, 2), 2);
        // the same group twice is still a single reference
        assert_eq!(references.add(7, 2), 2);
        assert_eq!(references.add(8, 2), 1);

        assert_eq!(references.groups_for(7), vec![1, 2]);
        assert_eq!(references.doodads_for(2), vec![7, 8]);

        assert_eq!(references.remove(7, 1), Some(1));
        assert_eq!(references.remove(7, 1), None);
        assert_eq!(references.remove(7, 2), Some(0));
        assert_eq!(references.reference_count(7), 0);
        assert!(references.groups_for(7).is_empty());
        assert_eq!(references.len(), 1);

        references.clear();
        assert!(references.is_empty());
        assert_eq!(references.remove(8, 2), None);
    }
}
