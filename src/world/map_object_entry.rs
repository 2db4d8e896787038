use glam::Vec3;

/// A placed map object, as the ADT/WDT placement records describe it.
#[derive(Debug, Clone, PartialEq)]
pub struct MapObjectEntry {
    /// Unique id of the placement, multiple placements of the same WMO are separate entries.
    pub id: u32,
    pub path: String,
    pub doodad_set: u16,
    pub position: Vec3,
    pub rotation: Vec3,
}

impl MapObjectEntry {
    pub fn new(id: u32, path: impl Into<String>) -> Self {
        Self {
            id,
            path: path.into(),
            doodad_set: 0,
            position: Vec3::ZERO,
            rotation: Vec3::ZERO,
        }
    }

    pub fn with_doodad_set(mut self, doodad_set: u16) -> Self {
        self.doodad_set = doodad_set;
        self
    }

    pub fn with_placement(mut self, position: Vec3, rotation: Vec3) -> Self {
        self.position = position;
        self.rotation = rotation;
        self
    }
}
