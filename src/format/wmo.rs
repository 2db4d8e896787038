use std::collections::HashMap;
use std::io::{Seek, SeekFrom};

use byteorder::{LittleEndian, ReadBytesExt};
use glam::{Quat, Vec3};

use crate::format::{
    DecodeError, IffChunk, find_chunk, fourcc, get_mandatory_chunk, read_chunks, read_fixed_string, read_records,
    read_string_table,
};

pub const MVER: u32 = fourcc(b"MVER");
pub const MOHD: u32 = fourcc(b"MOHD");
pub const MOGI: u32 = fourcc(b"MOGI");
pub const MODS: u32 = fourcc(b"MODS");
pub const MODN: u32 = fourcc(b"MODN");
pub const MODD: u32 = fourcc(b"MODD");
pub const MOGP: u32 = fourcc(b"MOGP");
pub const MOVT: u32 = fourcc(b"MOVT");
pub const MODR: u32 = fourcc(b"MODR");

pub const WMO_VERSION: u32 = 17;

pub const GROUP_FLAG_EXTERIOR: u32 = 0x8;
pub const GROUP_FLAG_INTERIOR: u32 = 0x2000;

/// size_of the MOGP header, the group's sub chunks follow right after it.
pub const MOGP_HEADER_SIZE: usize = 0x44;

const MOGI_RECORD_SIZE: usize = 32;
const MODS_RECORD_SIZE: usize = 32;
const MODD_RECORD_SIZE: usize = 40;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DoodadSet {
    pub name: String,
    pub start_index: u32,
    pub count: u32,
}

/// https://wowdev.wiki/WMO#MODD_chunk
#[derive(Debug, Clone, PartialEq)]
pub struct DoodadDefinition {
    /// Already mapped to the `.m2` extension.
    pub name: String,
    pub flags: u8,
    pub position: Vec3,
    pub orientation: Quat,
    pub scale: f32,
    pub color: u32,
}

impl DoodadDefinition {
    /// Particle emitters are placed like doodads but aren't models that could be loaded.
    pub fn is_emitter(&self) -> bool {
        self.name.to_lowercase().contains("emitter")
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WmoRootDescription {
    pub group_flags: Vec<u32>,
    pub interior_group_indices: Vec<u32>,
    pub exterior_group_indices: Vec<u32>,
    pub doodad_sets: Vec<DoodadSet>,
    pub doodad_definitions: Vec<DoodadDefinition>,
}

impl WmoRootDescription {
    pub fn new(group_flags: Vec<u32>, doodad_sets: Vec<DoodadSet>, doodad_definitions: Vec<DoodadDefinition>) -> Self {
        let (interior, exterior): (Vec<_>, Vec<_>) = (0..group_flags.len() as u32)
            .partition(|&index| group_flags[index as usize] & GROUP_FLAG_INTERIOR != 0);

        Self {
            group_flags,
            interior_group_indices: interior,
            exterior_group_indices: exterior,
            doodad_sets,
            doodad_definitions,
        }
    }

    pub fn group_count(&self) -> u32 {
        self.group_flags.len() as u32
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WmoGroupDescription {
    pub flags: u32,
    pub vertex_count: u32,
    /// Indices into the root's MODD, not relative to any doodad set.
    pub doodad_refs: Vec<u16>,
}

/// WMO doodads are still referenced by their pre-release extension, the shipped models are `.m2`.
pub fn doodad_model_name(name: &str) -> String {
    let upper = name.to_uppercase();
    if upper.ends_with(".MDX") || upper.ends_with(".MDL") {
        format!("{}.m2", &name[..name.len() - 4])
    } else {
        name.to_string()
    }
}

fn check_version(chunks: &[IffChunk]) -> Result<(), DecodeError> {
    // TODO: We don't necessarily have MVER as the first chunk, we don't need to depend on that.
    let Some(version_hdr) = chunks.first() else {
        return Err(DecodeError::FormatError { reason: "Empty file" });
    };

    if version_hdr.magic != MVER {
        return Err(DecodeError::InvalidMagicValue {
            magic: version_hdr.magic,
        });
    }

    if version_hdr.reader().read_u32::<LittleEndian>()? != WMO_VERSION {
        return Err(DecodeError::FormatError {
            reason: "Unknown MVER Version",
        });
    }

    Ok(())
}

pub fn decode_root(data: &[u8]) -> Result<WmoRootDescription, DecodeError> {
    let chunks = read_chunks(data)?;
    check_version(&chunks)?;

    let mut mohd = get_mandatory_chunk(&chunks, MOHD, "MOHD")?.reader();
    let _texture_count = mohd.read_u32::<LittleEndian>()?;
    let group_count = mohd.read_u32::<LittleEndian>()?;

    let mogi = get_mandatory_chunk(&chunks, MOGI, "MOGI")?;
    let group_flags = read_records(mogi, MOGI_RECORD_SIZE, |rdr| {
        let flags = rdr.read_u32::<LittleEndian>()?;
        rdr.seek(SeekFrom::Current(MOGI_RECORD_SIZE as i64 - 4))?; // bounding box, name offset
        Ok(flags)
    })?;

    if group_flags.len() != group_count as usize {
        return Err(DecodeError::FormatError {
            reason: "MOGI does not describe MOHD.nGroups groups",
        });
    }

    let doodad_sets = find_chunk(&chunks, MODS)
        .map(|chunk| {
            read_records(chunk, MODS_RECORD_SIZE, |rdr| {
                let name = read_fixed_string(rdr, 0x14)?;
                let start_index = rdr.read_u32::<LittleEndian>()?;
                let count = rdr.read_u32::<LittleEndian>()?;
                let _padding = rdr.read_u32::<LittleEndian>()?;
                Ok(DoodadSet {
                    name,
                    start_index,
                    count,
                })
            })
        })
        .transpose()?
        .unwrap_or_default();

    let doodad_names: HashMap<u32, String> = find_chunk(&chunks, MODN)
        .map(|chunk| read_string_table(chunk.data))
        .transpose()?
        .unwrap_or_default()
        .into_iter()
        .collect();

    let doodad_definitions = find_chunk(&chunks, MODD)
        .map(|chunk| {
            read_records(chunk, MODD_RECORD_SIZE, |rdr| {
                let name_and_flags = rdr.read_u32::<LittleEndian>()?;
                let name_index = name_and_flags & 0x00FF_FFFF;
                let name = doodad_names
                    .get(&name_index)
                    .map(|name| doodad_model_name(name))
                    .ok_or(DecodeError::FormatError {
                        reason: "MODD references an unknown MODN offset",
                    })?;

                Ok(DoodadDefinition {
                    name,
                    flags: ((name_and_flags & 0xFF00_0000) >> 24) as u8,
                    position: Vec3::new(
                        rdr.read_f32::<LittleEndian>()?,
                        rdr.read_f32::<LittleEndian>()?,
                        rdr.read_f32::<LittleEndian>()?,
                    ),
                    orientation: Quat::from_xyzw(
                        rdr.read_f32::<LittleEndian>()?,
                        rdr.read_f32::<LittleEndian>()?,
                        rdr.read_f32::<LittleEndian>()?,
                        rdr.read_f32::<LittleEndian>()?,
                    ),
                    scale: rdr.read_f32::<LittleEndian>()?,
                    color: rdr.read_u32::<LittleEndian>()?,
                })
            })
        })
        .transpose()?
        .unwrap_or_default();

    Ok(WmoRootDescription::new(
        group_flags,
        doodad_sets,
        doodad_definitions,
    ))
}

pub fn decode_group(data: &[u8]) -> Result<WmoGroupDescription, DecodeError> {
    let chunks = read_chunks(data)?;
    check_version(&chunks)?;

    let mogp = get_mandatory_chunk(&chunks, MOGP, "MOGP")?;
    if mogp.data.len() < MOGP_HEADER_SIZE {
        return Err(DecodeError::FormatError {
            reason: "MOGP is smaller than its header",
        });
    }

    let mut header = mogp.reader();
    header.seek(SeekFrom::Start(8))?; // groupName, descriptiveGroupName
    let flags = header.read_u32::<LittleEndian>()?;

    // the group's chunks are nested inside of MOGP
    let sub_chunks = read_chunks(&mogp.data[MOGP_HEADER_SIZE..])?;

    let vertex_count = find_chunk(&sub_chunks, MOVT)
        .map(|movt| read_records(movt, 12, |rdr| Ok(rdr.seek(SeekFrom::Current(12))?)))
        .transpose()?
        .map(|vertices| vertices.len() as u32)
        .unwrap_or(0);

    let doodad_refs = find_chunk(&sub_chunks, MODR)
        .map(|modr| read_records(modr, 2, |rdr| Ok(rdr.read_u16::<LittleEndian>()?)))
        .transpose()?
        .unwrap_or_default();

    Ok(WmoGroupDescription {
        flags,
        vertex_count,
        doodad_refs,
    })
}
