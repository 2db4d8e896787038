use std::io::{Cursor, Seek, SeekFrom};

use byteorder::{LittleEndian, ReadBytesExt};

use crate::format::DecodeError;

pub const MD20_MAGIC: u32 = u32::from_le_bytes(*b"MD20");

/// Wrath of the Lich King. Older versions carry an additional playable animation lookup and
/// animation tracks with an additional ranges array.
pub const VERSION_WOTLK: u32 = 264;

const BONE_SIZE_WOTLK: u64 = 88;
const BONE_SIZE_LEGACY: u64 = 108;
const TRACK_SIZE_WOTLK: u64 = 20;
const TRACK_SIZE_LEGACY: u64 = 28;
/// key_bone_id, flags, parent_bone, submesh_id and, since wotlk, the bone name crc
const BONE_TRACKS_OFFSET_WOTLK: u64 = 16;
const BONE_TRACKS_OFFSET_LEGACY: u64 = 12;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct M2Array {
    count: u32,
    offset: u32,
}

impl M2Array {
    fn parse(rdr: &mut Cursor<&[u8]>) -> Result<Self, DecodeError> {
        Ok(Self {
            count: rdr.read_u32::<LittleEndian>()?,
            offset: rdr.read_u32::<LittleEndian>()?,
        })
    }

    /// Ensures that `count` elements of `element_size` starting at `offset` are within the buffer.
    fn check_bounds(&self, data_len: usize, element_size: u64) -> Result<(), DecodeError> {
        let end = self.offset as u64 + self.count as u64 * element_size;
        if end > data_len as u64 {
            return Err(DecodeError::FormatError {
                reason: "M2Array points outside of the file",
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct M2Description {
    pub name: String,
    pub version: u32,
    pub sequence_count: u32,
    pub bone_count: u32,
    pub vertex_count: u32,
    /// Whether any bone has keyframes, meaning the doodad needs to be ticked by the animation
    /// system.
    pub animated: bool,
}

pub fn decode_m2(data: &[u8]) -> Result<M2Description, DecodeError> {
    let mut rdr = Cursor::new(data);
    let magic = rdr.read_u32::<LittleEndian>()?;
    if magic != MD20_MAGIC {
        return Err(DecodeError::InvalidMagicValue { magic });
    }

    let version = rdr.read_u32::<LittleEndian>()?;
    let name = M2Array::parse(&mut rdr)?;
    let _global_flags = rdr.read_u32::<LittleEndian>()?;
    let _global_loops = M2Array::parse(&mut rdr)?;
    let sequences = M2Array::parse(&mut rdr)?;
    let _sequence_lookup = M2Array::parse(&mut rdr)?;
    if version < VERSION_WOTLK {
        let _playable_animation_lookup = M2Array::parse(&mut rdr)?;
    }
    let bones = M2Array::parse(&mut rdr)?;
    let _key_bone_lookup = M2Array::parse(&mut rdr)?;
    let vertices = M2Array::parse(&mut rdr)?;

    name.check_bounds(data.len(), 1)?;
    let name_bytes = &data[name.offset as usize..(name.offset + name.count) as usize];
    let name_len = name_bytes
        .iter()
        .position(|&byte| byte == 0)
        .unwrap_or(name_bytes.len());
    let name = String::from_utf8(name_bytes[..name_len].to_vec())?;

    let (bone_size, tracks_offset, track_size) = if version < VERSION_WOTLK {
        (BONE_SIZE_LEGACY, BONE_TRACKS_OFFSET_LEGACY, TRACK_SIZE_LEGACY)
    } else {
        (BONE_SIZE_WOTLK, BONE_TRACKS_OFFSET_WOTLK, TRACK_SIZE_WOTLK)
    };
    bones.check_bounds(data.len(), bone_size)?;

    let mut animated = false;
    for bone in 0..bones.count as u64 {
        let bone_start = bones.offset as u64 + bone * bone_size;
        // translation, rotation, scale
        for track in 0..3 {
            // interpolation_type, global_sequence and the legacy ranges precede the timestamps
            let timestamps_offset = bone_start + tracks_offset + track * track_size + (track_size - 16);
            rdr.seek(SeekFrom::Start(timestamps_offset))?;
            if M2Array::parse(&mut rdr)?.count > 0 {
                animated = true;
            }
        }
    }

    Ok(M2Description {
        name,
        version,
        sequence_count: sequences.count,
        bone_count: bones.count,
        vertex_count: vertices.count,
        animated,
    })
}
