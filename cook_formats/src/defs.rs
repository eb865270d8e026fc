//! Compiled class and fragment definitions. Resource references are
//! indices into the resource table; `-1` marks an absent optional slot.
use crate::codec::{CodecError, Reader, Writer};

pub const CLASS_MAGIC: &[u8; 4] = b"PCLS";
pub const FRAGMENT_MAGIC: &[u8; 4] = b"PFRG";

#[derive(Clone, Debug, PartialEq)]
pub struct TaggedClass {
    pub name: String,
    pub model: Option<u32>,
    pub health: f32,
    pub textures: Vec<u32>,
    pub sounds: Vec<u32>,
    /// Indices into the sorted fragment definition list.
    pub fragments: Vec<u32>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TaggedFragment {
    pub name: String,
    pub model: Option<u32>,
    pub texture: Option<u32>,
    pub sound: Option<u32>,
    pub mass: f32,
}

impl TaggedClass {
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let mut writer = Writer::with_header(CLASS_MAGIC);
        writer.string(&self.name)?;
        writer.i32(optional_index(self.model));
        writer.f32(self.health);
        for (what, list) in [
            ("texture", &self.textures),
            ("sound", &self.sounds),
            ("fragment", &self.fragments),
        ] {
            writer.count(what, list.len())?;
            for index in list {
                writer.u32(*index);
            }
        }
        Ok(writer.into_bytes())
    }

    pub fn decode(data: &[u8]) -> Result<Self, CodecError> {
        let mut reader = Reader::with_header(data, CLASS_MAGIC)?;
        let name = reader.string()?;
        let model = read_optional_index(&mut reader)?;
        let health = reader.f32()?;
        let mut lists: [Vec<u32>; 3] = Default::default();
        for (list, what) in lists.iter_mut().zip(["texture", "sound", "fragment"]) {
            let count = reader.count(what, 4)?;
            for _ in 0..count {
                list.push(reader.u32()?);
            }
        }
        let [textures, sounds, fragments] = lists;
        Ok(Self {
            name,
            model,
            health,
            textures,
            sounds,
            fragments,
        })
    }
}

impl TaggedFragment {
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let mut writer = Writer::with_header(FRAGMENT_MAGIC);
        writer.string(&self.name)?;
        writer.i32(optional_index(self.model));
        writer.i32(optional_index(self.texture));
        writer.i32(optional_index(self.sound));
        writer.f32(self.mass);
        Ok(writer.into_bytes())
    }

    pub fn decode(data: &[u8]) -> Result<Self, CodecError> {
        let mut reader = Reader::with_header(data, FRAGMENT_MAGIC)?;
        Ok(Self {
            name: reader.string()?,
            model: read_optional_index(&mut reader)?,
            texture: read_optional_index(&mut reader)?,
            sound: read_optional_index(&mut reader)?,
            mass: reader.f32()?,
        })
    }
}

fn optional_index(index: Option<u32>) -> i32 {
    index.map(|value| value as i32).unwrap_or(-1)
}

fn read_optional_index(reader: &mut Reader<'_>) -> Result<Option<u32>, CodecError> {
    let value = reader.i32()?;
    Ok(u32::try_from(value).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_preserves_absent_model() {
        let class = TaggedClass {
            name: "barrel".to_string(),
            model: None,
            health: 25.0,
            textures: vec![2, 0],
            sounds: vec![1],
            fragments: vec![],
        };
        let bytes = class.encode().expect("encode");
        assert_eq!(TaggedClass::decode(&bytes).expect("decode"), class);
    }

    #[test]
    fn fragment_stream_uses_its_own_magic() {
        let fragment = TaggedFragment {
            name: "chunk".to_string(),
            model: Some(3),
            texture: None,
            sound: Some(0),
            mass: 0.5,
        };
        let bytes = fragment.encode().expect("encode");
        assert_eq!(TaggedFragment::decode(&bytes).expect("decode"), fragment);
        assert!(TaggedClass::decode(&bytes).is_err());
    }
}
