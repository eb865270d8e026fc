use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::codec::{CodecError, Reader, Writer};

pub const RESOURCE_TABLE_MAGIC: &[u8; 4] = b"PRES";

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Texture,
    Model,
    Sound,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 3] = [
        ResourceKind::Texture,
        ResourceKind::Model,
        ResourceKind::Sound,
    ];

    pub fn label(self) -> &'static str {
        match self {
            ResourceKind::Texture => "texture",
            ResourceKind::Model => "model",
            ResourceKind::Sound => "sound",
        }
    }

    fn slot(self) -> usize {
        match self {
            ResourceKind::Texture => 0,
            ResourceKind::Model => 1,
            ResourceKind::Sound => 2,
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Flat name to index mapping. Each kind has its own dense index space,
/// assigned in sorted name order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResourceTable {
    names: [Vec<String>; 3],
}

impl ResourceTable {
    pub fn from_names<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (ResourceKind, S)>,
        S: Into<String>,
    {
        let mut sets: [BTreeSet<String>; 3] = Default::default();
        for (kind, name) in entries {
            sets[kind.slot()].insert(name.into());
        }
        Self {
            names: sets.map(|set| set.into_iter().collect()),
        }
    }

    pub fn index(&self, kind: ResourceKind, name: &str) -> Option<u32> {
        self.names[kind.slot()]
            .binary_search_by(|entry| entry.as_str().cmp(name))
            .ok()
            .map(|index| index as u32)
    }

    pub fn names(&self, kind: ResourceKind) -> &[String] {
        &self.names[kind.slot()]
    }

    pub fn len(&self) -> usize {
        self.names.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let mut writer = Writer::with_header(RESOURCE_TABLE_MAGIC);
        for kind in ResourceKind::ALL {
            let names = self.names(kind);
            writer.count(kind.label(), names.len())?;
            for name in names {
                writer.string(name)?;
            }
        }
        Ok(writer.into_bytes())
    }

    pub fn decode(data: &[u8]) -> Result<Self, CodecError> {
        let mut reader = Reader::with_header(data, RESOURCE_TABLE_MAGIC)?;
        let mut table = ResourceTable::default();
        for kind in ResourceKind::ALL {
            let count = reader.count(kind.label(), 2)?;
            let mut names = Vec::with_capacity(count);
            for _ in 0..count {
                names.push(reader.string()?);
            }
            table.names[kind.slot()] = names;
        }
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indices_follow_sorted_names_per_kind() {
        let table = ResourceTable::from_names([
            (ResourceKind::Texture, "stone"),
            (ResourceKind::Sound, "boom"),
            (ResourceKind::Texture, "grass"),
            (ResourceKind::Texture, "grass"),
        ]);
        assert_eq!(table.index(ResourceKind::Texture, "grass"), Some(0));
        assert_eq!(table.index(ResourceKind::Texture, "stone"), Some(1));
        assert_eq!(table.index(ResourceKind::Sound, "boom"), Some(0));
        assert_eq!(table.index(ResourceKind::Model, "boom"), None);
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn table_stream_is_stable() {
        let table = ResourceTable::from_names([
            (ResourceKind::Model, "barrel"),
            (ResourceKind::Texture, "wood"),
        ]);
        let bytes = table.encode().expect("encode");
        assert_eq!(ResourceTable::decode(&bytes).expect("decode"), table);
    }
}
