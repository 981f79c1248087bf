use lattice_serde::{read_vle, write_vle, BitReader, BitWriter, Serde, SerdeErr};

use crate::ids::EntityId;

/// Bitfield selecting where an entity action executes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExecType(u8);

impl ExecType {
    pub const LOCAL: ExecType = ExecType(1);
    pub const SERVER: ExecType = ExecType(2);
    pub const PEERS: ExecType = ExecType(4);

    pub fn from_bits(bits: u8) -> Self {
        Self(bits & 0b111)
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn contains(self, other: ExecType) -> bool {
        self.0 & other.0 != 0
    }

    pub fn without(self, other: ExecType) -> Self {
        Self(self.0 & !other.0)
    }

    pub fn union(self, other: ExecType) -> Self {
        Self(self.0 | other.0)
    }
}

/// Entity-action replication message (id 120).
#[derive(Clone, Debug, PartialEq)]
pub struct EntityActionMsg {
    pub entity_id: EntityId,
    pub name: String,
    pub exec_type: ExecType,
    pub params: Vec<String>,
}

impl EntityActionMsg {
    pub fn write(&self) -> Vec<u8> {
        let mut writer = BitWriter::new();
        self.entity_id.ser(&mut writer);
        self.name.ser(&mut writer);
        self.exec_type.bits().ser(&mut writer);
        write_vle(&mut writer, self.params.len() as u32);
        for param in &self.params {
            param.ser(&mut writer);
        }
        writer.to_bytes()
    }

    pub fn read(reader: &mut BitReader) -> Result<Self, SerdeErr> {
        let entity_id = u32::de(reader)?;
        let name = String::de(reader)?;
        let exec_type = ExecType::from_bits(u8::de(reader)?);
        let count = read_vle(reader)?;
        let mut params = Vec::with_capacity(count as usize);
        for _ in 0..count {
            params.push(String::de(reader)?);
        }
        Ok(Self {
            entity_id,
            name,
            exec_type,
            params,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_round_trips() {
        let msg = EntityActionMsg {
            entity_id: 42,
            name: "Open".into(),
            exec_type: ExecType::SERVER.union(ExecType::PEERS),
            params: vec!["door1".into(), "fast".into()],
        };
        let bytes = msg.write();
        let mut reader = BitReader::new(&bytes);
        assert_eq!(EntityActionMsg::read(&mut reader).unwrap(), msg);
    }

    #[test]
    fn exec_type_bit_ops() {
        let t = ExecType::from_bits(7);
        assert!(t.contains(ExecType::LOCAL));
        let stripped = t.without(ExecType::LOCAL);
        assert!(!stripped.contains(ExecType::LOCAL));
        assert!(stripped.contains(ExecType::PEERS));
    }
}
