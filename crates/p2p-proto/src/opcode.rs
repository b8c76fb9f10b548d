use std::fmt;

use serde::{Deserialize, Serialize};

use super::Error;

pub const REQ_MAGIC: u32 = 0x001;
pub const RESP_MAGIC: u32 = 0x100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum OpCode {
	Discovery = 0,
	VbMasterCheck = 1,
	PeriodicPush = 2,
}

impl OpCode {
	pub const ALL: [Self; 3] = [Self::Discovery, Self::VbMasterCheck, Self::PeriodicPush];
}

impl TryFrom<u8> for OpCode {
	type Error = Error;

	fn try_from(value: u8) -> Result<Self, Self::Error> {
		match value {
			0 => Ok(Self::Discovery),
			1 => Ok(Self::VbMasterCheck),
			2 => Ok(Self::PeriodicPush),
			other => Err(Error::InvalidOpcode(other)),
		}
	}
}

impl From<OpCode> for u8 {
	fn from(opcode: OpCode) -> Self {
		opcode as Self
	}
}

impl fmt::Display for OpCode {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Discovery => f.write_str("Discovery"),
			Self::VbMasterCheck => f.write_str("VBMasterCheck"),
			Self::PeriodicPush => f.write_str("PeriodicPush"),
		}
	}
}
