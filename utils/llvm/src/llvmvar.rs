use std::fmt::Display;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum VarType {
	I32,
	I64,
	F32,
	Ptr,
	Void,
}

impl Display for VarType {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		match self {
			Self::I32 => write!(f, "i32"),
			Self::I64 => write!(f, "i64"),
			Self::F32 => write!(f, "float"),
			Self::Ptr => write!(f, "ptr"),
			Self::Void => write!(f, "void"),
		}
	}
}

impl VarType {
	pub fn is_int(&self) -> bool {
		matches!(self, Self::I32 | Self::I64)
	}
	pub fn bit_width(&self) -> u32 {
		match self {
			Self::I32 => 32,
			Self::I64 | Self::Ptr => 64,
			Self::F32 => 32,
			Self::Void => 0,
		}
	}
	/// The wider of two integer types.
	pub fn widest(self, other: VarType) -> VarType {
		if self.bit_width() >= other.bit_width() {
			self
		} else {
			other
		}
	}
}
