use std::fmt::Display;

use llvm::{Value, VarType};
use utils::math::increment;

use crate::{basicblock::BasicBlock, cfg::CFG};

pub struct Func {
	pub cfg: CFG,
	pub name: String,
	pub ret_type: VarType,
	pub params: Vec<Value>,
	/// Highest basic-block id handed out so far.
	pub total: i32,
}

impl Func {
	pub fn new(
		cfg: CFG,
		name: String,
		ret_type: VarType,
		params: Vec<Value>,
	) -> Self {
		let total =
			cfg.blocks.iter().map(|v| v.borrow().id).max().unwrap_or(0);
		Self {
			cfg,
			name,
			ret_type,
			params,
			total,
		}
	}
	pub fn new_basicblock(&mut self, weight: f64) -> BasicBlock {
		BasicBlock::new(increment(&mut self.total), weight)
	}
}

impl Display for Func {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		let params = self
			.params
			.iter()
			.map(|v| format!("{} {}", v.get_type(), v))
			.collect::<Vec<_>>()
			.join(", ");
		let head = format!("define {} @{}({})", self.ret_type, self.name, params);
		let body = self
			.cfg
			.blocks
			.iter()
			.map(|v| v.borrow().to_string())
			.collect::<Vec<_>>()
			.join("\n");
		write!(f, "{} {{\n{}\n}}", head, body)
	}
}

/// A `declare`d external function signature.
pub struct FuncDecl {
	pub name: String,
	pub ret_type: VarType,
	pub params: Vec<VarType>,
}

impl Display for FuncDecl {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		let params = self
			.params
			.iter()
			.map(|v| v.to_string())
			.collect::<Vec<_>>()
			.join(", ");
		write!(f, "declare {} @{}({})", self.ret_type, self.name, params)
	}
}
