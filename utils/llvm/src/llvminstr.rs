use std::{collections::HashMap, fmt::Display};

use utils::Label;

use crate::{llvmop::*, llvmvar::VarType, temp::Temp, LlvmInstrVariant};

pub trait LlvmInstrTrait: Display {
	fn get_read(&self) -> Vec<Temp> {
		Vec::new()
	}
	fn get_write(&self) -> Option<Temp> {
		None
	}
	fn map_temp(&mut self, _map: &HashMap<Temp, Value>) {}
	fn map_label(&mut self, _map: &HashMap<Label, Label>) {}
	fn is_call(&self) -> bool {
		false
	}
	fn is_ret(&self) -> bool {
		false
	}
	fn is_phi(&self) -> bool {
		false
	}
	fn is_load(&self) -> bool {
		false
	}
	fn is_store(&self) -> bool {
		false
	}
	fn is_term(&self) -> bool {
		false
	}
	fn is_unreachable(&self) -> bool {
		false
	}
	fn is_direct_jump(&self) -> bool {
		false
	}
	/// Callee name for direct calls, jump target for direct jumps.
	fn get_label(&self) -> Label {
		unreachable!("instruction carries no label")
	}
	/// Successor labels of a terminator, duplicates preserved.
	fn target_labels(&self) -> Vec<Label> {
		Vec::new()
	}
	fn get_variant(&self) -> LlvmInstrVariant;
	fn clone_box(&self) -> LlvmInstr;
}

pub type LlvmInstr = Box<dyn LlvmInstrTrait>;

impl Clone for LlvmInstr {
	fn clone(&self) -> Self {
		self.clone_box()
	}
}

#[derive(Clone)]
pub struct ArithInstr {
	pub target: Temp,
	pub op: ArithOp,
	pub var_type: VarType,
	pub lhs: Value,
	pub rhs: Value,
}

#[derive(Clone)]
pub struct CompInstr {
	pub kind: CompKind,
	pub target: Temp,
	pub op: CompOp,
	pub var_type: VarType,
	pub lhs: Value,
	pub rhs: Value,
}

#[derive(Clone)]
pub struct ConvertInstr {
	pub target: Temp,
	pub op: ConvertOp,
	pub from_type: VarType,
	pub to_type: VarType,
	pub lhs: Value,
}

#[derive(Clone)]
pub struct JumpInstr {
	pub target: Label,
}

#[derive(Clone)]
pub struct JumpCondInstr {
	pub var_type: VarType,
	pub cond: Value,
	pub target_true: Label,
	pub target_false: Label,
}

#[derive(Clone)]
pub struct PhiInstr {
	pub target: Temp,
	pub var_type: VarType,
	pub source: Vec<(Value, Label)>,
}

#[derive(Clone)]
pub struct RetInstr {
	pub value: Option<Value>,
}

#[derive(Clone)]
pub struct UnreachableInstr {}

#[derive(Clone)]
pub struct AllocInstr {
	pub target: Temp,
	pub var_type: VarType,
	pub length: Value,
}

#[derive(Clone)]
pub struct StoreInstr {
	pub value: Value,
	pub addr: Value,
}

#[derive(Clone)]
pub struct LoadInstr {
	pub target: Temp,
	pub var_type: VarType,
	pub addr: Value,
}

#[derive(Clone)]
pub struct GEPInstr {
	pub target: Temp,
	pub var_type: VarType,
	pub addr: Value,
	pub offset: Value,
}

#[derive(Clone)]
pub struct CallInstr {
	pub target: Temp,
	pub var_type: VarType,
	pub func: Label,
	pub params: Vec<(VarType, Value)>,
}

/// Call through a function pointer.
#[derive(Clone)]
pub struct CallPtrInstr {
	pub target: Temp,
	pub var_type: VarType,
	pub func: Value,
	pub params: Vec<(VarType, Value)>,
}

impl JumpInstr {
	pub fn new(target: Label) -> LlvmInstr {
		Box::new(JumpInstr { target })
	}
}

impl PhiInstr {
	pub fn new(target: Temp, source: Vec<(Value, Label)>) -> Self {
		Self {
			var_type: target.var_type,
			target,
			source,
		}
	}
}
