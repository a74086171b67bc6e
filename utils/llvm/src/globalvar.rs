use std::fmt::Display;

use crate::llvmvar::VarType;

/// A module-level scalar variable, enough to carry the runtime clock
/// state the instrumented code refers to.
#[derive(Clone, Debug, PartialEq)]
pub struct GlobalVar {
	pub name: String,
	pub var_type: VarType,
	pub init: i64,
	pub thread_local: bool,
	pub is_extern: bool,
}

impl GlobalVar {
	pub fn new(name: impl ToString, var_type: VarType, init: i64) -> Self {
		Self {
			name: name.to_string(),
			var_type,
			init,
			thread_local: false,
			is_extern: false,
		}
	}
	pub fn thread_local(mut self) -> Self {
		self.thread_local = true;
		self
	}
	pub fn external(mut self) -> Self {
		self.is_extern = true;
		self
	}
}

impl Display for GlobalVar {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		let tls = if self.thread_local {
			"thread_local "
		} else {
			""
		};
		if self.is_extern {
			write!(f, "@{} = external {}global {}", self.name, tls, self.var_type)
		} else {
			write!(
				f,
				"@{} = {}global {} {}",
				self.name, tls, self.var_type, self.init
			)
		}
	}
}
