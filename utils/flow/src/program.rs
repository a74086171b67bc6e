use std::fmt::Display;

use llvm::{GlobalVar, TempManager};

use crate::func::{Func, FuncDecl};

pub struct Program {
	pub global_vars: Vec<GlobalVar>,
	pub decls: Vec<FuncDecl>,
	pub funcs: Vec<Func>,
	pub temp_mgr: TempManager,
}

impl Program {
	pub fn new(temp_mgr: TempManager) -> Self {
		Self {
			global_vars: Vec::new(),
			decls: Vec::new(),
			funcs: Vec::new(),
			temp_mgr,
		}
	}
	pub fn get_func(&self, name: &str) -> Option<&Func> {
		self.funcs.iter().find(|f| f.name == name)
	}
	pub fn is_defined(&self, name: &str) -> bool {
		self.funcs.iter().any(|f| f.name == name)
	}
}

impl Default for Program {
	fn default() -> Self {
		Self::new(TempManager::new())
	}
}

impl Display for Program {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		for item in self.global_vars.iter() {
			writeln!(f, "{}", item)?;
		}
		for item in self.decls.iter() {
			writeln!(f, "{}", item)?;
		}
		for func in self.funcs.iter() {
			writeln!(f, "{}", func)?;
		}
		Ok(())
	}
}
