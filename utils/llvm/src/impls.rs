use std::{collections::HashMap, fmt::Display};

use utils::Label;

use crate::{llvminstr::*, llvmop::Value, temp::Temp, LlvmInstrVariant};

fn read_of(values: &[&Value]) -> Vec<Temp> {
	values.iter().filter_map(|v| v.unwrap_temp()).collect()
}

impl Display for ArithInstr {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		write!(
			f,
			"{} = {} {} {}, {}",
			self.target, self.op, self.var_type, self.lhs, self.rhs
		)
	}
}

impl LlvmInstrTrait for ArithInstr {
	fn get_read(&self) -> Vec<Temp> {
		read_of(&[&self.lhs, &self.rhs])
	}
	fn get_write(&self) -> Option<Temp> {
		Some(self.target.clone())
	}
	fn map_temp(&mut self, map: &HashMap<Temp, Value>) {
		self.lhs.map_temp(map);
		self.rhs.map_temp(map);
	}
	fn get_variant(&self) -> LlvmInstrVariant {
		LlvmInstrVariant::ArithInstr(self)
	}
	fn clone_box(&self) -> LlvmInstr {
		Box::new(self.clone())
	}
}

impl Display for CompInstr {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		write!(
			f,
			"{} = {} {} {} {}, {}",
			self.target, self.kind, self.op, self.var_type, self.lhs, self.rhs
		)
	}
}

impl LlvmInstrTrait for CompInstr {
	fn get_read(&self) -> Vec<Temp> {
		read_of(&[&self.lhs, &self.rhs])
	}
	fn get_write(&self) -> Option<Temp> {
		Some(self.target.clone())
	}
	fn map_temp(&mut self, map: &HashMap<Temp, Value>) {
		self.lhs.map_temp(map);
		self.rhs.map_temp(map);
	}
	fn get_variant(&self) -> LlvmInstrVariant {
		LlvmInstrVariant::CompInstr(self)
	}
	fn clone_box(&self) -> LlvmInstr {
		Box::new(self.clone())
	}
}

impl Display for ConvertInstr {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		write!(
			f,
			"{} = {} {} {} to {}",
			self.target, self.op, self.from_type, self.lhs, self.to_type
		)
	}
}

impl LlvmInstrTrait for ConvertInstr {
	fn get_read(&self) -> Vec<Temp> {
		read_of(&[&self.lhs])
	}
	fn get_write(&self) -> Option<Temp> {
		Some(self.target.clone())
	}
	fn map_temp(&mut self, map: &HashMap<Temp, Value>) {
		self.lhs.map_temp(map);
	}
	fn get_variant(&self) -> LlvmInstrVariant {
		LlvmInstrVariant::ConvertInstr(self)
	}
	fn clone_box(&self) -> LlvmInstr {
		Box::new(self.clone())
	}
}

impl Display for JumpInstr {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		write!(f, "br label {}", self.target)
	}
}

impl LlvmInstrTrait for JumpInstr {
	fn map_label(&mut self, map: &HashMap<Label, Label>) {
		if let Some(new) = map.get(&self.target) {
			self.target = new.clone();
		}
	}
	fn is_term(&self) -> bool {
		true
	}
	fn is_direct_jump(&self) -> bool {
		true
	}
	fn get_label(&self) -> Label {
		self.target.clone()
	}
	fn target_labels(&self) -> Vec<Label> {
		vec![self.target.clone()]
	}
	fn get_variant(&self) -> LlvmInstrVariant {
		LlvmInstrVariant::JumpInstr(self)
	}
	fn clone_box(&self) -> LlvmInstr {
		Box::new(self.clone())
	}
}

impl Display for JumpCondInstr {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		write!(
			f,
			"br {} {}, label {}, label {}",
			self.var_type, self.cond, self.target_true, self.target_false
		)
	}
}

impl LlvmInstrTrait for JumpCondInstr {
	fn get_read(&self) -> Vec<Temp> {
		read_of(&[&self.cond])
	}
	fn map_temp(&mut self, map: &HashMap<Temp, Value>) {
		self.cond.map_temp(map);
	}
	fn map_label(&mut self, map: &HashMap<Label, Label>) {
		if let Some(new) = map.get(&self.target_true) {
			self.target_true = new.clone();
		}
		if let Some(new) = map.get(&self.target_false) {
			self.target_false = new.clone();
		}
	}
	fn is_term(&self) -> bool {
		true
	}
	fn target_labels(&self) -> Vec<Label> {
		vec![self.target_true.clone(), self.target_false.clone()]
	}
	fn get_variant(&self) -> LlvmInstrVariant {
		LlvmInstrVariant::JumpCondInstr(self)
	}
	fn clone_box(&self) -> LlvmInstr {
		Box::new(self.clone())
	}
}

impl Display for PhiInstr {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		let source = self
			.source
			.iter()
			.map(|(v, l)| format!("[{}, {}]", v, l))
			.collect::<Vec<_>>()
			.join(", ");
		write!(f, "{} = phi {} {}", self.target, self.var_type, source)
	}
}

impl LlvmInstrTrait for PhiInstr {
	fn get_read(&self) -> Vec<Temp> {
		self.source.iter().filter_map(|(v, _)| v.unwrap_temp()).collect()
	}
	fn get_write(&self) -> Option<Temp> {
		Some(self.target.clone())
	}
	fn map_temp(&mut self, map: &HashMap<Temp, Value>) {
		for (v, _) in self.source.iter_mut() {
			v.map_temp(map);
		}
	}
	fn map_label(&mut self, map: &HashMap<Label, Label>) {
		for (_, l) in self.source.iter_mut() {
			if let Some(new) = map.get(l) {
				*l = new.clone();
			}
		}
	}
	fn is_phi(&self) -> bool {
		true
	}
	fn get_variant(&self) -> LlvmInstrVariant {
		LlvmInstrVariant::PhiInstr(self)
	}
	fn clone_box(&self) -> LlvmInstr {
		Box::new(self.clone())
	}
}

impl Display for RetInstr {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		match &self.value {
			Some(v) => write!(f, "ret {} {}", v.get_type(), v),
			None => write!(f, "ret void"),
		}
	}
}

impl LlvmInstrTrait for RetInstr {
	fn get_read(&self) -> Vec<Temp> {
		self.value.iter().filter_map(|v| v.unwrap_temp()).collect()
	}
	fn map_temp(&mut self, map: &HashMap<Temp, Value>) {
		if let Some(v) = self.value.as_mut() {
			v.map_temp(map);
		}
	}
	fn is_term(&self) -> bool {
		true
	}
	fn is_ret(&self) -> bool {
		true
	}
	fn get_variant(&self) -> LlvmInstrVariant {
		LlvmInstrVariant::RetInstr(self)
	}
	fn clone_box(&self) -> LlvmInstr {
		Box::new(self.clone())
	}
}

impl Display for UnreachableInstr {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		write!(f, "unreachable")
	}
}

impl LlvmInstrTrait for UnreachableInstr {
	fn is_term(&self) -> bool {
		true
	}
	fn is_unreachable(&self) -> bool {
		true
	}
	fn get_variant(&self) -> LlvmInstrVariant {
		LlvmInstrVariant::UnreachableInstr(self)
	}
	fn clone_box(&self) -> LlvmInstr {
		Box::new(self.clone())
	}
}

impl Display for AllocInstr {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		write!(
			f,
			"{} = alloca {}, {} {}",
			self.target,
			self.var_type,
			self.length.get_type(),
			self.length
		)
	}
}

impl LlvmInstrTrait for AllocInstr {
	fn get_read(&self) -> Vec<Temp> {
		read_of(&[&self.length])
	}
	fn get_write(&self) -> Option<Temp> {
		Some(self.target.clone())
	}
	fn map_temp(&mut self, map: &HashMap<Temp, Value>) {
		self.length.map_temp(map);
	}
	fn get_variant(&self) -> LlvmInstrVariant {
		LlvmInstrVariant::AllocInstr(self)
	}
	fn clone_box(&self) -> LlvmInstr {
		Box::new(self.clone())
	}
}

impl Display for StoreInstr {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		write!(
			f,
			"store {} {}, ptr {}",
			self.value.get_type(),
			self.value,
			self.addr
		)
	}
}

impl LlvmInstrTrait for StoreInstr {
	fn get_read(&self) -> Vec<Temp> {
		read_of(&[&self.value, &self.addr])
	}
	fn map_temp(&mut self, map: &HashMap<Temp, Value>) {
		self.value.map_temp(map);
		self.addr.map_temp(map);
	}
	fn is_store(&self) -> bool {
		true
	}
	fn get_variant(&self) -> LlvmInstrVariant {
		LlvmInstrVariant::StoreInstr(self)
	}
	fn clone_box(&self) -> LlvmInstr {
		Box::new(self.clone())
	}
}

impl Display for LoadInstr {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		write!(
			f,
			"{} = load {}, ptr {}",
			self.target, self.var_type, self.addr
		)
	}
}

impl LlvmInstrTrait for LoadInstr {
	fn get_read(&self) -> Vec<Temp> {
		read_of(&[&self.addr])
	}
	fn get_write(&self) -> Option<Temp> {
		Some(self.target.clone())
	}
	fn map_temp(&mut self, map: &HashMap<Temp, Value>) {
		self.addr.map_temp(map);
	}
	fn is_load(&self) -> bool {
		true
	}
	fn get_variant(&self) -> LlvmInstrVariant {
		LlvmInstrVariant::LoadInstr(self)
	}
	fn clone_box(&self) -> LlvmInstr {
		Box::new(self.clone())
	}
}

impl Display for GEPInstr {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		write!(
			f,
			"{} = getelementptr {}, ptr {}, {} {}",
			self.target,
			self.var_type,
			self.addr,
			self.offset.get_type(),
			self.offset
		)
	}
}

impl LlvmInstrTrait for GEPInstr {
	fn get_read(&self) -> Vec<Temp> {
		read_of(&[&self.addr, &self.offset])
	}
	fn get_write(&self) -> Option<Temp> {
		Some(self.target.clone())
	}
	fn map_temp(&mut self, map: &HashMap<Temp, Value>) {
		self.addr.map_temp(map);
		self.offset.map_temp(map);
	}
	fn get_variant(&self) -> LlvmInstrVariant {
		LlvmInstrVariant::GEPInstr(self)
	}
	fn clone_box(&self) -> LlvmInstr {
		Box::new(self.clone())
	}
}

fn format_params(params: &[(crate::VarType, Value)]) -> String {
	params
		.iter()
		.map(|(t, v)| format!("{} {}", t, v))
		.collect::<Vec<_>>()
		.join(", ")
}

impl Display for CallInstr {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		if self.var_type == crate::VarType::Void {
			write!(
				f,
				"call void @{}({})",
				self.func.name,
				format_params(&self.params)
			)
		} else {
			write!(
				f,
				"{} = call {} @{}({})",
				self.target,
				self.var_type,
				self.func.name,
				format_params(&self.params)
			)
		}
	}
}

impl LlvmInstrTrait for CallInstr {
	fn get_read(&self) -> Vec<Temp> {
		self.params.iter().filter_map(|(_, v)| v.unwrap_temp()).collect()
	}
	fn get_write(&self) -> Option<Temp> {
		(self.var_type != crate::VarType::Void).then(|| self.target.clone())
	}
	fn map_temp(&mut self, map: &HashMap<Temp, Value>) {
		for (_, v) in self.params.iter_mut() {
			v.map_temp(map);
		}
	}
	fn is_call(&self) -> bool {
		true
	}
	fn get_label(&self) -> Label {
		self.func.clone()
	}
	fn get_variant(&self) -> LlvmInstrVariant {
		LlvmInstrVariant::CallInstr(self)
	}
	fn clone_box(&self) -> LlvmInstr {
		Box::new(self.clone())
	}
}

impl Display for CallPtrInstr {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		if self.var_type == crate::VarType::Void {
			write!(f, "call void {}({})", self.func, format_params(&self.params))
		} else {
			write!(
				f,
				"{} = call {} {}({})",
				self.target,
				self.var_type,
				self.func,
				format_params(&self.params)
			)
		}
	}
}

impl LlvmInstrTrait for CallPtrInstr {
	fn get_read(&self) -> Vec<Temp> {
		let mut read: Vec<_> =
			self.params.iter().filter_map(|(_, v)| v.unwrap_temp()).collect();
		read.extend(self.func.unwrap_temp());
		read
	}
	fn get_write(&self) -> Option<Temp> {
		(self.var_type != crate::VarType::Void).then(|| self.target.clone())
	}
	fn map_temp(&mut self, map: &HashMap<Temp, Value>) {
		self.func.map_temp(map);
		for (_, v) in self.params.iter_mut() {
			v.map_temp(map);
		}
	}
	fn is_call(&self) -> bool {
		true
	}
	fn get_variant(&self) -> LlvmInstrVariant {
		LlvmInstrVariant::CallPtrInstr(self)
	}
	fn clone_box(&self) -> LlvmInstr {
		Box::new(self.clone())
	}
}
