use std::{collections::HashMap, fmt::Display};

use crate::{llvmvar::VarType, temp::Temp};

#[derive(Clone, Debug, PartialEq)]
pub enum Value {
	Int(i32),
	Int64(i64),
	Float(f32),
	Temp(Temp),
	Void,
}

impl Value {
	pub fn get_type(&self) -> VarType {
		match self {
			Self::Int(_) => VarType::I32,
			Self::Int64(_) => VarType::I64,
			Self::Float(_) => VarType::F32,
			Self::Void => VarType::Void,
			Self::Temp(v) => v.var_type,
		}
	}
	pub fn is_const(&self) -> bool {
		!matches!(self, Self::Temp(_))
	}
	pub fn const_int(&self) -> Option<i64> {
		match self {
			Self::Int(v) => Some(*v as i64),
			Self::Int64(v) => Some(*v),
			_ => None,
		}
	}
	pub fn map_temp(&mut self, map: &HashMap<Temp, Value>) {
		if let Self::Temp(t) = self {
			if let Some(v) = map.get(t) {
				*self = v.clone();
			}
		}
	}
}

impl Display for Value {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		match self {
			Self::Int(v) => write!(f, "{}", v),
			Self::Int64(v) => write!(f, "{}", v),
			Self::Float(v) => write!(f, "{}", v),
			Self::Temp(v) => write!(f, "{}", v),
			Self::Void => write!(f, "void"),
		}
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArithOp {
	Add,
	Sub,
	Mul,
	Div,
	UDiv,
	Rem,
	Shl,
	Lshr,
	Ashr,
	And,
	Or,
	Xor,
	Fadd,
	Fsub,
	Fmul,
	Fdiv,
}

impl Display for ArithOp {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		let s = match self {
			Self::Add => "add",
			Self::Sub => "sub",
			Self::Mul => "mul",
			Self::Div => "sdiv",
			Self::UDiv => "udiv",
			Self::Rem => "srem",
			Self::Shl => "shl",
			Self::Lshr => "lshr",
			Self::Ashr => "ashr",
			Self::And => "and",
			Self::Or => "or",
			Self::Xor => "xor",
			Self::Fadd => "fadd",
			Self::Fsub => "fsub",
			Self::Fmul => "fmul",
			Self::Fdiv => "fdiv",
		};
		write!(f, "{}", s)
	}
}

impl ArithOp {
	pub fn is_float(&self) -> bool {
		matches!(self, Self::Fadd | Self::Fsub | Self::Fmul | Self::Fdiv)
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompKind {
	Icmp,
	Fcmp,
}

impl Display for CompKind {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		match self {
			Self::Icmp => write!(f, "icmp"),
			Self::Fcmp => write!(f, "fcmp"),
		}
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompOp {
	EQ,
	NE,
	SGT,
	SGE,
	SLT,
	SLE,
	OEQ,
	ONE,
	OGT,
	OGE,
	OLT,
	OLE,
}

impl Display for CompOp {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		let s = match self {
			Self::EQ => "eq",
			Self::NE => "ne",
			Self::SGT => "sgt",
			Self::SGE => "sge",
			Self::SLT => "slt",
			Self::SLE => "sle",
			Self::OEQ => "oeq",
			Self::ONE => "one",
			Self::OGT => "ogt",
			Self::OGE => "oge",
			Self::OLT => "olt",
			Self::OLE => "ole",
		};
		write!(f, "{}", s)
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConvertOp {
	Zext,
	Sext,
	Trunc,
	Int2Float,
	Float2Int,
}

impl Display for ConvertOp {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		match self {
			Self::Zext => write!(f, "zext"),
			Self::Sext => write!(f, "sext"),
			Self::Trunc => write!(f, "trunc"),
			Self::Int2Float => write!(f, "sitofp"),
			Self::Float2Int => write!(f, "fptosi"),
		}
	}
}
