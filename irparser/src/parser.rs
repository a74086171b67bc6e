use std::collections::HashMap;

use pest::{iterators::Pair, Parser};
use pest_derive::Parser;

use flow::prelude::*;
use llvm::{
	AllocInstr, ArithInstr, ArithOp, CallInstr, CallPtrInstr, CompInstr,
	CompKind, CompOp, ConvertInstr, ConvertOp, GEPInstr, GlobalVar, JumpCondInstr,
	JumpInstr, LlvmInstr, LoadInstr, PhiInstr, RetInstr, StoreInstr, Temp,
	UnreachableInstr, Value, VarType,
};
use utils::{errors::Result, to_label, CintrError, Label};

#[derive(Parser)]
#[grammar = "llvmir.pest"]
struct IrParser;

pub fn parse(src: &str) -> Result<Program> {
	let mut pairs = IrParser::parse(Rule::Program, src)
		.map_err(|e| CintrError::SyntaxError(e.to_string()))?;
	let program_pair = pairs.next().unwrap();

	let mut program = Program::default();
	let mut max_temp = 0u32;
	for item in program_pair.into_inner() {
		match item.as_rule() {
			Rule::GlobalDef => program.global_vars.push(parse_global(item)),
			Rule::FuncDecl => program.decls.push(parse_decl(item)),
			Rule::FuncDef => {
				let func = parse_func(item, &mut max_temp)?;
				program.funcs.push(func);
			}
			Rule::EOI => {}
			_ => unreachable!(),
		}
	}
	program.temp_mgr.total = max_temp;
	Ok(program)
}

fn parse_type(pair: Pair<Rule>) -> VarType {
	match pair.as_str() {
		"i32" => VarType::I32,
		"i64" => VarType::I64,
		"float" => VarType::F32,
		"ptr" => VarType::Ptr,
		"void" => VarType::Void,
		_ => unreachable!(),
	}
}

fn strip_sigil(s: &str) -> &str {
	&s[1..]
}

fn parse_value(pair: Pair<Rule>, var_type: VarType) -> Value {
	let inner = pair.into_inner().next().unwrap();
	match inner.as_rule() {
		Rule::Float => Value::Float(inner.as_str().parse().unwrap()),
		Rule::Int => {
			let v: i64 = inner.as_str().parse().unwrap();
			if var_type == VarType::I64 {
				Value::Int64(v)
			} else {
				Value::Int(v as i32)
			}
		}
		Rule::TempName => Value::Temp(Temp::new(
			strip_sigil(inner.as_str()),
			var_type,
			false,
		)),
		Rule::GlobalName => Value::Temp(Temp::new(
			strip_sigil(inner.as_str()),
			var_type,
			true,
		)),
		_ => unreachable!(),
	}
}

fn parse_global(pair: Pair<Rule>) -> GlobalVar {
	let mut name = String::new();
	let mut var_type = VarType::I32;
	let mut init = 0;
	let mut thread_local = false;
	let mut is_extern = false;
	for item in pair.into_inner() {
		match item.as_rule() {
			Rule::GlobalName => name = strip_sigil(item.as_str()).to_string(),
			Rule::External => is_extern = true,
			Rule::ThreadLocal => thread_local = true,
			Rule::Type => var_type = parse_type(item),
			Rule::Int => init = item.as_str().parse().unwrap(),
			_ => unreachable!(),
		}
	}
	GlobalVar {
		name,
		var_type,
		init,
		thread_local,
		is_extern,
	}
}

fn parse_decl(pair: Pair<Rule>) -> FuncDecl {
	let mut inner = pair.into_inner();
	let ret_type = parse_type(inner.next().unwrap());
	let name = strip_sigil(inner.next().unwrap().as_str()).to_string();
	let params = inner
		.next()
		.map(|list| list.into_inner().map(parse_type).collect())
		.unwrap_or_default();
	FuncDecl {
		name,
		ret_type,
		params,
	}
}

fn track_temp(name: &str, max_temp: &mut u32) {
	if let Some(rest) = name.strip_prefix('t') {
		if let Ok(n) = rest.parse::<u32>() {
			*max_temp = (*max_temp).max(n);
		}
	}
}

fn parse_func(pair: Pair<Rule>, max_temp: &mut u32) -> Result<Func> {
	let mut inner = pair.into_inner();
	let ret_type = parse_type(inner.next().unwrap());
	let name = strip_sigil(inner.next().unwrap().as_str()).to_string();

	let mut params = Vec::new();
	let mut blocks_src = Vec::new();
	for item in inner {
		match item.as_rule() {
			Rule::ParamList => {
				for param in item.into_inner() {
					let mut p = param.into_inner();
					let ty = parse_type(p.next().unwrap());
					let pname = strip_sigil(p.next().unwrap().as_str());
					track_temp(pname, max_temp);
					params.push(Value::Temp(Temp::new(pname, ty, false)));
				}
			}
			Rule::Block => blocks_src.push(item),
			_ => unreachable!(),
		}
	}

	// labels are normalized to B<id> block names
	let mut label_map: HashMap<Label, Label> = HashMap::new();
	let mut nodes = Vec::new();
	for (idx, block) in blocks_src.iter().enumerate() {
		let id = idx as i32 + 1;
		let label = block
			.clone()
			.into_inner()
			.next()
			.unwrap()
			.into_inner()
			.next()
			.unwrap();
		let orig = Label::new(strip_sigil(label.as_str()));
		if label_map.insert(orig.clone(), to_label(id)).is_some() {
			return Err(CintrError::SyntaxError(format!(
				"duplicate label {} in @{}",
				orig, name
			)));
		}
		nodes.push(BasicBlock::new_node(id, 1.0));
	}

	for (idx, block) in blocks_src.into_iter().enumerate() {
		let node = &nodes[idx];
		for item in block.into_inner() {
			match item.as_rule() {
				Rule::LabelDef => {}
				Rule::Instr => {
					let instr = item.into_inner().next().unwrap();
					match instr.as_rule() {
						Rule::Phi => {
							node.borrow_mut().push_phi(parse_phi(instr, max_temp))
						}
						_ => {
							let built = parse_instr(instr, max_temp)?;
							node.borrow_mut().push(built);
						}
					}
				}
				Rule::Term => {
					let built = parse_term(item.into_inner().next().unwrap(), max_temp);
					node.borrow_mut().set_jump(Some(built));
				}
				_ => unreachable!(),
			}
		}
		node.borrow_mut().map_label(&label_map);
	}

	// wire distinct successor edges from the terminators
	let by_label: HashMap<Label, Node> =
		nodes.iter().map(|n| (n.borrow().label(), n.clone())).collect();
	for node in nodes.iter() {
		let labels = node.borrow().term_labels();
		for label in labels {
			let target = by_label.get(&label).ok_or_else(|| {
				CintrError::SyntaxError(format!(
					"unknown branch target {} in @{}",
					label, name
				))
			})?;
			let exists = node
				.borrow()
				.succ
				.iter()
				.any(|v| v.borrow().id == target.borrow().id);
			if !exists {
				force_link_node(node, target);
			}
		}
	}

	let mut cfg = CFG { blocks: nodes };
	cfg.resolve_prev();
	Ok(Func::new(cfg, name, ret_type, params))
}

fn parse_phi(pair: Pair<Rule>, max_temp: &mut u32) -> PhiInstr {
	let mut inner = pair.into_inner();
	let target_name = strip_sigil(inner.next().unwrap().as_str());
	track_temp(target_name, max_temp);
	let var_type = parse_type(inner.next().unwrap());
	let source = inner
		.map(|src| {
			let mut s = src.into_inner();
			let value = parse_value(s.next().unwrap(), var_type);
			let label = Label::new(strip_sigil(s.next().unwrap().as_str()));
			(value, label)
		})
		.collect();
	PhiInstr {
		target: Temp::new(target_name, var_type, false),
		var_type,
		source,
	}
}

fn parse_instr(pair: Pair<Rule>, max_temp: &mut u32) -> Result<LlvmInstr> {
	match pair.as_rule() {
		Rule::Arith => {
			let mut inner = pair.into_inner();
			let target = strip_sigil(inner.next().unwrap().as_str()).to_string();
			track_temp(&target, max_temp);
			let op = parse_arith_op(inner.next().unwrap().as_str());
			let var_type = parse_type(inner.next().unwrap());
			let lhs = parse_value(inner.next().unwrap(), var_type);
			let rhs = parse_value(inner.next().unwrap(), var_type);
			Ok(Box::new(ArithInstr {
				target: Temp::new(target, var_type, false),
				op,
				var_type,
				lhs,
				rhs,
			}))
		}
		Rule::Comp => {
			let mut inner = pair.into_inner();
			let target = strip_sigil(inner.next().unwrap().as_str()).to_string();
			track_temp(&target, max_temp);
			let kind = match inner.next().unwrap().as_str() {
				"icmp" => CompKind::Icmp,
				_ => CompKind::Fcmp,
			};
			let op = parse_comp_op(inner.next().unwrap().as_str());
			let var_type = parse_type(inner.next().unwrap());
			let lhs = parse_value(inner.next().unwrap(), var_type);
			let rhs = parse_value(inner.next().unwrap(), var_type);
			Ok(Box::new(CompInstr {
				kind,
				target: Temp::new(target, VarType::I32, false),
				op,
				var_type,
				lhs,
				rhs,
			}))
		}
		Rule::Convert => {
			let mut inner = pair.into_inner();
			let target = strip_sigil(inner.next().unwrap().as_str()).to_string();
			track_temp(&target, max_temp);
			let op = match inner.next().unwrap().as_str() {
				"zext" => ConvertOp::Zext,
				"sext" => ConvertOp::Sext,
				"trunc" => ConvertOp::Trunc,
				"sitofp" => ConvertOp::Int2Float,
				_ => ConvertOp::Float2Int,
			};
			let from_type = parse_type(inner.next().unwrap());
			let lhs = parse_value(inner.next().unwrap(), from_type);
			let to_type = parse_type(inner.next().unwrap());
			Ok(Box::new(ConvertInstr {
				target: Temp::new(target, to_type, false),
				op,
				from_type,
				to_type,
				lhs,
			}))
		}
		Rule::Alloc => {
			let mut inner = pair.into_inner();
			let target = strip_sigil(inner.next().unwrap().as_str()).to_string();
			track_temp(&target, max_temp);
			let var_type = parse_type(inner.next().unwrap());
			let len_type = parse_type(inner.next().unwrap());
			let length = parse_value(inner.next().unwrap(), len_type);
			Ok(Box::new(AllocInstr {
				target: Temp::new(target, VarType::Ptr, false),
				var_type,
				length,
			}))
		}
		Rule::Store => {
			let mut inner = pair.into_inner();
			let var_type = parse_type(inner.next().unwrap());
			let value = parse_value(inner.next().unwrap(), var_type);
			let addr = parse_value(inner.next().unwrap(), VarType::Ptr);
			Ok(Box::new(StoreInstr { value, addr }))
		}
		Rule::Load => {
			let mut inner = pair.into_inner();
			let target = strip_sigil(inner.next().unwrap().as_str()).to_string();
			track_temp(&target, max_temp);
			let var_type = parse_type(inner.next().unwrap());
			let addr = parse_value(inner.next().unwrap(), VarType::Ptr);
			Ok(Box::new(LoadInstr {
				target: Temp::new(target, var_type, false),
				var_type,
				addr,
			}))
		}
		Rule::Gep => {
			let mut inner = pair.into_inner();
			let target = strip_sigil(inner.next().unwrap().as_str()).to_string();
			track_temp(&target, max_temp);
			let var_type = parse_type(inner.next().unwrap());
			let addr = parse_value(inner.next().unwrap(), VarType::Ptr);
			let off_type = parse_type(inner.next().unwrap());
			let offset = parse_value(inner.next().unwrap(), off_type);
			Ok(Box::new(GEPInstr {
				target: Temp::new(target, VarType::Ptr, false),
				var_type,
				addr,
				offset,
			}))
		}
		Rule::Call => parse_call(pair, max_temp),
		_ => unreachable!(),
	}
}

fn parse_call(pair: Pair<Rule>, max_temp: &mut u32) -> Result<LlvmInstr> {
	let mut target = None;
	let mut var_type = VarType::Void;
	let mut callee = None;
	let mut params = Vec::new();
	for item in pair.into_inner() {
		match item.as_rule() {
			Rule::TempName => {
				target = Some(strip_sigil(item.as_str()).to_string());
			}
			Rule::Type => var_type = parse_type(item),
			Rule::Callee => callee = Some(item.into_inner().next().unwrap()),
			Rule::ArgList => {
				for arg in item.into_inner() {
					let mut a = arg.into_inner();
					let ty = parse_type(a.next().unwrap());
					let value = parse_value(a.next().unwrap(), ty);
					params.push((ty, value));
				}
			}
			_ => unreachable!(),
		}
	}
	if let Some(t) = &target {
		track_temp(t, max_temp);
	}
	let target = Temp::new(target.unwrap_or_else(|| "_".to_string()), var_type,
		false);
	let callee = callee.unwrap();
	match callee.as_rule() {
		Rule::GlobalName => Ok(Box::new(CallInstr {
			target,
			var_type,
			func: Label::new(strip_sigil(callee.as_str())),
			params,
		})),
		Rule::TempName => Ok(Box::new(CallPtrInstr {
			target,
			var_type,
			func: Value::Temp(Temp::new(
				strip_sigil(callee.as_str()),
				VarType::Ptr,
				false,
			)),
			params,
		})),
		_ => unreachable!(),
	}
}

fn parse_term(pair: Pair<Rule>, max_temp: &mut u32) -> LlvmInstr {
	match pair.as_rule() {
		Rule::Jump => {
			let label = pair.into_inner().next().unwrap();
			JumpInstr::new(Label::new(strip_sigil(label.as_str())))
		}
		Rule::JumpCond => {
			let mut inner = pair.into_inner();
			let var_type = parse_type(inner.next().unwrap());
			let cond = parse_value(inner.next().unwrap(), var_type);
			if let Some(t) = cond.unwrap_temp() {
				track_temp(&t.name, max_temp);
			}
			let target_true = Label::new(strip_sigil(inner.next().unwrap().as_str()));
			let target_false =
				Label::new(strip_sigil(inner.next().unwrap().as_str()));
			Box::new(JumpCondInstr {
				var_type,
				cond,
				target_true,
				target_false,
			})
		}
		Rule::RetVoid => Box::new(RetInstr { value: None }),
		Rule::Ret => {
			let mut inner = pair.into_inner();
			let var_type = parse_type(inner.next().unwrap());
			let value = parse_value(inner.next().unwrap(), var_type);
			Box::new(RetInstr { value: Some(value) })
		}
		Rule::Unreachable => Box::new(UnreachableInstr {}),
		_ => unreachable!(),
	}
}

fn parse_arith_op(s: &str) -> ArithOp {
	match s {
		"add" => ArithOp::Add,
		"sub" => ArithOp::Sub,
		"mul" => ArithOp::Mul,
		"sdiv" => ArithOp::Div,
		"udiv" => ArithOp::UDiv,
		"srem" => ArithOp::Rem,
		"shl" => ArithOp::Shl,
		"lshr" => ArithOp::Lshr,
		"ashr" => ArithOp::Ashr,
		"and" => ArithOp::And,
		"or" => ArithOp::Or,
		"xor" => ArithOp::Xor,
		"fadd" => ArithOp::Fadd,
		"fsub" => ArithOp::Fsub,
		"fmul" => ArithOp::Fmul,
		"fdiv" => ArithOp::Fdiv,
		_ => unreachable!(),
	}
}

fn parse_comp_op(s: &str) -> CompOp {
	match s {
		"eq" => CompOp::EQ,
		"ne" => CompOp::NE,
		"sgt" => CompOp::SGT,
		"sge" => CompOp::SGE,
		"slt" => CompOp::SLT,
		"sle" => CompOp::SLE,
		"oeq" => CompOp::OEQ,
		"one" => CompOp::ONE,
		"ogt" => CompOp::OGT,
		"oge" => CompOp::OGE,
		"olt" => CompOp::OLT,
		"ole" => CompOp::OLE,
		_ => unreachable!(),
	}
}
