use std::{
	collections::{HashMap, HashSet},
	fs,
	path::Path,
	rc::Rc,
};

use flow::prelude::*;
use flow::scev::{scev_add, scev_mul, scev_udiv, Scev};
use llvm::{
	ArithInstr, ArithOp, ConvertInstr, ConvertOp, LlvmInstr,
	LlvmInstrTrait, LlvmInstrVariant::*, LlvmTemp, TempManager, Value,
	VarType,
};
use utils::{errors::Result, warning, CintrError};

use crate::{
	config::{InstrumentConfig, DEFAULT_FENCE_COST},
	cost::*,
};

/// Per-function cost record. The summary is filled once, after the
/// function is processed; `has_fence` is transitive over calls.
#[derive(Default, Clone)]
pub struct FuncCost {
	pub summary: Option<Cost>,
	pub has_fence: bool,
}

pub struct CostModel<'a> {
	pub config: &'a InstrumentConfig,
	pub lib_costs: &'a HashMap<String, i64>,
	pub summaries: &'a HashMap<String, FuncCost>,
	pub defined: &'a HashSet<String>,
	/// Recursive functions and thread entries: their cost is never
	/// credited to callers.
	pub no_credit: &'a HashSet<String>,
	pub ci_internal: &'a HashSet<String>,
}

impl<'a> CostModel<'a> {
	/// Base cost of one instruction in the enclosing function whose
	/// parameters are `params`.
	pub fn instr_cost(
		&self,
		instr: &LlvmInstr,
		params: &[LlvmTemp],
		scev: &ScevAnalysis,
	) -> Cost {
		let call_base = self.config.call_base_cost;
		match instr.get_variant() {
			PhiInstr(_) => cost_const(0),
			LoadInstr(_) | StoreInstr(_) => {
				cost_const(self.config.mem_ops_cost)
			}
			llvm::LlvmInstrVariant::ArithInstr(_)
			| llvm::LlvmInstrVariant::CompInstr(_)
			| llvm::LlvmInstrVariant::ConvertInstr(_) => {
				cost_const(self.config.arith_cost)
			}
			CallInstr(call) => {
				let name = call.func.name.as_str();
				if self.defined.contains(name) {
					if self.no_credit.contains(name) || self.ci_internal.contains(name)
					{
						return cost_const(call_base);
					}
					let args = call
						.params
						.iter()
						.map(|(_, v)| {
							scev_to_cost(&scev.scev_of(v), params)
						})
						.collect();
					let callee = cost_call(name.to_string(), args);
					// resolve the summary here; a summary this call site
					// cannot evaluate degrades to the bare call cost
					match self.simplify(&callee) {
						Some(c) if !c.is_unknown() => {
							cost_add(vec![cost_const(call_base), c])
						}
						_ => {
							warning(format!(
								"cost of @{} is not computable at a call site",
								name
							));
							cost_const(call_base)
						}
					}
				} else {
					let lib = self
						.lib_costs
						.get(name)
						.copied()
						.unwrap_or(self.config.ext_lib_cost);
					cost_const(call_base + lib)
				}
			}
			CallPtrInstr(_) => cost_const(call_base),
			_ => cost_const(1),
		}
	}

	/// No cost may be amortized across these: configured fence callees
	/// and calls into functions that transitively reach one.
	pub fn is_fence(&self, instr: &LlvmInstr) -> bool {
		if !instr.is_call() {
			return false;
		}
		match instr.get_variant() {
			CallInstr(call) => {
				let name = call.func.name.as_str();
				self.config.fences.contains(name)
					|| self
						.summaries
						.get(name)
						.map_or(false, |fc| fc.has_fence)
			}
			_ => false,
		}
	}

	/// The pass refuses to reason about a fence it has no cost for.
	pub fn fence_cost(&self, name: &str) -> Result<i64> {
		self.lib_costs.get(name).copied().ok_or_else(|| {
			CintrError::CostFileError(format!(
				"fence `{}` has no cost in the library table",
				name
			))
		})
	}

	/// Resolve `CallCost` nodes against the callee summaries. Returns
	/// `None` when substitution does not terminate within the nesting
	/// budget (the caller decides whether that is fatal).
	pub fn simplify(&self, cost: &Cost) -> Option<Cost> {
		self.simplify_depth(cost, 32)
	}

	fn simplify_depth(&self, cost: &Cost, depth: u32) -> Option<Cost> {
		if depth == 0 {
			return None;
		}
		Some(match &**cost {
			CostNode::CallCost { callee, args } => {
				let summary =
					self.summaries.get(callee).and_then(|fc| fc.summary.clone());
				match summary {
					Some(s) => {
						let args = args
							.iter()
							.map(|a| self.simplify_depth(a, depth - 1))
							.collect::<Option<Vec<_>>>()?;
						let bound = subst_args(&s, &args);
						self.simplify_depth(&bound, depth - 1)?
					}
					// the callee accounts for itself
					None => cost_const(0),
				}
			}
			CostNode::Add(ops) => cost_add(
				ops
					.iter()
					.map(|v| self.simplify_depth(v, depth - 1))
					.collect::<Option<Vec<_>>>()?,
			),
			CostNode::Mul(ops) => cost_mul(
				ops
					.iter()
					.map(|v| self.simplify_depth(v, depth - 1))
					.collect::<Option<Vec<_>>>()?,
			),
			CostNode::UDiv(l, r) => cost_udiv(
				self.simplify_depth(l, depth - 1)?,
				self.simplify_depth(r, depth - 1)?,
			),
			CostNode::Min { signed, ops } => cost_min(
				*signed,
				ops
					.iter()
					.map(|v| self.simplify_depth(v, depth - 1))
					.collect::<Option<Vec<_>>>()?,
			),
			CostNode::Max { signed, ops } => cost_max(
				*signed,
				ops
					.iter()
					.map(|v| self.simplify_depth(v, depth - 1))
					.collect::<Option<Vec<_>>>()?,
			),
			CostNode::Ext { signed, op } => {
				cost_ext(*signed, self.simplify_depth(op, depth - 1)?)
			}
			CostNode::Trunc(op) => {
				cost_trunc(self.simplify_depth(op, depth - 1)?)
			}
			CostNode::AddRec {
				start,
				step,
				header,
			} => cost_addrec(
				self.simplify_depth(start, depth - 1)?,
				self.simplify_depth(step, depth - 1)?,
				*header,
			),
			_ => cost.clone(),
		})
	}
}

fn subst_args(cost: &Cost, args: &[Cost]) -> Cost {
	match &**cost {
		CostNode::Arg(i) => {
			args.get(*i).cloned().unwrap_or_else(cost_unknown)
		}
		CostNode::Add(ops) => {
			cost_add(ops.iter().map(|v| subst_args(v, args)).collect())
		}
		CostNode::Mul(ops) => {
			cost_mul(ops.iter().map(|v| subst_args(v, args)).collect())
		}
		CostNode::UDiv(l, r) => {
			cost_udiv(subst_args(l, args), subst_args(r, args))
		}
		CostNode::Min { signed, ops } => cost_min(
			*signed,
			ops.iter().map(|v| subst_args(v, args)).collect(),
		),
		CostNode::Max { signed, ops } => cost_max(
			*signed,
			ops.iter().map(|v| subst_args(v, args)).collect(),
		),
		CostNode::Ext { signed, op } => {
			cost_ext(*signed, subst_args(op, args))
		}
		CostNode::Trunc(op) => cost_trunc(subst_args(op, args)),
		CostNode::AddRec {
			start,
			step,
			header,
		} => cost_addrec(
			subst_args(start, args),
			subst_args(step, args),
			*header,
		),
		CostNode::CallCost { callee, args: a } => cost_call(
			callee.clone(),
			a.iter().map(|v| subst_args(v, args)).collect(),
		),
		_ => cost.clone(),
	}
}

/// Translate a host scalar-evolution expression into the cost language.
/// Temporaries that are parameters of the enclosing function become
/// argument indices; any other opaque value becomes `unknown`.
pub fn scev_to_cost(scev: &Scev, params: &[LlvmTemp]) -> Cost {
	let conv = |v: &Scev| scev_to_cost(v, params);
	match scev {
		Scev::Const(v) => cost_const(*v),
		Scev::Unknown(t) => match params.iter().position(|p| p == t) {
			Some(i) => cost_arg(i),
			None => cost_unknown(),
		},
		Scev::Add(ops) => cost_add(ops.iter().map(conv).collect()),
		Scev::Mul(ops) => cost_mul(ops.iter().map(conv).collect()),
		Scev::UDiv(l, r) => cost_udiv(conv(l), conv(r)),
		Scev::SMax(ops) => cost_max(true, ops.iter().map(conv).collect()),
		Scev::SMin(ops) => cost_min(true, ops.iter().map(conv).collect()),
		Scev::UMax(ops) => cost_max(false, ops.iter().map(conv).collect()),
		Scev::UMin(ops) => cost_min(false, ops.iter().map(conv).collect()),
		Scev::ZExt(op) => cost_ext(false, conv(op)),
		Scev::SExt(op) => cost_ext(true, conv(op)),
		Scev::Trunc(op) => cost_trunc(conv(op)),
		Scev::AddRec {
			start,
			step,
			header,
		} => cost_addrec(conv(start), conv(step), *header),
		Scev::CouldNotCompute => cost_unknown(),
	}
}

/// Inverse of `scev_to_cost` under a binding of argument indices to the
/// caller-side evolutions.
pub fn cost_to_scev(cost: &Cost, args: &[Scev]) -> Scev {
	let conv = |v: &Cost| cost_to_scev(v, args);
	match &**cost {
		CostNode::Const(v) => Scev::Const(*v),
		CostNode::Arg(i) => {
			args.get(*i).cloned().unwrap_or(Scev::CouldNotCompute)
		}
		CostNode::Add(ops) => scev_add(ops.iter().map(conv).collect()),
		CostNode::Mul(ops) => scev_mul(ops.iter().map(conv).collect()),
		CostNode::UDiv(l, r) => scev_udiv(conv(l), conv(r)),
		CostNode::Min { signed: true, ops } => {
			Scev::SMin(ops.iter().map(conv).collect())
		}
		CostNode::Min { signed: false, ops } => {
			Scev::UMin(ops.iter().map(conv).collect())
		}
		CostNode::Max { signed: true, ops } => {
			Scev::SMax(ops.iter().map(conv).collect())
		}
		CostNode::Max { signed: false, ops } => {
			Scev::UMax(ops.iter().map(conv).collect())
		}
		CostNode::Ext { signed: true, op } => {
			Scev::SExt(Box::new(conv(op)))
		}
		CostNode::Ext { signed: false, op } => {
			Scev::ZExt(Box::new(conv(op)))
		}
		CostNode::Trunc(op) => Scev::Trunc(Box::new(conv(op))),
		CostNode::AddRec {
			start,
			step,
			header,
		} => Scev::AddRec {
			start: Box::new(conv(start)),
			step: Box::new(conv(step)),
			header: *header,
		},
		CostNode::CallCost { .. } | CostNode::Unknown => {
			Scev::CouldNotCompute
		}
	}
}

/// Lower a simplified cost to IR computing it as an `i64`, widening
/// 32-bit parameters on the way in. `None` when the cost still holds a
/// node with no arithmetic lowering.
pub fn expand_cost(
	cost: &Cost,
	params: &[Value],
	temp_mgr: &mut TempManager,
) -> Option<(Vec<LlvmInstr>, Value)> {
	let mut instrs = Vec::new();
	let value = expand_inner(cost, params, temp_mgr, &mut instrs)?;
	Some((instrs, value))
}

fn expand_inner(
	cost: &Cost,
	params: &[Value],
	temp_mgr: &mut TempManager,
	instrs: &mut Vec<LlvmInstr>,
) -> Option<Value> {
	match &**cost {
		CostNode::Const(v) => Some(Value::Int64(*v)),
		CostNode::Arg(i) => {
			let param = params.get(*i)?.clone();
			match param.get_type() {
				VarType::I64 => Some(param),
				VarType::I32 => {
					let target = temp_mgr.new_temp(VarType::I64);
					instrs.push(Box::new(ConvertInstr {
						target: target.clone(),
						op: ConvertOp::Sext,
						from_type: VarType::I32,
						to_type: VarType::I64,
						lhs: param,
					}));
					Some(Value::Temp(target))
				}
				_ => None,
			}
		}
		CostNode::Add(ops) => {
			expand_nary(ops, ArithOp::Add, params, temp_mgr, instrs)
		}
		CostNode::Mul(ops) => {
			expand_nary(ops, ArithOp::Mul, params, temp_mgr, instrs)
		}
		CostNode::UDiv(l, r) => {
			let lhs = expand_inner(l, params, temp_mgr, instrs)?;
			let rhs = expand_inner(r, params, temp_mgr, instrs)?;
			let target = temp_mgr.new_temp(VarType::I64);
			instrs.push(Box::new(ArithInstr {
				target: target.clone(),
				op: ArithOp::UDiv,
				var_type: VarType::I64,
				lhs,
				rhs,
			}));
			Some(Value::Temp(target))
		}
		// cost arithmetic is 64-bit throughout; width adjustments
		// collapse once the operand is lowered
		CostNode::Ext { op, .. } | CostNode::Trunc(op) => {
			expand_inner(op, params, temp_mgr, instrs)
		}
		_ => None,
	}
}

fn expand_nary(
	ops: &[Cost],
	op: ArithOp,
	params: &[Value],
	temp_mgr: &mut TempManager,
	instrs: &mut Vec<LlvmInstr>,
) -> Option<Value> {
	let mut acc = expand_inner(&ops[0], params, temp_mgr, instrs)?;
	for v in &ops[1..] {
		let rhs = expand_inner(v, params, temp_mgr, instrs)?;
		let target = temp_mgr.new_temp(VarType::I64);
		instrs.push(Box::new(ArithInstr {
			target: target.clone(),
			op,
			var_type: VarType::I64,
			lhs: acc,
			rhs,
		}));
		acc = Value::Temp(target);
	}
	Some(acc)
}

const COST_FILE_MAGIC: &str = "Cost File";

/// Read the library-cost table and seed the default fence costs. A
/// missing file is allowed.
pub fn load_library_costs(
	config: &InstrumentConfig,
) -> Result<HashMap<String, i64>> {
	let mut costs = HashMap::new();
	if let Some(path) = &config.in_cost_file {
		if Path::new(path).exists() {
			let content =
				fs::read_to_string(path).map_err(utils::map_sys_err)?;
			let mut lines = content.lines();
			if lines.next().map(str::trim) != Some(COST_FILE_MAGIC) {
				return Err(CintrError::CostFileError(format!(
					"{}: missing `{}` header",
					path.display(),
					COST_FILE_MAGIC
				)));
			}
			for line in lines {
				let line = line.trim();
				if line.is_empty() {
					continue;
				}
				match line.split_once(':') {
					Some((name, cost)) => match cost.trim().parse::<i64>() {
						Ok(c) => {
							costs.insert(name.trim().to_string(), c);
						}
						Err(_) => warning(format!(
							"{}: non-constant cost for `{}`, using default",
							path.display(),
							name
						)),
					},
					None => {
						return Err(CintrError::CostFileError(format!(
							"{}: malformed line `{}`",
							path.display(),
							line
						)))
					}
				}
			}
		}
	}
	for fence in ["pthread_mutex_lock", "pthread_mutex_unlock"] {
		costs.entry(fence.to_string()).or_insert(DEFAULT_FENCE_COST);
	}
	Ok(costs)
}

/// Emit the final simplified constant cost of every summarized internal
/// function. Writing then reading yields the same constants.
pub fn write_library_costs(
	path: &Path,
	order: &[String],
	summaries: &HashMap<String, FuncCost>,
) -> Result<()> {
	let mut out = String::from(COST_FILE_MAGIC);
	out.push('\n');
	for name in order {
		let constant = summaries
			.get(name)
			.and_then(|fc| fc.summary.as_ref())
			.and_then(|c| c.const_value());
		if let Some(c) = constant {
			out.push_str(&format!("{}:{}\n", name, c));
		}
	}
	fs::write(path, out).map_err(utils::map_sys_err)
}

#[cfg(test)]
mod tests {
	use super::*;
	use flow::scev::Scev;
	use llvm::Temp;

	fn param(name: &str) -> LlvmTemp {
		Temp::new(name, VarType::I32, false)
	}

	#[test]
	fn scev_cost_round_trip() {
		let n = param("n");
		let params = vec![n.clone()];
		let bindings = vec![Scev::Unknown(n.clone())];
		let exprs = vec![
			Scev::Const(42),
			scev_add(vec![Scev::Unknown(n.clone()), Scev::Const(5)]),
			scev_mul(vec![Scev::Unknown(n.clone()), Scev::Const(3)]),
			scev_udiv(
				scev_add(vec![Scev::Unknown(n.clone()), Scev::Const(-1)]),
				Scev::Const(2),
			),
			Scev::ZExt(Box::new(Scev::Unknown(n.clone()))),
		];
		for e in exprs {
			let cost = scev_to_cost(&e, &params);
			assert!(!cost.is_unknown(), "{:?}", e);
			let back = cost_to_scev(&cost, &bindings);
			assert_eq!(back, e);
		}
	}

	#[test]
	fn unresolved_temps_become_unknown() {
		let stray = param("stray");
		let cost = scev_to_cost(&Scev::Unknown(stray), &[param("n")]);
		assert!(cost.is_unknown());
		assert!(
			scev_to_cost(&Scev::CouldNotCompute, &[]).is_unknown()
		);
	}

	#[test]
	fn cost_file_round_trip() {
		let dir = std::env::temp_dir().join("cintr-costfile-test");
		std::fs::create_dir_all(&dir).unwrap();
		let path = dir.join("costs.txt");
		let mut summaries = HashMap::new();
		summaries.insert(
			"f".to_string(),
			FuncCost {
				summary: Some(cost_const(17)),
				has_fence: false,
			},
		);
		summaries.insert(
			"g".to_string(),
			FuncCost {
				summary: Some(cost_arg(0)),
				has_fence: false,
			},
		);
		let order = vec!["f".to_string(), "g".to_string()];
		write_library_costs(&path, &order, &summaries).unwrap();

		let mut config = InstrumentConfig::default();
		config.in_cost_file = Some(path.clone());
		let costs = load_library_costs(&config).unwrap();
		// symbolic summaries are not persisted
		assert_eq!(costs.get("f"), Some(&17));
		assert_eq!(costs.get("g"), None);
		assert_eq!(
			costs.get("pthread_mutex_lock"),
			Some(&DEFAULT_FENCE_COST)
		);
		std::fs::remove_file(path).ok();
	}

	#[test]
	fn missing_cost_file_is_allowed() {
		let mut config = InstrumentConfig::default();
		config.in_cost_file =
			Some(std::path::PathBuf::from("/nonexistent/costs.txt"));
		assert!(load_library_costs(&config).is_ok());
	}
}
