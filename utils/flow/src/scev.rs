use std::collections::{HashMap, HashSet};

use llvm::{
	ArithOp, CompOp, ConvertOp, LlvmInstrTrait, LlvmInstrVariant::*,
	LlvmTemp, Value,
};

use crate::{func::Func, loops::LoopBounds};

/// Symbolic evolution of an integer value. `Unknown` wraps an opaque but
/// well-defined temporary (a parameter, a load, a call result);
/// `CouldNotCompute` means the analysis gave up.
#[derive(Clone, Debug, PartialEq)]
pub enum Scev {
	Const(i64),
	Unknown(LlvmTemp),
	Add(Vec<Scev>),
	Mul(Vec<Scev>),
	UDiv(Box<Scev>, Box<Scev>),
	SMax(Vec<Scev>),
	SMin(Vec<Scev>),
	UMax(Vec<Scev>),
	UMin(Vec<Scev>),
	ZExt(Box<Scev>),
	SExt(Box<Scev>),
	Trunc(Box<Scev>),
	AddRec {
		start: Box<Scev>,
		step: Box<Scev>,
		header: i32,
	},
	CouldNotCompute,
}

impl Scev {
	pub fn is_unknown(&self) -> bool {
		matches!(self, Self::CouldNotCompute)
	}
	pub fn const_value(&self) -> Option<i64> {
		match self {
			Self::Const(v) => Some(*v),
			_ => None,
		}
	}
}

pub fn scev_add(ops: Vec<Scev>) -> Scev {
	let mut flat = Vec::new();
	let mut acc = 0i64;
	for op in ops {
		match op {
			Scev::CouldNotCompute => return Scev::CouldNotCompute,
			Scev::Const(c) => acc = acc.wrapping_add(c),
			Scev::Add(inner) => {
				for v in inner {
					match v {
						Scev::Const(c) => acc = acc.wrapping_add(c),
						other => flat.push(other),
					}
				}
			}
			other => flat.push(other),
		}
	}
	if flat.is_empty() {
		return Scev::Const(acc);
	}
	if acc != 0 {
		flat.push(Scev::Const(acc));
	}
	if flat.len() == 1 {
		flat.pop().unwrap()
	} else {
		Scev::Add(flat)
	}
}

pub fn scev_mul(ops: Vec<Scev>) -> Scev {
	let mut flat = Vec::new();
	let mut acc = 1i64;
	for op in ops {
		match op {
			Scev::CouldNotCompute => return Scev::CouldNotCompute,
			Scev::Const(c) => acc = acc.wrapping_mul(c),
			Scev::Mul(inner) => {
				for v in inner {
					match v {
						Scev::Const(c) => acc = acc.wrapping_mul(c),
						other => flat.push(other),
					}
				}
			}
			other => flat.push(other),
		}
	}
	if acc == 0 {
		return Scev::Const(0);
	}
	if flat.is_empty() {
		return Scev::Const(acc);
	}
	if acc != 1 {
		flat.push(Scev::Const(acc));
	}
	if flat.len() == 1 {
		flat.pop().unwrap()
	} else {
		Scev::Mul(flat)
	}
}

pub fn scev_udiv(lhs: Scev, rhs: Scev) -> Scev {
	match (&lhs, &rhs) {
		(Scev::CouldNotCompute, _) | (_, Scev::CouldNotCompute) => {
			Scev::CouldNotCompute
		}
		(_, Scev::Const(0)) => Scev::CouldNotCompute,
		(Scev::Const(a), Scev::Const(b)) => {
			Scev::Const(((*a as u64) / (*b as u64)) as i64)
		}
		(_, Scev::Const(1)) => lhs,
		_ => Scev::UDiv(Box::new(lhs), Box::new(rhs)),
	}
}

enum Def {
	Arith(ArithOp, Value, Value),
	Convert(ConvertOp, Value),
	HeaderPhi { start: Value, latch_val: Value, header: i32 },
}

/// Per-function scalar evolution over SSA temporaries.
pub struct ScevAnalysis {
	map: HashMap<LlvmTemp, Scev>,
}

impl ScevAnalysis {
	/// Requires the loop forest to be current (`loop_analysis` ran).
	pub fn analyze(func: &Func) -> Self {
		let mut defs: HashMap<LlvmTemp, Def> = HashMap::new();
		for bb in func.cfg.blocks.iter() {
			let bb_ref = bb.borrow();
			let is_header = bb_ref
				.loop_
				.as_ref()
				.map_or(false, |l| l.borrow().header.borrow().id == bb_ref.id);
			for phi in bb_ref.phi_instrs.iter() {
				if !is_header || phi.source.len() != 2 {
					continue;
				}
				let loop_ = bb_ref.loop_.clone().unwrap();
				let in_loop = |label: &utils::Label| {
					bb_ref
						.prev
						.iter()
						.find(|p| p.borrow().label() == *label)
						.map_or(false, |p| loop_.borrow().contains_block(p))
				};
				let (a, la) = &phi.source[0];
				let (b, lb) = &phi.source[1];
				let (start, latch_val) = match (in_loop(la), in_loop(lb)) {
					(false, true) => (a.clone(), b.clone()),
					(true, false) => (b.clone(), a.clone()),
					_ => continue,
				};
				defs.insert(
					phi.target.clone(),
					Def::HeaderPhi {
						start,
						latch_val,
						header: bb_ref.id,
					},
				);
			}
			for instr in bb_ref.instrs.iter() {
				let Some(target) = instr.get_write() else { continue };
				match instr.get_variant() {
					ArithInstr(v) => {
						defs.insert(target, Def::Arith(v.op, v.lhs.clone(), v.rhs.clone()));
					}
					ConvertInstr(v) => {
						defs.insert(target, Def::Convert(v.op, v.lhs.clone()));
					}
					_ => {}
				}
			}
		}
		let mut analysis = Self {
			map: HashMap::new(),
		};
		let temps: Vec<_> = defs.keys().cloned().collect();
		let mut visiting = HashSet::new();
		for t in temps {
			analysis.resolve(&t, &defs, &mut visiting);
		}
		analysis
	}

	fn resolve(
		&mut self,
		temp: &LlvmTemp,
		defs: &HashMap<LlvmTemp, Def>,
		visiting: &mut HashSet<LlvmTemp>,
	) -> Scev {
		if let Some(s) = self.map.get(temp) {
			return s.clone();
		}
		if !visiting.insert(temp.clone()) {
			return Scev::Unknown(temp.clone());
		}
		let scev = match defs.get(temp) {
			None => Scev::Unknown(temp.clone()),
			Some(Def::Arith(op, lhs, rhs)) => {
				let l = self.resolve_value(lhs, defs, visiting);
				let r = self.resolve_value(rhs, defs, visiting);
				match op {
					ArithOp::Add => scev_add(vec![l, r]),
					ArithOp::Sub => {
						scev_add(vec![l, scev_mul(vec![Scev::Const(-1), r])])
					}
					ArithOp::Mul => scev_mul(vec![l, r]),
					ArithOp::UDiv => scev_udiv(l, r),
					ArithOp::Shl => match r.const_value() {
						Some(c) if (0..63).contains(&c) => {
							scev_mul(vec![l, Scev::Const(1 << c)])
						}
						_ => Scev::Unknown(temp.clone()),
					},
					_ => Scev::Unknown(temp.clone()),
				}
			}
			Some(Def::Convert(op, lhs)) => {
				let l = self.resolve_value(lhs, defs, visiting);
				match (op, l) {
					(_, Scev::CouldNotCompute) => Scev::CouldNotCompute,
					(ConvertOp::Zext, l) => Scev::ZExt(Box::new(l)),
					(ConvertOp::Sext, l) => Scev::SExt(Box::new(l)),
					(ConvertOp::Trunc, l) => Scev::Trunc(Box::new(l)),
					_ => Scev::Unknown(temp.clone()),
				}
			}
			Some(Def::HeaderPhi {
				start,
				latch_val,
				header,
			}) => {
				let step = latch_val.unwrap_temp().and_then(|next| {
					match defs.get(&next) {
						Some(Def::Arith(ArithOp::Add, Value::Temp(t), c))
							if t == temp =>
						{
							c.const_int()
						}
						Some(Def::Arith(ArithOp::Add, c, Value::Temp(t)))
							if t == temp =>
						{
							c.const_int()
						}
						Some(Def::Arith(ArithOp::Sub, Value::Temp(t), c))
							if t == temp =>
						{
							c.const_int().map(|v| -v)
						}
						_ => None,
					}
				});
				match step {
					Some(step) => {
						let start = self.resolve_value(start, defs, visiting);
						Scev::AddRec {
							start: Box::new(start),
							step: Box::new(Scev::Const(step)),
							header: *header,
						}
					}
					None => Scev::Unknown(temp.clone()),
				}
			}
		};
		visiting.remove(temp);
		self.map.insert(temp.clone(), scev.clone());
		scev
	}

	fn resolve_value(
		&mut self,
		value: &Value,
		defs: &HashMap<LlvmTemp, Def>,
		visiting: &mut HashSet<LlvmTemp>,
	) -> Scev {
		match value {
			Value::Int(v) => Scev::Const(*v as i64),
			Value::Int64(v) => Scev::Const(*v),
			Value::Temp(t) => self.resolve(t, defs, visiting),
			_ => Scev::CouldNotCompute,
		}
	}

	pub fn scev_of(&self, value: &Value) -> Scev {
		match value {
			Value::Int(v) => Scev::Const(*v as i64),
			Value::Int64(v) => Scev::Const(*v),
			Value::Temp(t) => {
				self.map.get(t).cloned().unwrap_or(Scev::Unknown(t.clone()))
			}
			_ => Scev::CouldNotCompute,
		}
	}

	/// Number of times the backedge runs, per the affine bound descriptor.
	/// Constant when begin and end fold, otherwise symbolic.
	pub fn backedge_taken(&self, bounds: &LoopBounds) -> Scev {
		let begin = self.scev_of(&bounds.begin);
		let end = self.scev_of(&bounds.end);
		if begin.is_unknown() || end.is_unknown() {
			return Scev::CouldNotCompute;
		}
		let (diff, step, op) = match bounds.comp_op {
			CompOp::SLT | CompOp::SLE => {
				if bounds.step <= 0 {
					return Scev::CouldNotCompute;
				}
				let diff = scev_add(vec![
					end,
					scev_mul(vec![Scev::Const(-1), begin]),
				]);
				(diff, bounds.step, bounds.comp_op)
			}
			CompOp::SGT | CompOp::SGE => {
				if bounds.step >= 0 {
					return Scev::CouldNotCompute;
				}
				let diff = scev_add(vec![
					begin,
					scev_mul(vec![Scev::Const(-1), end]),
				]);
				let op = if bounds.comp_op == CompOp::SGT {
					CompOp::SLT
				} else {
					CompOp::SLE
				};
				(diff, -bounds.step, op)
			}
			_ => return Scev::CouldNotCompute,
		};
		if diff.const_value().map_or(false, |c| c < 0) {
			return Scev::Const(0);
		}
		let s = Scev::Const(step);
		let btc = match (op, bounds.cond_on_next) {
			// continue while next <op> end
			(CompOp::SLT, true) => scev_add(vec![
				scev_udiv(
					scev_add(vec![diff, Scev::Const(step - 1)]),
					s,
				),
				Scev::Const(-1),
			]),
			(CompOp::SLE, true) => scev_udiv(diff, s),
			// continue while iv <op> end, tested after the increment ran
			(CompOp::SLT, false) => {
				scev_udiv(scev_add(vec![diff, Scev::Const(step - 1)]), s)
			}
			(CompOp::SLE, false) => {
				scev_add(vec![scev_udiv(diff, s), Scev::Const(1)])
			}
			_ => Scev::CouldNotCompute,
		};
		match btc {
			Scev::Const(c) if c < 0 => Scev::Const(0),
			other => other,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use llvm::{CompOp, Temp, Value, VarType};

	fn bounds(
		begin: i64,
		end: Value,
		step: i64,
		op: CompOp,
		on_next: bool,
	) -> crate::loops::LoopBounds {
		crate::loops::LoopBounds {
			indvar: Temp::new("iv", VarType::I32, false),
			next: Temp::new("iv.next", VarType::I32, false),
			begin: Value::Int(begin as i32),
			step,
			end,
			comp_op: op,
			cond_temp: Temp::new("c", VarType::I32, false),
			cond_on_next: on_next,
		}
	}

	fn empty_analysis() -> ScevAnalysis {
		ScevAnalysis {
			map: std::collections::HashMap::new(),
		}
	}

	#[test]
	fn constant_trip_counts() {
		let scev = empty_analysis();
		// for (i = 0; ++i < 10;) runs the backedge 9 times
		let b = bounds(0, Value::Int(10), 1, CompOp::SLT, true);
		assert_eq!(scev.backedge_taken(&b), Scev::Const(9));
		// step 3: iterations at 3, 6, 9 continue, 12 exits
		let b = bounds(0, Value::Int(10), 3, CompOp::SLE, true);
		assert_eq!(scev.backedge_taken(&b), Scev::Const(3));
		// empty range never takes the backedge
		let b = bounds(10, Value::Int(0), 1, CompOp::SLT, true);
		assert_eq!(scev.backedge_taken(&b), Scev::Const(0));
	}

	#[test]
	fn down_counting_mirrors() {
		let scev = empty_analysis();
		let b = bounds(10, Value::Int(0), -1, CompOp::SGT, true);
		assert_eq!(scev.backedge_taken(&b), Scev::Const(9));
	}

	#[test]
	fn symbolic_bounds_stay_symbolic() {
		let scev = empty_analysis();
		let n = Temp::new("n", VarType::I32, false);
		let b = bounds(0, Value::Temp(n.clone()), 1, CompOp::SLT, true);
		let btc = scev.backedge_taken(&b);
		assert_ne!(btc, Scev::CouldNotCompute);
		assert_eq!(btc.const_value(), None);
	}

	#[test]
	fn wrong_direction_step_is_rejected() {
		let scev = empty_analysis();
		let b = bounds(0, Value::Int(10), -1, CompOp::SLT, true);
		assert_eq!(scev.backedge_taken(&b), Scev::CouldNotCompute);
	}

	#[test]
	fn constructors_fold_and_flatten() {
		let s = scev_add(vec![
			Scev::Const(1),
			scev_add(vec![Scev::Const(2), Scev::Const(3)]),
		]);
		assert_eq!(s, Scev::Const(6));
		let s = scev_mul(vec![Scev::Const(0), Scev::CouldNotCompute]);
		assert_eq!(s, Scev::CouldNotCompute);
		assert_eq!(
			scev_udiv(Scev::Const(7), Scev::Const(2)),
			Scev::Const(3)
		);
		assert_eq!(
			scev_udiv(Scev::Const(1), Scev::Const(0)),
			Scev::CouldNotCompute
		);
	}
}
