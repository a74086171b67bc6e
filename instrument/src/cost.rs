use std::{fmt::Display, rc::Rc};

/// Lazy symbolic cost over function arguments. `Unknown` is infectious:
/// any operator with an unknown operand is unknown.
pub type Cost = Rc<CostNode>;

#[derive(Debug, PartialEq)]
pub enum CostNode {
	Const(i64),
	Arg(usize),
	Add(Vec<Cost>),
	Mul(Vec<Cost>),
	UDiv(Cost, Cost),
	Min { signed: bool, ops: Vec<Cost> },
	Max { signed: bool, ops: Vec<Cost> },
	Ext { signed: bool, op: Cost },
	Trunc(Cost),
	AddRec { start: Cost, step: Cost, header: i32 },
	CallCost { callee: String, args: Vec<Cost> },
	Unknown,
}

pub fn cost_const(v: i64) -> Cost {
	Rc::new(CostNode::Const(v))
}

pub fn cost_arg(i: usize) -> Cost {
	Rc::new(CostNode::Arg(i))
}

pub fn cost_unknown() -> Cost {
	Rc::new(CostNode::Unknown)
}

pub fn cost_call(callee: String, args: Vec<Cost>) -> Cost {
	Rc::new(CostNode::CallCost { callee, args })
}

pub fn cost_add(ops: Vec<Cost>) -> Cost {
	let mut flat = Vec::new();
	let mut acc = 0i64;
	for op in ops {
		match &*op {
			CostNode::Unknown => return cost_unknown(),
			CostNode::Const(c) => acc = acc.wrapping_add(*c),
			CostNode::Add(inner) => {
				for v in inner {
					match &**v {
						CostNode::Const(c) => acc = acc.wrapping_add(*c),
						CostNode::Unknown => return cost_unknown(),
						_ => flat.push(v.clone()),
					}
				}
			}
			_ => flat.push(op),
		}
	}
	if flat.is_empty() {
		return cost_const(acc);
	}
	if acc != 0 {
		flat.push(cost_const(acc));
	}
	if flat.len() == 1 {
		flat.pop().unwrap()
	} else {
		Rc::new(CostNode::Add(flat))
	}
}

pub fn cost_mul(ops: Vec<Cost>) -> Cost {
	let mut flat = Vec::new();
	let mut acc = 1i64;
	for op in ops {
		match &*op {
			CostNode::Unknown => return cost_unknown(),
			CostNode::Const(c) => acc = acc.wrapping_mul(*c),
			CostNode::Mul(inner) => {
				for v in inner {
					match &**v {
						CostNode::Const(c) => acc = acc.wrapping_mul(*c),
						CostNode::Unknown => return cost_unknown(),
						_ => flat.push(v.clone()),
					}
				}
			}
			_ => flat.push(op),
		}
	}
	if acc == 0 {
		return cost_const(0);
	}
	if flat.is_empty() {
		return cost_const(acc);
	}
	if acc != 1 {
		flat.push(cost_const(acc));
	}
	if flat.len() == 1 {
		flat.pop().unwrap()
	} else {
		Rc::new(CostNode::Mul(flat))
	}
}

pub fn cost_udiv(lhs: Cost, rhs: Cost) -> Cost {
	match (&*lhs, &*rhs) {
		(CostNode::Unknown, _) | (_, CostNode::Unknown) => cost_unknown(),
		(_, CostNode::Const(0)) => cost_unknown(),
		(CostNode::Const(a), CostNode::Const(b)) => {
			cost_const(((*a as u64) / (*b as u64)) as i64)
		}
		(_, CostNode::Const(1)) => lhs,
		_ => Rc::new(CostNode::UDiv(lhs, rhs)),
	}
}

fn fold_minmax(ops: Vec<Cost>, is_max: bool, signed: bool) -> Cost {
	if ops.iter().any(|v| matches!(**v, CostNode::Unknown)) {
		return cost_unknown();
	}
	let consts: Vec<i64> =
		ops.iter().filter_map(|v| v.const_value()).collect();
	if consts.len() == ops.len() && !ops.is_empty() {
		let fold = |a: i64, b: i64| {
			if signed {
				if is_max {
					a.max(b)
				} else {
					a.min(b)
				}
			} else {
				let (ua, ub) = (a as u64, b as u64);
				(if is_max { ua.max(ub) } else { ua.min(ub) }) as i64
			}
		};
		return cost_const(consts.into_iter().reduce(fold).unwrap());
	}
	if ops.len() == 1 {
		return ops.into_iter().next().unwrap();
	}
	Rc::new(if is_max {
		CostNode::Max { signed, ops }
	} else {
		CostNode::Min { signed, ops }
	})
}

pub fn cost_max(signed: bool, ops: Vec<Cost>) -> Cost {
	fold_minmax(ops, true, signed)
}

pub fn cost_min(signed: bool, ops: Vec<Cost>) -> Cost {
	fold_minmax(ops, false, signed)
}

pub fn cost_ext(signed: bool, op: Cost) -> Cost {
	match &*op {
		CostNode::Unknown => cost_unknown(),
		CostNode::Const(_) => op,
		_ => Rc::new(CostNode::Ext { signed, op }),
	}
}

pub fn cost_trunc(op: Cost) -> Cost {
	match &*op {
		CostNode::Unknown => cost_unknown(),
		CostNode::Const(_) => op,
		_ => Rc::new(CostNode::Trunc(op)),
	}
}

pub fn cost_addrec(start: Cost, step: Cost, header: i32) -> Cost {
	if matches!(*start, CostNode::Unknown)
		|| matches!(*step, CostNode::Unknown)
	{
		return cost_unknown();
	}
	Rc::new(CostNode::AddRec {
		start,
		step,
		header,
	})
}

pub trait CostExt {
	fn const_value(&self) -> Option<i64>;
	fn is_unknown(&self) -> bool;
	/// Whether this cost may be burned into a probe as an immediate:
	/// a non-negative constant fitting 63 bits.
	fn instrumentable_const(&self) -> Option<i64>;
	/// Purely `Const`/`Arg` shaped (after simplification), so it can be
	/// lowered to IR in a value-carrying probe.
	fn expandable(&self) -> bool;
}

impl CostExt for Cost {
	fn const_value(&self) -> Option<i64> {
		match &**self {
			CostNode::Const(v) => Some(*v),
			_ => None,
		}
	}
	fn is_unknown(&self) -> bool {
		matches!(**self, CostNode::Unknown)
	}
	fn instrumentable_const(&self) -> Option<i64> {
		self.const_value().filter(|v| *v >= 0)
	}
	fn expandable(&self) -> bool {
		match &**self {
			CostNode::Const(_) | CostNode::Arg(_) => true,
			CostNode::Add(ops) | CostNode::Mul(ops) => {
				ops.iter().all(|v| v.expandable())
			}
			CostNode::UDiv(l, r) => l.expandable() && r.expandable(),
			CostNode::Ext { op, .. } | CostNode::Trunc(op) => op.expandable(),
			_ => false,
		}
	}
}

impl Display for CostNode {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		match self {
			CostNode::Const(v) => write!(f, "{}", v),
			CostNode::Arg(i) => write!(f, "arg{}", i),
			CostNode::Add(ops) => write_nary(f, "+", ops),
			CostNode::Mul(ops) => write_nary(f, "*", ops),
			CostNode::UDiv(l, r) => write!(f, "({} /u {})", l, r),
			CostNode::Min { signed, ops } => {
				write_call(f, if *signed { "smin" } else { "umin" }, ops)
			}
			CostNode::Max { signed, ops } => {
				write_call(f, if *signed { "smax" } else { "umax" }, ops)
			}
			CostNode::Ext { signed: true, op } => write!(f, "sext({})", op),
			CostNode::Ext { signed: false, op } => write!(f, "zext({})", op),
			CostNode::Trunc(op) => write!(f, "trunc({})", op),
			CostNode::AddRec {
				start,
				step,
				header,
			} => write!(f, "{{{},+,{}}}<B{}>", start, step, header),
			CostNode::CallCost { callee, args } => {
				write!(f, "call@{}", callee)?;
				write_call(f, "", args)
			}
			CostNode::Unknown => write!(f, "unknown"),
		}
	}
}

fn write_nary(
	f: &mut std::fmt::Formatter,
	op: &str,
	ops: &[Cost],
) -> std::fmt::Result {
	write!(f, "(")?;
	for (i, v) in ops.iter().enumerate() {
		if i > 0 {
			write!(f, " {} ", op)?;
		}
		write!(f, "{}", v)?;
	}
	write!(f, ")")
}

fn write_call(
	f: &mut std::fmt::Formatter,
	name: &str,
	ops: &[Cost],
) -> std::fmt::Result {
	write!(f, "{}(", name)?;
	for (i, v) in ops.iter().enumerate() {
		if i > 0 {
			write!(f, ", ")?;
		}
		write!(f, "{}", v)?;
	}
	write!(f, ")")
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn constants_fold_through_operators() {
		let c = cost_add(vec![cost_const(3), cost_const(4), cost_const(-2)]);
		assert_eq!(c.const_value(), Some(5));
		let c = cost_mul(vec![cost_const(3), cost_const(4)]);
		assert_eq!(c.const_value(), Some(12));
		let c = cost_udiv(cost_const(10), cost_const(3));
		assert_eq!(c.const_value(), Some(3));
		let c = cost_max(true, vec![cost_const(-5), cost_const(2)]);
		assert_eq!(c.const_value(), Some(2));
		let c = cost_max(false, vec![cost_const(-5), cost_const(2)]);
		assert_eq!(c.const_value(), Some(-5));
	}

	#[test]
	fn unknown_is_infectious() {
		assert!(cost_add(vec![cost_const(1), cost_unknown()]).is_unknown());
		assert!(cost_mul(vec![cost_arg(0), cost_unknown()]).is_unknown());
		assert!(cost_udiv(cost_unknown(), cost_const(2)).is_unknown());
		assert!(cost_max(true, vec![cost_unknown()]).is_unknown());
		assert!(cost_ext(false, cost_unknown()).is_unknown());
		assert!(
			cost_addrec(cost_unknown(), cost_const(1), 1).is_unknown()
		);
	}

	#[test]
	fn symbolic_terms_survive() {
		let c = cost_add(vec![cost_arg(0), cost_const(2), cost_const(3)]);
		match &*c {
			CostNode::Add(ops) => assert_eq!(ops.len(), 2),
			_ => panic!("expected an add"),
		}
		assert!(c.expandable());
		assert_eq!(c.const_value(), None);
	}

	#[test]
	fn instrumentable_gate_rejects_negative() {
		assert_eq!(cost_const(10).instrumentable_const(), Some(10));
		assert_eq!(cost_const(-1).instrumentable_const(), None);
		assert_eq!(cost_arg(0).instrumentable_const(), None);
	}

	#[test]
	fn division_by_zero_degrades_to_unknown() {
		assert!(cost_udiv(cost_const(5), cost_const(0)).is_unknown());
	}
}
