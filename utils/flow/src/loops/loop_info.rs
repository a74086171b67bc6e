use std::fmt::Display;

use llvm::{
	ArithOp, CompOp, LlvmInstrTrait, LlvmInstrVariant::*, LlvmTemp, Value,
};

use crate::{cfg::CFG, Node};

use super::LoopPtr;

/// Skeleton blocks of a natural loop. Each is present only when unique.
pub struct LoopExits {
	pub blocks: Vec<Node>,
	pub preheader: Option<Node>,
	pub latch: Option<Node>,
	pub exiting: Option<Node>,
	pub exit: Option<Node>,
}

pub fn loop_blocks(cfg: &CFG, loop_: &LoopPtr) -> Vec<Node> {
	cfg
		.blocks
		.iter()
		.filter(|bb| loop_.borrow().contains_block(bb))
		.cloned()
		.collect()
}

pub fn analyze_exits(cfg: &CFG, loop_: &LoopPtr) -> LoopExits {
	let blocks = loop_blocks(cfg, loop_);
	let header = loop_.borrow().header.clone();
	let in_loop = |bb: &Node| loop_.borrow().contains_block(bb);

	let mut latch = None;
	let mut preheader = None;
	let mut latch_unique = true;
	let mut preheader_unique = true;
	for prev in header.borrow().prev.iter() {
		if in_loop(prev) {
			latch_unique &= latch.is_none();
			latch = Some(prev.clone());
		} else {
			preheader_unique &= preheader.is_none();
			preheader = Some(prev.clone());
		}
	}
	// a dedicated preheader falls through to the header alone
	if preheader.as_ref().map_or(false, |p| !p.borrow().single_succ()) {
		preheader = None;
	}

	let mut exiting = None;
	let mut exit = None;
	let mut exits_unique = true;
	for bb in blocks.iter() {
		for succ in bb.borrow().succ.iter() {
			if !in_loop(succ) {
				exits_unique &=
					exiting.is_none() || exiting.as_ref() == Some(bb);
				exits_unique &= exit.is_none() || exit.as_ref() == Some(succ);
				exiting = Some(bb.clone());
				exit = Some(succ.clone());
			}
		}
	}
	LoopExits {
		blocks,
		preheader: preheader.filter(|_| preheader_unique),
		latch: latch.filter(|_| latch_unique),
		exiting: exiting.clone().filter(|_| exits_unique),
		exit: exit.filter(|_| exits_unique),
	}
}

/// Affine induction descriptor of a counted loop:
///   iv = phi [begin, preheader], [next, latch]
///   next = iv + step
///   cond = icmp <op> (iv | next), end
#[derive(Clone)]
pub struct LoopBounds {
	pub indvar: LlvmTemp,
	pub next: LlvmTemp,
	pub begin: Value,
	pub step: i64,
	pub end: Value,
	pub comp_op: CompOp,
	pub cond_temp: LlvmTemp,
	pub cond_on_next: bool,
}

impl Display for LoopBounds {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		write!(
			f,
			"iv {} = [{}, +{}) {} {}",
			self.indvar, self.begin, self.step, self.comp_op, self.end
		)
	}
}

/// Recognize the canonical counted shape. The exit condition must sit in
/// the exiting block and test the induction variable or its increment
/// against a loop-invariant bound.
pub fn get_loop_bounds(loop_: &LoopPtr, exits: &LoopExits) -> Option<LoopBounds> {
	let header = loop_.borrow().header.clone();
	let exiting = exits.exiting.clone()?;
	let latch = exits.latch.clone()?;
	let preheader_label = exits.preheader.clone()?.borrow().label();
	let latch_label = latch.borrow().label();

	// the exit branch and its comparison
	let cond_temp = {
		let exiting_ref = exiting.borrow();
		let jump = exiting_ref.jump_instr.as_ref()?;
		match jump.get_variant() {
			JumpCondInstr(v) => v.cond.unwrap_temp()?,
			_ => return None,
		}
	};
	let (comp_op, cmp_lhs, cmp_rhs) = {
		let exiting_ref = exiting.borrow();
		let cmp = exiting_ref
			.instrs
			.iter()
			.find(|i| i.get_write().as_ref() == Some(&cond_temp))?;
		match cmp.get_variant() {
			CompInstr(v) => (v.op, v.lhs.clone(), v.rhs.clone()),
			_ => return None,
		}
	};
	if !matches!(
		comp_op,
		CompOp::SLT | CompOp::SLE | CompOp::SGT | CompOp::SGE
	) {
		return None;
	}
	let probe = cmp_lhs.unwrap_temp()?;

	// find the header phi and the increment feeding the comparison
	for phi in header.borrow().phi_instrs.iter() {
		let Some(begin) = phi
			.source
			.iter()
			.find(|(_, l)| *l == preheader_label)
			.map(|(v, _)| v.clone())
		else {
			continue;
		};
		let next = match phi
			.source
			.iter()
			.find(|(_, l)| *l == latch_label)
			.map(|(v, _)| v.clone())
		{
			Some(Value::Temp(t)) => t,
			_ => continue,
		};
		// next = iv + step somewhere in the loop
		let step = exits.blocks.iter().find_map(|bb| {
			bb.borrow().instrs.iter().find_map(|i| match i.get_variant() {
				ArithInstr(v) if v.target == next => match (v.op, &v.lhs, &v.rhs) {
					(ArithOp::Add, Value::Temp(t), c)
						if *t == phi.target && c.const_int().is_some() =>
					{
						c.const_int()
					}
					(ArithOp::Add, c, Value::Temp(t))
						if *t == phi.target && c.const_int().is_some() =>
					{
						c.const_int()
					}
					(ArithOp::Sub, Value::Temp(t), c)
						if *t == phi.target && c.const_int().is_some() =>
					{
						c.const_int().map(|v| -v)
					}
					_ => None,
				},
				_ => None,
			})
		});
		let Some(step) = step else { continue };
		if step == 0 {
			continue;
		}
		let (cond_on_next, hit) = if probe == phi.target {
			(false, true)
		} else if probe == next {
			(true, true)
		} else {
			(false, false)
		};
		if !hit {
			continue;
		}
		// the bound must not be recomputed inside the loop
		let end_invariant = match &cmp_rhs {
			Value::Temp(t) => !exits.blocks.iter().any(|bb| {
				bb.borrow().instrs.iter().any(|i| i.get_write().as_ref() == Some(t))
					|| bb.borrow().phi_instrs.iter().any(|p| p.target == *t)
			}),
			_ => true,
		};
		if !end_invariant {
			continue;
		}
		return Some(LoopBounds {
			indvar: phi.target.clone(),
			next,
			begin,
			step,
			end: cmp_rhs,
			comp_op,
			cond_temp,
			cond_on_next,
		});
	}
	None
}
