use std::collections::{HashMap, HashSet};

use flow::prelude::*;
use llvm::{LlvmInstr, LlvmInstrTrait};

use crate::{
	config::InstrumentConfig,
	lcc::{ProbeAmount, ProbeMarker, ProbePoint, ProbeSlot},
};

/// Flat per-instruction cost used by the non-optimizing placements:
/// memory operations cost `mem_ops_cost`, external library calls the
/// configured library cost, everything else one unit.
fn flat_cost(
	instr: &LlvmInstr,
	config: &InstrumentConfig,
	defined: &HashSet<String>,
) -> i64 {
	if instr.is_load() || instr.is_store() {
		return config.mem_ops_cost;
	}
	if instr.is_call() {
		if let llvm::LlvmInstrVariant::CallInstr(call) = instr.get_variant() {
			if !defined.contains(call.func.name.as_str()) {
				return config.call_base_cost + config.ext_lib_cost;
			}
		}
		return config.call_base_cost;
	}
	match instr.get_variant() {
		llvm::LlvmInstrVariant::ArithInstr(_)
		| llvm::LlvmInstrVariant::CompInstr(_)
		| llvm::LlvmInstrVariant::ConvertInstr(_) => config.arith_cost,
		_ => 1,
	}
}

fn is_internal_call(instr: &LlvmInstr, defined: &HashSet<String>) -> bool {
	if !instr.is_call() {
		return false;
	}
	match instr.get_variant() {
		llvm::LlvmInstrVariant::CallInstr(call) => {
			defined.contains(call.func.name.as_str())
		}
		_ => false,
	}
}

fn is_backedge(from: &Node, to: &Node) -> bool {
	from
		.borrow()
		.loop_
		.as_ref()
		.map_or(false, |l| l.borrow().header.borrow().id == to.borrow().id)
}

/// Every block sums its cost and probes at the terminator.
pub fn naive_markers(
	func: &Func,
	config: &InstrumentConfig,
	defined: &HashSet<String>,
) -> Vec<ProbeMarker> {
	let mut markers = Vec::new();
	for bb in func.cfg.blocks.iter() {
		let bb_ref = bb.borrow();
		let cost: i64 = bb_ref
			.instrs
			.iter()
			.map(|i| flat_cost(i, config, defined))
			.sum::<i64>()
			+ 1;
		markers.push(ProbeMarker {
			point: ProbePoint {
				block: bb_ref.id,
				slot: ProbeSlot::BeforeTerm,
			},
			amount: ProbeAmount::Const(cost),
		});
	}
	markers
}

/// Probes only before calls and on backedges; straight-line cost that
/// reaches neither is dropped, which is the known inaccuracy of this
/// placement.
pub fn legacy_markers(
	func: &Func,
	config: &InstrumentConfig,
	defined: &HashSet<String>,
) -> Vec<ProbeMarker> {
	let mut markers = Vec::new();
	for bb in func.cfg.blocks.iter() {
		let bb_ref = bb.borrow();
		let mut acc = 0i64;
		for (i, instr) in bb_ref.instrs.iter().enumerate() {
			let c = flat_cost(instr, config, defined);
			if instr.is_call() {
				markers.push(ProbeMarker {
					point: ProbePoint {
						block: bb_ref.id,
						slot: ProbeSlot::Before(i),
					},
					amount: ProbeAmount::Const(acc + c),
				});
				acc = 0;
			} else {
				acc += c;
			}
		}
		acc += 1;
		let has_backedge =
			bb_ref.succ.iter().any(|s| is_backedge(bb, s));
		if has_backedge {
			markers.push(ProbeMarker {
				point: ProbePoint {
					block: bb_ref.id,
					slot: ProbeSlot::BeforeTerm,
				},
				amount: ProbeAmount::Const(acc),
			});
		}
	}
	markers
}

/// Per-block front/back accounting split on internal calls, with the
/// carry flowing through non-merge successors and merge nodes absorbing
/// the average of their predecessors when the spread allows.
pub fn coredet_markers(
	func: &Func,
	config: &InstrumentConfig,
	defined: &HashSet<String>,
) -> Vec<ProbeMarker> {
	let order = func.cfg.rpo();
	let order_pos: HashMap<i32, usize> = order
		.iter()
		.enumerate()
		.map(|(i, b)| (b.borrow().id, i))
		.collect();
	let local_cost = |bb: &Node| {
		bb.borrow()
			.instrs
			.iter()
			.map(|i| flat_cost(i, config, defined))
			.sum::<i64>()
			+ 1
	};

	// merge nodes absorb when every predecessor is a forward,
	// single-successor block of comparable cost
	let mut absorbs: HashSet<i32> = HashSet::new();
	for bb in order.iter() {
		let bb_ref = bb.borrow();
		if bb_ref.prev.len() < 2 {
			continue;
		}
		let my_pos = order_pos[&bb_ref.id];
		let forward = bb_ref.prev.iter().all(|p| {
			p.borrow().single_succ()
				&& order_pos
					.get(&p.borrow().id)
					.map_or(false, |pp| *pp < my_pos)
		});
		if !forward {
			continue;
		}
		let costs: Vec<i64> =
			bb_ref.prev.iter().map(local_cost).collect();
		let spread =
			costs.iter().max().unwrap() - costs.iter().min().unwrap();
		if spread <= config.allowed_deviation {
			absorbs.insert(bb_ref.id);
		}
	}

	let c_bound = config.commit_bound();
	let mut markers = Vec::new();
	let mut carry: HashMap<i32, i64> = HashMap::new();
	let mut contribs: HashMap<i32, Vec<i64>> = HashMap::new();
	for bb in order.iter() {
		let bb_ref = bb.borrow();
		let id = bb_ref.id;
		let mut inflow = carry.remove(&id).unwrap_or(0);
		if let Some(cs) = contribs.remove(&id) {
			inflow += cs.iter().sum::<i64>() / cs.len().max(1) as i64;
		}

		// front segments commit at each internal call
		let mut acc = inflow;
		for (i, instr) in bb_ref.instrs.iter().enumerate() {
			let c = flat_cost(instr, config, defined);
			acc += c;
			if is_internal_call(instr, defined) {
				markers.push(ProbeMarker {
					point: ProbePoint {
						block: id,
						slot: ProbeSlot::Before(i),
					},
					amount: ProbeAmount::Const(acc),
				});
				acc = 0;
			}
		}
		acc += 1;
		let mut out = acc;
		if out > c_bound {
			markers.push(ProbeMarker {
				point: ProbePoint {
					block: id,
					slot: ProbeSlot::BeforeTerm,
				},
				amount: ProbeAmount::Const(out),
			});
			out = 0;
		}

		let succs = bb_ref.succ.clone();
		if succs.is_empty() {
			if out > 0 {
				markers.push(ProbeMarker {
					point: ProbePoint {
						block: id,
						slot: ProbeSlot::BeforeTerm,
					},
					amount: ProbeAmount::Const(out),
				});
			}
			continue;
		}
		let must_commit = succs.iter().any(|s| {
			let merging = s.borrow().prev.len() >= 2;
			let back = is_backedge(bb, s);
			back || (merging && !absorbs.contains(&s.borrow().id))
		});
		if must_commit {
			if out > 0 {
				markers.push(ProbeMarker {
					point: ProbePoint {
						block: id,
						slot: ProbeSlot::BeforeTerm,
					},
					amount: ProbeAmount::Const(out),
				});
			}
			out = 0;
		}
		for s in succs.iter() {
			let sid = s.borrow().id;
			if s.borrow().prev.len() >= 2 {
				if absorbs.contains(&sid) {
					contribs.entry(sid).or_default().push(out);
				}
			} else {
				*carry.entry(sid).or_default() += out;
			}
		}
	}
	markers
}

#[cfg(test)]
mod tests {
	use std::collections::HashSet;

	use super::*;
	use crate::lcc::{ProbeAmount, ProbeSlot};

	fn parsed(src: &str) -> (Program, HashSet<String>) {
		let mut program = irparser::parse(src).unwrap();
		for func in program.funcs.iter_mut() {
			func.cfg.loop_analysis();
		}
		let defined = program.funcs.iter().map(|f| f.name.clone()).collect();
		(program, defined)
	}

	const DIAMOND: &str = "
define void @f(i32 %c) {
  %entry:
    br i32 %c, label %l, label %r
  %l:
    %a = add i32 %c, 1
    %x = load i32, ptr @g
    br label %m
  %r:
    %b = add i32 %c, 2
    br label %m
  %m:
    ret void
}
";

	#[test]
	fn naive_probes_every_terminator() {
		let (program, defined) = parsed(DIAMOND);
		let config = InstrumentConfig::default();
		let markers = naive_markers(&program.funcs[0], &config, &defined);
		assert_eq!(markers.len(), 4);
		assert!(markers
			.iter()
			.all(|m| m.point.slot == ProbeSlot::BeforeTerm));
		// entry carries only its branch
		let entry = &markers[0];
		assert!(matches!(entry.amount, ProbeAmount::Const(1)));
	}

	#[test]
	fn legacy_probes_calls_and_backedges() {
		let src = "
declare void @ext()
define void @f(i32 %n) {
  %entry:
    br label %loop
  %loop:
    %iv = phi i32 [0, %entry], [%iv.next, %loop]
    call void @ext()
    %iv.next = add i32 %iv, 1
    %c = icmp slt i32 %iv.next, %n
    br i32 %c, label %loop, label %done
  %done:
    ret void
}
";
		let (program, defined) = parsed(src);
		let config = InstrumentConfig::default();
		let markers = legacy_markers(&program.funcs[0], &config, &defined);
		// one probe at the call, one on the backedge, nothing else
		assert_eq!(markers.len(), 2);
		assert_eq!(markers[0].point.slot, ProbeSlot::Before(0));
		assert_eq!(markers[1].point.slot, ProbeSlot::BeforeTerm);
	}

	#[test]
	fn coredet_absorbs_comparable_merges() {
		let (program, defined) = parsed(DIAMOND);
		let config = InstrumentConfig::default();
		let markers =
			coredet_markers(&program.funcs[0], &config, &defined);
		// the merge absorbs both arms; only the exit block commits
		assert_eq!(markers.len(), 1);
		let m = &markers[0];
		assert_eq!(m.point.slot, ProbeSlot::BeforeTerm);
		// the arms carry the entry cost: avg(4, 3) + ret
		assert!(matches!(m.amount, ProbeAmount::Const(4)));
	}
}
