use flow::prelude::*;
use llvm::{LlvmInstrTrait, LlvmInstrVariant::CallInstr, LlvmTemp};
use utils::errors::Result;

use crate::{
	cost::{cost_add, cost_const, Cost},
	costmodel::CostModel,
	lcc::{LccForest, UnitLcc},
};

/// Partition every basic block into maximal fence-free unit containers
/// and wire the container graph to mirror the CFG. A fence closes its
/// unit and stays inside it; the edge out of a fence-terminated unit is
/// a fence edge.
pub fn build(func: &Func, cm: &CostModel) -> Result<LccForest> {
	let mut forest = LccForest::default();
	let params: Vec<LlvmTemp> =
		func.params.iter().filter_map(|v| v.unwrap_temp()).collect();
	let scev = ScevAnalysis::analyze(func);

	for bb in func.cfg.blocks.iter() {
		let bb_ref = bb.borrow();
		// refusing an unterminated block beats silent under-counting
		if bb_ref.jump_instr.is_none() {
			return Err(utils::CintrError::ShapeError(
				format!("@{}", func.name),
				format!("block {} has no terminator", bb_ref.label()),
			));
		}
		let n = bb_ref.instrs.len();
		let mut start = 0usize;
		let mut costs: Vec<Cost> = Vec::new();
		let mut closed = false;
		for (i, instr) in bb_ref.instrs.iter().enumerate() {
			costs.push(cm.instr_cost(instr, &params, &scev));
			if !cm.is_fence(instr) {
				continue;
			}
			// refuse fences the cost table knows nothing about
			if let CallInstr(call) = instr.get_variant() {
				if cm.config.fences.contains(call.func.name.as_str()) {
					cm.fence_cost(call.func.name.as_str())?;
				}
			}
			if i + 1 == n {
				// only the terminator follows: it joins this unit and the
				// successor edges become fence edges
				costs.push(cost_const(1));
				forest.new_unit(UnitLcc {
					block: bb_ref.id,
					first: start,
					last: n,
					with_term: true,
					ends_with_fence: true,
					cost: cost_add(std::mem::take(&mut costs)),
					initial: 0,
				});
				start = n;
				closed = true;
			} else {
				forest.new_unit(UnitLcc {
					block: bb_ref.id,
					first: start,
					last: i + 1,
					with_term: false,
					ends_with_fence: true,
					cost: cost_add(std::mem::take(&mut costs)),
					initial: 0,
				});
				start = i + 1;
			}
		}
		if !closed {
			costs.push(cost_const(1));
			forest.new_unit(UnitLcc {
				block: bb_ref.id,
				first: start,
				last: n,
				with_term: true,
				ends_with_fence: false,
				cost: cost_add(costs),
				initial: 0,
			});
		}
		// slices inside one block are only ever separated by fences
		let units = forest.block_units.get(&bb_ref.id).unwrap().clone();
		for pair in units.windows(2) {
			forest.add_edge(pair[0], pair[1], true);
		}
	}

	for bb in func.cfg.blocks.iter() {
		let bb_ref = bb.borrow();
		let units = forest.block_units.get(&bb_ref.id).unwrap();
		let last = *units.last().unwrap();
		let fence_out = forest.unit(last).ends_with_fence
			|| bb_ref
				.jump_instr
				.as_ref()
				.map_or(false, |v| v.is_unreachable());
		for succ in bb_ref.succ.iter() {
			let first = forest.block_units.get(&succ.borrow().id).unwrap()[0];
			forest.add_edge(last, first, fence_out);
		}
	}
	Ok(forest)
}

#[cfg(test)]
mod tests {
	use std::collections::{HashMap, HashSet};

	use super::*;
	use crate::config::InstrumentConfig;
	use crate::cost::CostExt;
	use crate::costmodel::load_library_costs;

	fn build_for(src: &str) -> (LccForest, Program) {
		let program = irparser::parse(src).unwrap();
		let config = InstrumentConfig::default();
		let lib_costs = load_library_costs(&config).unwrap();
		let summaries = HashMap::new();
		let defined = HashSet::new();
		let no_credit = HashSet::new();
		let ci_internal = HashSet::new();
		let cm = CostModel {
			config: &config,
			lib_costs: &lib_costs,
			summaries: &summaries,
			defined: &defined,
			no_credit: &no_credit,
			ci_internal: &ci_internal,
		};
		let forest = build(&program.funcs[0], &cm).unwrap();
		(forest, program)
	}

	#[test]
	fn empty_function_costs_one() {
		let (forest, _) = build_for("define void @f() { %entry: ret void }");
		assert_eq!(forest.global.len(), 1);
		let unit = forest.unit(forest.global[0]);
		assert_eq!(unit.cost.const_value(), Some(1));
		assert!(unit.with_term);
	}

	#[test]
	fn fence_splits_block_and_keeps_fence_cost() {
		let src = r#"
declare void @pthread_mutex_lock(ptr)
define void @f(ptr %m) {
  %entry:
    %a = add i32 1, 2
    call void @pthread_mutex_lock(ptr %m)
    %b = add i32 3, 4
    ret void
}
"#;
		let (forest, _) = build_for(src);
		assert_eq!(forest.global.len(), 2);
		let first = forest.unit(forest.global[0]);
		let second = forest.unit(forest.global[1]);
		// add + (1 + fence cost)
		assert_eq!(first.cost.const_value(), Some(1 + 1 + 50));
		assert!(first.ends_with_fence);
		assert!(!first.with_term);
		// add + ret
		assert_eq!(second.cost.const_value(), Some(2));
		// the intra-block edge is a fence edge
		let edge = forest
			.get(forest.global[0])
			.succs
			.get(&forest.global[1])
			.unwrap();
		assert!(edge.fence);
	}

	#[test]
	fn units_partition_every_instruction() {
		let src = r#"
declare void @pthread_mutex_lock(ptr)
define i32 @f(ptr %m, i32 %x) {
  %entry:
    %a = add i32 %x, 1
    call void @pthread_mutex_lock(ptr %m)
    %b = add i32 %a, 2
    %c = mul i32 %b, 3
    ret i32 %c
}
"#;
		let (forest, program) = build_for(src);
		let func = &program.funcs[0];
		for bb in func.cfg.blocks.iter() {
			let units = forest.block_units.get(&bb.borrow().id).unwrap();
			let mut covered = vec![false; bb.borrow().instrs.len()];
			let mut prev_end = 0;
			for &u in units.iter() {
				let unit = forest.unit(u);
				assert_eq!(unit.first, prev_end);
				for i in unit.first..unit.last {
					assert!(!covered[i]);
					covered[i] = true;
				}
				prev_end = unit.last;
			}
			assert!(covered.into_iter().all(|v| v));
			assert!(forest.unit(*units.last().unwrap()).with_term);
		}
	}
}
