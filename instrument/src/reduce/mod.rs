mod branch;
mod fence;
mod loops;

use flow::prelude::*;
use llvm::LlvmTemp;

use crate::{
	config::InstrumentConfig,
	cost::{cost_add, cost_const, Cost},
	costmodel::CostModel,
	context::FuncCx,
	lcc::{LccForest, LccId, LccKind, LoopPlan},
	stats::Stats,
};

/// Iteratively apply the production rules until none fires. Every rule
/// strictly shrinks the outer container list, so this terminates.
pub fn reduce(
	forest: &mut LccForest,
	func: &Func,
	cx: &FuncCx,
	cm: &CostModel,
	config: &InstrumentConfig,
	stats: &mut Stats,
) {
	let params: Vec<LlvmTemp> =
		func.params.iter().filter_map(|v| v.unwrap_temp()).collect();
	loop {
		if try_path(forest, cx) {
			stats.rule_path += 1;
			continue;
		}
		if branch::try_branch(forest, cx, cm, config, stats) {
			stats.rule_branch += 1;
			continue;
		}
		if loops::try_loop(forest, cx, cm, config, &params, stats) {
			stats.rule_loop += 1;
			continue;
		}
		if branch::try_complex(forest, cx, cm, config, stats) {
			stats.rule_complex += 1;
			continue;
		}
		if fence::try_inverted_v(forest) {
			stats.rule_inverted_v += 1;
			continue;
		}
		if fence::try_v(forest) {
			stats.rule_v += 1;
			continue;
		}
		if fence::try_unknown(forest, cx) {
			stats.rule_unknown += 1;
			continue;
		}
		break;
	}
}

/// Static cost contract of a container, assuming the accounting already
/// decided for its children (instrumented parts contribute nothing).
pub fn static_cost(forest: &LccForest, id: LccId) -> Cost {
	match &forest.get(id).kind {
		LccKind::Unit(u) => u.cost.clone(),
		LccKind::Path { head, tail } => cost_add(vec![
			static_cost(forest, *head),
			static_cost(forest, *tail),
		]),
		LccKind::Branch {
			dom,
			postdom,
			mean,
			instrument_arms,
			..
		} => {
			if *instrument_arms {
				static_cost(forest, *postdom)
			} else {
				cost_add(vec![
					static_cost(forest, *dom),
					mean.clone(),
					static_cost(forest, *postdom),
				])
			}
		}
		LccKind::ComplexBranch {
			dom,
			postdom,
			mean,
			instrument_inner,
			..
		} => {
			if *instrument_inner {
				static_cost(forest, *postdom)
			} else {
				cost_add(vec![
					static_cost(forest, *dom),
					mean.clone(),
					static_cost(forest, *postdom),
				])
			}
		}
		LccKind::Loop {
			plan,
			preheader,
			post_exit,
			total,
			..
		} => match plan {
			LoopPlan::Whole => cost_add(vec![
				static_cost(forest, *preheader),
				total.clone(),
				static_cost(forest, *post_exit),
			]),
			LoopPlan::SplitPre => cost_add(vec![
				total.clone(),
				static_cost(forest, *post_exit),
			]),
			LoopPlan::StripMine | LoopPlan::PerIteration => {
				static_cost(forest, *post_exit)
			}
		},
		LccKind::InvertedV { .. } => cost_const(0),
		LccKind::V { exit, .. } => static_cost(forest, *exit),
		LccKind::Unknown {
			entry,
			exit,
			entry_committed,
			..
		} => {
			if *entry_committed {
				static_cost(forest, *exit)
			} else {
				cost_add(vec![
					static_cost(forest, *entry),
					static_cost(forest, *exit),
				])
			}
		}
	}
}

/// Lift the block-level immediate post-dominator of `a`'s exit to an
/// outer container.
pub(super) fn postdom_container(
	forest: &LccForest,
	cx: &FuncCx,
	a: LccId,
) -> Option<LccId> {
	let a_exit = forest.exit_block(a);
	let pb = cx.pdom.idom(a_exit)?;
	let pb = pb.borrow().id;
	if pb < 0 {
		return None;
	}
	let b = find_global_by_entry(forest, pb)?;
	if b == a {
		return None;
	}
	Some(b)
}

/// The outer container opening at the given block's first unit.
pub fn find_global_by_entry(
	forest: &LccForest,
	block: i32,
) -> Option<LccId> {
	let first = *forest.block_units.get(&block)?.first()?;
	forest
		.global
		.iter()
		.copied()
		.find(|&c| forest.entry_unit(c) == first)
}

/// R1: collapse a fence-free single-successor / single-predecessor pair.
fn try_path(forest: &mut LccForest, cx: &FuncCx) -> bool {
	let candidates: Vec<LccId> = forest.global.clone();
	for a in candidates {
		let na = forest.get(a);
		if na.is_sealed() || na.succs.len() != 1 {
			continue;
		}
		let (&b, edge) = na.succs.iter().next().unwrap();
		if edge.fence || b == a {
			continue;
		}
		let nb = forest.get(b);
		if nb.is_sealed() || nb.preds.len() != 1 || nb.succs.len() > 1 {
			continue;
		}
		if cx.is_loop_header(forest.entry_block(b)) {
			continue;
		}
		if cx.loop_of(forest.exit_block(a))
			!= cx.loop_of(forest.entry_block(b))
		{
			continue;
		}
		let back = nb.succs.get(&a).copied();
		forest.compose(LccKind::Path { head: a, tail: b }, vec![a, b], back);
		return true;
	}
	false
}
