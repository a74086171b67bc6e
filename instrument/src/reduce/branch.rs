use std::collections::HashSet;

use itertools::Itertools;

use crate::{
	config::InstrumentConfig,
	cost::{cost_const, Cost, CostExt},
	costmodel::CostModel,
	context::FuncCx,
	lcc::{LccForest, LccId, LccKind},
	stats::Stats,
};

use super::{postdom_container, static_cost};

fn region_checks(
	forest: &LccForest,
	cx: &FuncCx,
	a: LccId,
	b: LccId,
) -> bool {
	let a_exit = forest.exit_block(a);
	let b_entry = forest.entry_block(b);
	cx.dom.dominates(a_exit, b_entry)
		&& cx.loop_of(a_exit) == cx.loop_of(b_entry)
		&& !cx.is_latch_or_exiting(a_exit)
		&& !cx.is_loop_header(b_entry)
}

fn simplified_cost(
	forest: &LccForest,
	cm: &CostModel,
	id: LccId,
) -> Cost {
	let cost = static_cost(forest, id);
	cm.simplify(&cost).unwrap_or_else(crate::cost::cost_unknown)
}

/// R2: dominator, at most one intermediate container per branch, and a
/// shared post-dominator. The weighted mean absorbs the arms when their
/// spread stays within the allowed deviation; otherwise every arm is
/// scheduled for its own probe.
pub(super) fn try_branch(
	forest: &mut LccForest,
	cx: &FuncCx,
	cm: &CostModel,
	config: &InstrumentConfig,
	stats: &mut Stats,
) -> bool {
	let candidates: Vec<LccId> = forest.global.clone();
	'outer: for a in candidates {
		let na = forest.get(a);
		if na.is_sealed() || na.succs.is_empty() {
			continue;
		}
		if na.succs.values().any(|e| e.fence) {
			continue;
		}
		let Some(b) = postdom_container(forest, cx, a) else {
			continue;
		};
		if forest.get(b).is_sealed() || !region_checks(forest, cx, a, b) {
			continue;
		}
		let a_exit = forest.exit_block(a);
		// a switch whose cases merge shows more terminator targets than
		// container successors; refuse the reduction
		let term_count = cx.node(a_exit).borrow().term_labels().len();
		if term_count != forest.get(a).succs.len() {
			continue;
		}
		let mut arms = Vec::new();
		let mut has_direct = false;
		for (&s, _) in forest.get(a).succs.iter() {
			if s == b {
				has_direct = true;
				continue;
			}
			let ns = forest.get(s);
			if ns.is_sealed() || ns.preds.len() != 1 {
				continue 'outer;
			}
			if ns.succs.len() != 1 {
				continue 'outer;
			}
			let (&t, edge) = ns.succs.iter().next().unwrap();
			if t != b || edge.fence {
				continue 'outer;
			}
			arms.push(s);
		}
		if arms.is_empty() && !has_direct {
			continue;
		}
		// the merge must be private to this region
		let arm_set: HashSet<LccId> = arms.iter().copied().collect();
		let ok = forest
			.get(b)
			.preds
			.keys()
			.all(|p| *p == a || arm_set.contains(p));
		if !ok {
			continue;
		}

		arms.sort();
		let b_entry = forest.entry_block(b);
		let mut arm_probs: Vec<f64> = arms
			.iter()
			.map(|&m| cx.probs.prob_f64(a_exit, forest.entry_block(m)))
			.collect();
		if has_direct {
			arm_probs.push(cx.probs.prob_f64(a_exit, b_entry));
		}
		let arm_costs: Vec<Cost> =
			arms.iter().map(|&m| simplified_cost(forest, cm, m)).collect();
		let mut consts: Vec<i64> =
			arm_costs.iter().filter_map(|c| c.const_value()).collect();
		if has_direct {
			consts.push(0);
		}
		let all_const = consts.len() == arm_costs.len() + has_direct as usize;
		let spread = match consts.iter().minmax().into_option() {
			Some((lo, hi)) => hi - lo,
			None => 0,
		};
		let instrument_arms =
			!all_const || spread > config.allowed_deviation;
		let mean = if instrument_arms {
			cost_const(0)
		} else {
			stats.rule2_saves += 1;
			let weighted: f64 = consts
				.iter()
				.zip(arm_probs.iter())
				.map(|(c, p)| *c as f64 * p)
				.sum();
			cost_const(weighted.round() as i64)
		};

		let back = forest.get(b).succs.get(&a).copied();
		let mut children = vec![a];
		children.extend(arms.iter().copied());
		children.push(b);
		forest.compose(
			LccKind::Branch {
				dom: a,
				arms,
				arm_probs,
				has_direct,
				postdom: b,
				mean,
				instrument_arms,
			},
			children,
			back,
		);
		return true;
	}
	false
}

const MAX_DAG_PATHS: usize = 64;

/// R4: same dominator/post-dominator frame as R2 but the region between
/// is an arbitrary fence-free DAG of unit containers. Paths are weighted
/// by their edge-probability product.
pub(super) fn try_complex(
	forest: &mut LccForest,
	cx: &FuncCx,
	cm: &CostModel,
	config: &InstrumentConfig,
	stats: &mut Stats,
) -> bool {
	let candidates: Vec<LccId> = forest.global.clone();
	for a in candidates {
		let na = forest.get(a);
		if na.is_sealed() || na.succs.len() < 2 {
			continue;
		}
		if na.succs.values().any(|e| e.fence) {
			continue;
		}
		let Some(b) = postdom_container(forest, cx, a) else {
			continue;
		};
		if forest.get(b).is_sealed() || !region_checks(forest, cx, a, b) {
			continue;
		}
		let Some(region) = collect_region(forest, a, b) else {
			continue;
		};
		if region.is_empty() {
			continue;
		}
		let Some(paths) = enumerate_paths(forest, a, b, &region) else {
			continue;
		};

		let a_exit_loop = cx.loop_of(forest.exit_block(a));
		if region
			.iter()
			.any(|&s| cx.loop_of(forest.entry_block(s)) != a_exit_loop)
		{
			continue;
		}

		let mut costs = Vec::new();
		let mut all_const = true;
		for path in paths.iter() {
			let mut prob = 1.0;
			let mut prev = a;
			let mut cost = 0i64;
			for &s in path.iter() {
				prob *= cx.probs.prob_f64(
					forest.exit_block(prev),
					forest.entry_block(s),
				);
				match simplified_cost(forest, cm, s).const_value() {
					Some(c) => cost += c,
					None => all_const = false,
				}
				prev = s;
			}
			prob *= cx
				.probs
				.prob_f64(forest.exit_block(prev), forest.entry_block(b));
			costs.push((prob, cost));
		}
		let spread = match costs.iter().map(|(_, c)| *c).minmax().into_option()
		{
			Some((lo, hi)) => hi - lo,
			None => 0,
		};
		let instrument_inner =
			!all_const || spread > config.allowed_deviation;
		let mean = if instrument_inner {
			cost_const(0)
		} else {
			stats.rule7_saves += 1;
			let total_p: f64 = costs.iter().map(|(p, _)| *p).sum();
			let weighted: f64 =
				costs.iter().map(|(p, c)| p * *c as f64).sum();
			cost_const((weighted / total_p.max(f64::EPSILON)).round() as i64)
		};

		let back = forest.get(b).succs.get(&a).copied();
		let inner: Vec<LccId> = region.iter().copied().collect();
		let mut children = vec![a];
		children.extend(inner.iter().copied());
		children.push(b);
		forest.compose(
			LccKind::ComplexBranch {
				dom: a,
				inner,
				postdom: b,
				mean,
				instrument_inner,
			},
			children,
			back,
		);
		return true;
	}
	false
}

/// Gather the unit containers strictly between `a` and `b`; `None` when
/// the region is not single-entry/single-exit or touches a fence.
fn collect_region(
	forest: &LccForest,
	a: LccId,
	b: LccId,
) -> Option<HashSet<LccId>> {
	let mut region = HashSet::new();
	let mut stack: Vec<LccId> = forest
		.get(a)
		.succs
		.keys()
		.copied()
		.filter(|&s| s != b)
		.collect();
	while let Some(s) = stack.pop() {
		if s == a {
			return None;
		}
		if !region.insert(s) {
			continue;
		}
		if !forest.get(s).is_unit() {
			return None;
		}
		for (&t, edge) in forest.get(s).succs.iter() {
			if edge.fence {
				return None;
			}
			if t != b {
				stack.push(t);
			}
		}
	}
	for &s in region.iter() {
		let ok = forest
			.get(s)
			.preds
			.iter()
			.all(|(p, e)| !e.fence && (*p == a || region.contains(p)));
		if !ok {
			return None;
		}
	}
	let ok = forest
		.get(b)
		.preds
		.keys()
		.all(|p| *p == a || region.contains(p));
	if !ok {
		return None;
	}
	Some(region)
}

/// All DAG paths from `a` to `b` through the region (capped; a cycle or
/// an oversized region rejects the rule).
fn enumerate_paths(
	forest: &LccForest,
	a: LccId,
	b: LccId,
	region: &HashSet<LccId>,
) -> Option<Vec<Vec<LccId>>> {
	let mut paths = Vec::new();
	let mut stack_path: Vec<LccId> = Vec::new();
	let mut on_path: HashSet<LccId> = HashSet::new();
	fn dfs(
		forest: &LccForest,
		cur: LccId,
		b: LccId,
		region: &HashSet<LccId>,
		stack_path: &mut Vec<LccId>,
		on_path: &mut HashSet<LccId>,
		paths: &mut Vec<Vec<LccId>>,
	) -> bool {
		for (&t, _) in forest.get(cur).succs.iter() {
			if t == b {
				paths.push(stack_path.clone());
				if paths.len() > MAX_DAG_PATHS {
					return false;
				}
				continue;
			}
			if !region.contains(&t) {
				return false;
			}
			if on_path.contains(&t) {
				// a cycle: not a DAG region
				return false;
			}
			stack_path.push(t);
			on_path.insert(t);
			let ok =
				dfs(forest, t, b, region, stack_path, on_path, paths);
			stack_path.pop();
			on_path.remove(&t);
			if !ok {
				return false;
			}
		}
		true
	}
	if dfs(
		forest,
		a,
		b,
		region,
		&mut stack_path,
		&mut on_path,
		&mut paths,
	) {
		Some(paths)
	} else {
		None
	}
}
