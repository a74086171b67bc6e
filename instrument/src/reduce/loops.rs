use llvm::LlvmTemp;

use crate::{
	config::InstrumentConfig,
	cost::{cost_add, cost_const, cost_mul, cost_unknown, Cost, CostExt},
	costmodel::{scev_to_cost, CostModel},
	context::FuncCx,
	lcc::{LccForest, LccId, LccKind, LoopPlan, LoopShape},
	stats::Stats,
};

use super::static_cost;

/// R3: collapse a natural loop with a dedicated preheader, unique
/// latch, unique exiting block and unique exit into a Loop container,
/// choosing how its iterations get accounted.
pub(super) fn try_loop(
	forest: &mut LccForest,
	cx: &FuncCx,
	cm: &CostModel,
	config: &InstrumentConfig,
	params: &[LlvmTemp],
	stats: &mut Stats,
) -> bool {
	let candidates: Vec<LccId> = forest.global.clone();
	for h in candidates {
		if forest.get(h).is_sealed() {
			continue;
		}
		let hb = forest.entry_block(h);
		if !cx.is_loop_header(hb) {
			continue;
		}
		let Some(l_id) = cx.loop_of(hb) else { continue };
		let Some(exits) = cx.exits.get(&l_id) else { continue };
		let (Some(pre), Some(latch), Some(exiting), Some(exit)) = (
			exits.preheader.as_ref(),
			exits.latch.as_ref(),
			exits.exiting.as_ref(),
			exits.exit.as_ref(),
		) else {
			continue;
		};
		let (pre_b, latch_b, exiting_b, exit_b) = (
			pre.borrow().id,
			latch.borrow().id,
			exiting.borrow().id,
			exit.borrow().id,
		);

		let reduced = if forest.get(h).succs.contains_key(&h) {
			reduce_rolled(
				forest, cx, cm, config, params, stats, h, l_id, pre_b, latch_b,
				exiting_b, exit_b,
			)
		} else if exiting_b == hb {
			reduce_colocated(
				forest, cx, cm, config, params, stats, h, l_id, pre_b, exit_b,
			)
		} else {
			false
		};
		if reduced {
			return true;
		}
	}
	false
}

/// Self-loops and fully collapsed header-non-colocated loops: a single
/// container carrying a self-edge between a preheader and a post-exit.
#[allow(clippy::too_many_arguments)]
fn reduce_rolled(
	forest: &mut LccForest,
	cx: &FuncCx,
	cm: &CostModel,
	config: &InstrumentConfig,
	params: &[LlvmTemp],
	stats: &mut Stats,
	h: LccId,
	l_id: u32,
	pre_b: i32,
	latch_b: i32,
	exiting_b: i32,
	exit_b: i32,
) -> bool {
	if forest.exit_block(h) != exiting_b {
		return false;
	}
	let nh = forest.get(h);
	if nh.preds.len() != 2 || nh.succs.len() != 2 {
		return false;
	}
	if nh.succs.get(&h).map_or(true, |e| e.fence) {
		return false;
	}
	let Some(&p) = nh.preds.keys().find(|&&k| k != h) else {
		return false;
	};
	let Some(&e) = nh.succs.keys().find(|&&k| k != h) else {
		return false;
	};
	if p == e || forest.get(p).is_sealed() || forest.get(e).is_sealed() {
		return false;
	}
	if forest.exit_block(p) != pre_b || forest.entry_block(e) != exit_b {
		return false;
	}
	if forest.get(p).succs.len() != 1
		|| forest.get(p).succs.values().any(|x| x.fence)
	{
		return false;
	}
	if forest.get(e).preds.len() != 1
		|| forest.get(e).preds.values().any(|x| x.fence)
	{
		return false;
	}

	let hb = forest.entry_block(h);
	let shape = if hb == latch_b {
		LoopShape::SelfLoop
	} else {
		LoopShape::NonColocatedExit
	};
	let per_iter = simplify_or_unknown(cm, static_cost(forest, h));
	let btc = backedge_cost(cx, cm, params, l_id);
	// the body runs once more than the backedge
	let total = simplify_or_unknown(
		cm,
		cost_mul(vec![
			cost_add(vec![btc, cost_const(1)]),
			per_iter.clone(),
		]),
	);
	let pre_cost = simplify_or_unknown(cm, static_cost(forest, p));
	let plan = choose_plan(config, &total, &per_iter, &pre_cost, stats);

	forest.compose(
		LccKind::Loop {
			shape,
			plan,
			preheader: p,
			header: h,
			body: None,
			post_exit: e,
			loop_id: l_id,
			total,
			per_iter,
		},
		vec![p, h, e],
		None,
	);
	true
}

/// While-shaped loops: the header tests the exit condition and a
/// separate body container cycles back to it.
#[allow(clippy::too_many_arguments)]
fn reduce_colocated(
	forest: &mut LccForest,
	cx: &FuncCx,
	cm: &CostModel,
	config: &InstrumentConfig,
	params: &[LlvmTemp],
	stats: &mut Stats,
	h: LccId,
	l_id: u32,
	pre_b: i32,
	exit_b: i32,
) -> bool {
	let nh = forest.get(h);
	if nh.preds.len() != 2 || nh.succs.len() != 2 {
		return false;
	}
	if nh.succs.values().any(|e| e.fence) {
		return false;
	}
	let mut body = None;
	let mut post = None;
	for &s in nh.succs.keys() {
		if forest.entry_block(s) == exit_b {
			post = Some(s);
		} else {
			body = Some(s);
		}
	}
	let (Some(b), Some(e)) = (body, post) else {
		return false;
	};
	if forest.get(b).is_sealed() || forest.get(e).is_sealed() {
		return false;
	}
	// the body cycles straight back to the header
	let nb = forest.get(b);
	if nb.preds.len() != 1 || nb.succs.len() != 1 {
		return false;
	}
	if !nb.succs.contains_key(&h) || nb.succs.values().any(|x| x.fence) {
		return false;
	}
	let Some(&p) = forest.get(h).preds.keys().find(|&&k| k != b) else {
		return false;
	};
	if p == e || forest.get(p).is_sealed() {
		return false;
	}
	if forest.exit_block(p) != pre_b {
		return false;
	}
	if forest.get(p).succs.len() != 1
		|| forest.get(p).succs.values().any(|x| x.fence)
	{
		return false;
	}
	if forest.get(e).preds.len() != 1
		|| forest.get(e).preds.values().any(|x| x.fence)
	{
		return false;
	}

	let header_cost = simplify_or_unknown(cm, static_cost(forest, h));
	let body_cost = simplify_or_unknown(cm, static_cost(forest, b));
	let per_iter = cost_add(vec![header_cost.clone(), body_cost]);
	let btc = backedge_cost(cx, cm, params, l_id);
	// the header runs once more than the body
	let total = simplify_or_unknown(
		cm,
		cost_add(vec![
			cost_mul(vec![btc, per_iter.clone()]),
			header_cost,
		]),
	);
	let pre_cost = simplify_or_unknown(cm, static_cost(forest, p));
	let plan = choose_plan(config, &total, &per_iter, &pre_cost, stats);

	forest.compose(
		LccKind::Loop {
			shape: LoopShape::ColocatedExit,
			plan,
			preheader: p,
			header: h,
			body: Some(b),
			post_exit: e,
			loop_id: l_id,
			total,
			per_iter,
		},
		vec![p, h, b, e],
		None,
	);
	true
}

fn simplify_or_unknown(cm: &CostModel, cost: Cost) -> Cost {
	cm.simplify(&cost).unwrap_or_else(cost_unknown)
}

fn backedge_cost(
	cx: &FuncCx,
	cm: &CostModel,
	params: &[LlvmTemp],
	l_id: u32,
) -> Cost {
	match cx.bounds.get(&l_id) {
		Some(bounds) => {
			let btc = cx.scev.backedge_taken(bounds);
			let cost = scev_to_cost(&btc, params);
			cm.simplify(&cost).unwrap_or_else(cost_unknown)
		}
		None => cost_unknown(),
	}
}

/// Decide how the iterations get accounted, in order of preference:
/// one probe at the post-exit, preheader split off, strip-mining, and
/// per-iteration probes as the last resort.
fn choose_plan(
	config: &InstrumentConfig,
	total: &Cost,
	per_iter: &Cost,
	pre_cost: &Cost,
	stats: &mut Stats,
) -> LoopPlan {
	let c = config.commit_bound();
	match (total.const_value(), pre_cost.const_value()) {
		(Some(t), Some(p)) if t + p <= c => return LoopPlan::Whole,
		(Some(t), Some(p)) if t <= c && p <= c => {
			return LoopPlan::SplitPre
		}
		_ => {}
	}
	// a predictive clock can carry a symbolic loop cost to the
	// post-exit as a value probe
	if config.clock_type == 0
		&& total.const_value().is_none()
		&& total.expandable()
	{
		return LoopPlan::Whole;
	}
	if per_iter.instrumentable_const().is_some() {
		stats.loops_strip_mined += 1;
		LoopPlan::StripMine
	} else {
		stats.loops_per_iteration += 1;
		LoopPlan::PerIteration
	}
}
