use std::collections::HashSet;

use flow::prelude::*;
use llvm::LlvmInstrTrait;
use log::warn;

use crate::{
	config::InstrumentConfig,
	cost::{cost_add, cost_const, Cost, CostExt},
	context::FuncCx,
	lcc::{
		DirectProbe, LccForest, LccId, LccKind, LoopPlan, LoopShape,
		ProbeAmount, StripMineJob,
	},
	reduce::find_global_by_entry,
	stats::Stats,
};

pub struct FuncTraits {
	pub is_thread_entry: bool,
	pub is_recursive: bool,
}

/// Walk the reduced forest and decide every probe. Predictive mode may
/// return the function's summarized cost instead of instrumenting its
/// boundary containers.
pub fn evaluate(
	forest: &mut LccForest,
	func: &Func,
	cx: &FuncCx,
	config: &InstrumentConfig,
	traits: &FuncTraits,
	stats: &mut Stats,
) -> Option<Cost> {
	amortize_leftovers(forest, cx, config, stats);
	let order = outer_order(forest, func);
	if config.clock_type == 0 {
		run_predictive(forest, func, cx, config, traits, order, stats)
	} else {
		run_instantaneous(forest, config, order, stats);
		None
	}
}

/// Outermost containers in reverse post-order of their entry blocks.
fn outer_order(forest: &LccForest, func: &Func) -> Vec<LccId> {
	let mut seen = HashSet::new();
	let mut order = Vec::new();
	let in_global: HashSet<LccId> =
		forest.global.iter().copied().collect();
	for bb in func.cfg.rpo() {
		let id = bb.borrow().id;
		let Some(units) = forest.block_units.get(&id) else {
			continue;
		};
		for &u in units.iter() {
			let mut c = u;
			while let Some(p) = forest.get(c).parent {
				c = p;
			}
			if in_global.contains(&c) && seen.insert(c) {
				order.push(c);
			}
		}
	}
	order
}

/// Dangling-container handling: a non-reduced unit whose successors are
/// simple units hands its cost forward as their initial cost; a merge
/// of comparable simple predecessors absorbs their average. The skipped
/// units then emit no probe of their own.
fn amortize_leftovers(
	forest: &mut LccForest,
	cx: &FuncCx,
	config: &InstrumentConfig,
	stats: &mut Stats,
) {
	let mut live: HashSet<LccId> =
		forest.global.iter().copied().collect();
	let is_simple_unit =
		|forest: &LccForest, live: &HashSet<LccId>, id: LccId| {
			live.contains(&id) && forest.get(id).is_unit()
		};

	// inverted-V amortization
	for u in forest.global.clone() {
		if !is_simple_unit(forest, &live, u) {
			continue;
		}
		let Some(c) = forest.unit(u).cost.const_value() else {
			continue;
		};
		let node = forest.get(u);
		if node.succs.is_empty() {
			continue;
		}
		let ok = node.succs.iter().all(|(&s, e)| {
			!e.fence
				&& s != u
				&& is_simple_unit(forest, &live, s)
				&& forest.get(s).preds.len() == 1
				&& !cx.dom.dominates(forest.entry_block(s), forest.exit_block(u))
		});
		if !ok {
			continue;
		}
		let total = c + forest.unit(u).initial;
		let succs: Vec<LccId> =
			forest.get(u).succs.keys().copied().collect();
		for s in succs {
			forest.unit_mut(s).initial += total;
		}
		live.remove(&u);
		stats.amortized_units += 1;
	}

	// V amortization
	for m in forest.global.clone() {
		if !is_simple_unit(forest, &live, m) {
			continue;
		}
		let node = forest.get(m);
		if node.preds.len() < 2 {
			continue;
		}
		let preds: Vec<LccId> = node.preds.keys().copied().collect();
		let ok = node.preds.iter().all(|(&p, e)| {
			!e.fence
				&& p != m
				&& is_simple_unit(forest, &live, p)
				&& forest.get(p).succs.len() == 1
				&& !cx.dom.dominates(forest.entry_block(m), forest.exit_block(p))
		});
		if !ok {
			continue;
		}
		let costs: Vec<i64> = preds
			.iter()
			.filter_map(|&p| {
				forest
					.unit(p)
					.cost
					.const_value()
					.map(|c| c + forest.unit(p).initial)
			})
			.collect();
		if costs.len() != preds.len() {
			continue;
		}
		let spread =
			costs.iter().max().unwrap() - costs.iter().min().unwrap();
		if spread > config.allowed_deviation {
			continue;
		}
		let avg = costs.iter().sum::<i64>() / costs.len() as i64;
		forest.unit_mut(m).initial += avg;
		for p in preds {
			live.remove(&p);
			stats.amortized_units += 1;
		}
	}
	forest.global.retain(|v| live.contains(v));
}

fn amount_of(cost: &Cost) -> Option<ProbeAmount> {
	if let Some(c) = cost.const_value() {
		if c == 0 {
			return None;
		}
		return Some(ProbeAmount::Const(c));
	}
	if cost.is_unknown() {
		warn!("dropping a probe with unknowable cost");
		return None;
	}
	Some(ProbeAmount::Sym(cost.clone()))
}

fn mark_cost(forest: &mut LccForest, container: LccId, cost: &Cost) {
	let unit = forest.exit_unit(container);
	let point = forest.exit_point(unit);
	if let Some(amount) = amount_of(cost) {
		forest.mark(point, amount);
	}
}

fn run_predictive(
	forest: &mut LccForest,
	func: &Func,
	cx: &FuncCx,
	config: &InstrumentConfig,
	traits: &FuncTraits,
	order: Vec<LccId>,
	stats: &mut Stats,
) -> Option<Cost> {
	let entry_block = func.cfg.get_entry().borrow().id;
	let entry = find_global_by_entry(forest, entry_block);
	let exits: Vec<LccId> = order
		.iter()
		.copied()
		.filter(|&c| {
			let unit = forest.exit_unit(c);
			let u = forest.unit(unit);
			u.with_term
				&& cx
					.node(u.block)
					.borrow()
					.jump_instr
					.as_ref()
					.map_or(false, |j| j.is_ret())
		})
		.collect();
	let summarizable = !traits.is_thread_entry
		&& !traits.is_recursive
		&& exits.len() == 1
		&& entry.map_or(false, |e| !forest.get(e).is_sealed())
		&& !forest.get(exits[0]).is_sealed();

	let mut boundary_costs = Vec::new();
	for c in order {
		let cost = eval_pred(forest, config, c, stats);
		if summarizable && (Some(c) == entry || c == exits[0]) {
			boundary_costs.push(cost);
			continue;
		}
		mark_cost(forest, c, &cost);
	}
	if summarizable {
		stats.summarized_functions += 1;
		Some(cost_add(boundary_costs))
	} else {
		None
	}
}

fn eval_pred(
	forest: &mut LccForest,
	config: &InstrumentConfig,
	id: LccId,
	stats: &mut Stats,
) -> Cost {
	match forest.get(id).kind.clone() {
		LccKind::Unit(u) => {
			cost_add(vec![u.cost, cost_const(u.initial)])
		}
		LccKind::Path { head, tail } => {
			let h = eval_pred(forest, config, head, stats);
			let t = eval_pred(forest, config, tail, stats);
			cost_add(vec![h, t])
		}
		LccKind::Branch {
			dom,
			arms,
			has_direct,
			postdom,
			mean,
			instrument_arms,
			..
		} => {
			if !instrument_arms {
				let d = eval_pred(forest, config, dom, stats);
				let p = eval_pred(forest, config, postdom, stats);
				return cost_add(vec![d, mean, p]);
			}
			let d = eval_pred(forest, config, dom, stats);
			for arm in arms {
				let a = eval_pred(forest, config, arm, stats);
				let total = cost_add(vec![d.clone(), a]);
				mark_cost(forest, arm, &total);
			}
			if has_direct {
				if let Some(amount) =
					amount_of(&cost_add(vec![d, cost_const(1)]))
				{
					forest.direct_probes.push(DirectProbe {
						from_block: forest.exit_block(dom),
						to_block: forest.entry_block(postdom),
						amount,
					});
					stats.direct_edge_blocks += 1;
				}
			}
			eval_pred(forest, config, postdom, stats)
		}
		LccKind::ComplexBranch {
			dom,
			inner,
			postdom,
			mean,
			instrument_inner,
		} => {
			if !instrument_inner {
				let d = eval_pred(forest, config, dom, stats);
				let p = eval_pred(forest, config, postdom, stats);
				return cost_add(vec![d, mean, p]);
			}
			let d = eval_pred(forest, config, dom, stats);
			mark_cost(forest, dom, &d);
			for i in inner {
				let c = eval_pred(forest, config, i, stats);
				mark_cost(forest, i, &c);
			}
			eval_pred(forest, config, postdom, stats)
		}
		LccKind::Loop {
			shape,
			plan,
			preheader,
			header,
			body,
			post_exit,
			loop_id,
			total,
			per_iter,
		} => {
			let pre = eval_pred(forest, config, preheader, stats);
			match plan {
				LoopPlan::Whole => {
					let post = eval_pred(forest, config, post_exit, stats);
					cost_add(vec![pre, total, post])
				}
				LoopPlan::SplitPre => {
					mark_cost(forest, preheader, &pre);
					let post = eval_pred(forest, config, post_exit, stats);
					cost_add(vec![total, post])
				}
				LoopPlan::StripMine => {
					mark_cost(forest, preheader, &pre);
					forest.strip_mines.push(StripMineJob {
						loop_id,
						body_cost: per_iter.instrumentable_const().unwrap_or(1),
					});
					eval_pred(forest, config, post_exit, stats)
				}
				LoopPlan::PerIteration => {
					mark_cost(forest, preheader, &pre);
					let h = eval_pred(forest, config, header, stats);
					mark_cost(forest, header, &h);
					if shape == LoopShape::ColocatedExit {
						if let Some(b) = body {
							let c = eval_pred(forest, config, b, stats);
							mark_cost(forest, b, &c);
						}
					}
					eval_pred(forest, config, post_exit, stats)
				}
			}
		}
		LccKind::InvertedV { entry, outs } => {
			let e = eval_pred(forest, config, entry, stats);
			mark_cost(forest, entry, &e);
			for s in outs {
				let c = eval_pred(forest, config, s, stats);
				mark_cost(forest, s, &c);
			}
			cost_const(0)
		}
		LccKind::V { ins, exit } => {
			for p in ins {
				let c = eval_pred(forest, config, p, stats);
				mark_cost(forest, p, &c);
			}
			eval_pred(forest, config, exit, stats)
		}
		LccKind::Unknown {
			entry,
			inner,
			exit,
			entry_committed,
		} => {
			let e = eval_pred(forest, config, entry, stats);
			for i in inner {
				let c = eval_pred(forest, config, i, stats);
				mark_cost(forest, i, &c);
			}
			if entry_committed {
				mark_cost(forest, entry, &e);
				eval_pred(forest, config, exit, stats)
			} else {
				let x = eval_pred(forest, config, exit, stats);
				cost_add(vec![e, x])
			}
		}
	}
}

fn run_instantaneous(
	forest: &mut LccForest,
	config: &InstrumentConfig,
	order: Vec<LccId>,
	stats: &mut Stats,
) {
	for c in order {
		let leftover = eval_inst(forest, config, c, 0, stats);
		if leftover > 0 {
			mark_cost(forest, c, &cost_const(leftover));
		}
	}
}

/// Forward a concrete accumulator, committing in place whenever the
/// commit interval would be crossed. Returns the carry-over.
fn eval_inst(
	forest: &mut LccForest,
	config: &InstrumentConfig,
	id: LccId,
	initial: i64,
	stats: &mut Stats,
) -> i64 {
	let c_bound = config.commit_bound();
	match forest.get(id).kind.clone() {
		LccKind::Unit(u) => {
			let initial = initial + u.initial;
			match u.cost.const_value() {
				Some(c) => {
					let total = initial + c;
					if total > c_bound {
						mark_cost(forest, id, &cost_const(total));
						0
					} else {
						total
					}
				}
				None => {
					let total = cost_add(vec![u.cost, cost_const(initial)]);
					mark_cost(forest, id, &total);
					0
				}
			}
		}
		LccKind::Path { head, tail } => {
			let mid = eval_inst(forest, config, head, initial, stats);
			eval_inst(forest, config, tail, mid, stats)
		}
		LccKind::Branch {
			dom,
			arms,
			has_direct,
			postdom,
			mean,
			instrument_arms,
			..
		} => {
			let mean = mean.const_value().unwrap_or(0);
			if !instrument_arms {
				let d = eval_inst(forest, config, dom, initial, stats);
				return eval_inst(forest, config, postdom, d + mean, stats);
			}
			let d = eval_inst(forest, config, dom, initial, stats);
			for arm in arms {
				let lv = eval_inst(forest, config, arm, d, stats);
				if lv > 0 {
					mark_cost(forest, arm, &cost_const(lv));
				}
			}
			if has_direct {
				forest.direct_probes.push(DirectProbe {
					from_block: forest.exit_block(dom),
					to_block: forest.entry_block(postdom),
					amount: ProbeAmount::Const(d + 1),
				});
				stats.direct_edge_blocks += 1;
			}
			eval_inst(forest, config, postdom, 0, stats)
		}
		LccKind::ComplexBranch {
			dom,
			inner,
			postdom,
			mean,
			instrument_inner,
		} => {
			let mean = mean.const_value().unwrap_or(0);
			if !instrument_inner {
				let d = eval_inst(forest, config, dom, initial, stats);
				return eval_inst(forest, config, postdom, d + mean, stats);
			}
			let d = eval_inst(forest, config, dom, initial, stats);
			if d > 0 {
				mark_cost(forest, dom, &cost_const(d));
			}
			for i in inner {
				let lv = eval_inst(forest, config, i, 0, stats);
				if lv > 0 {
					mark_cost(forest, i, &cost_const(lv));
				}
			}
			eval_inst(forest, config, postdom, 0, stats)
		}
		LccKind::Loop {
			shape,
			plan,
			preheader,
			header,
			body,
			post_exit,
			loop_id,
			total,
			per_iter,
		} => {
			let total = total.const_value().unwrap_or(0);
			let p = eval_inst(forest, config, preheader, initial, stats);
			match plan {
				LoopPlan::Whole => {
					eval_inst(forest, config, post_exit, p + total, stats)
				}
				LoopPlan::SplitPre => {
					if p > 0 {
						mark_cost(forest, preheader, &cost_const(p));
					}
					eval_inst(forest, config, post_exit, total, stats)
				}
				LoopPlan::StripMine => {
					if p > 0 {
						mark_cost(forest, preheader, &cost_const(p));
					}
					forest.strip_mines.push(StripMineJob {
						loop_id,
						body_cost: per_iter.instrumentable_const().unwrap_or(1),
					});
					eval_inst(forest, config, post_exit, 0, stats)
				}
				LoopPlan::PerIteration => {
					if p > 0 {
						mark_cost(forest, preheader, &cost_const(p));
					}
					let h = eval_inst(forest, config, header, 0, stats);
					if h > 0 {
						mark_cost(forest, header, &cost_const(h));
					}
					if shape == LoopShape::ColocatedExit {
						if let Some(b) = body {
							let lv = eval_inst(forest, config, b, 0, stats);
							if lv > 0 {
								mark_cost(forest, b, &cost_const(lv));
							}
						}
					}
					eval_inst(forest, config, post_exit, 0, stats)
				}
			}
		}
		LccKind::InvertedV { entry, outs } => {
			let lv = eval_inst(forest, config, entry, initial, stats);
			if lv > 0 {
				mark_cost(forest, entry, &cost_const(lv));
			}
			for s in outs {
				let lv = eval_inst(forest, config, s, 0, stats);
				if lv > 0 {
					mark_cost(forest, s, &cost_const(lv));
				}
			}
			0
		}
		LccKind::V { ins, exit } => {
			for p in ins {
				let lv = eval_inst(forest, config, p, 0, stats);
				if lv > 0 {
					mark_cost(forest, p, &cost_const(lv));
				}
			}
			eval_inst(forest, config, exit, 0, stats)
		}
		LccKind::Unknown {
			entry,
			inner,
			exit,
			entry_committed,
		} => {
			let e = eval_inst(forest, config, entry, initial, stats);
			for i in inner {
				let lv = eval_inst(forest, config, i, 0, stats);
				if lv > 0 {
					mark_cost(forest, i, &cost_const(lv));
				}
			}
			if entry_committed {
				if e > 0 {
					mark_cost(forest, entry, &cost_const(e));
				}
				eval_inst(forest, config, exit, 0, stats)
			} else {
				eval_inst(forest, config, exit, e, stats)
			}
		}
	}
}
