use std::{cell::RefCell, collections::HashMap, rc::Rc};

use flow::{
	basicblock::split_block_predecessors,
	loops::utils::insert_preheader_for_loop,
	prelude::*,
};
use llvm::{JumpInstr, LlvmInstrTrait, TempManager};
use log::trace;
use utils::Label;

use crate::{
	cost::cost_const,
	lcc::{LccForest, ProbePoint, ProbeSlot, UnitLcc},
};

/// The backward direction (privatizing a shared dominator instead of a
/// shared merge) is kept but not wired in.
const BACKWARD_SHAPING: bool = false;

/// Pre-reduction normalization: give every loop a dedicated preheader,
/// then privatize merge blocks shared between nested forward branches
/// so the region between a branch and its join becomes single-entry /
/// single-exit.
pub fn shape_pre(func: &mut Func, temp_mgr: &mut TempManager) {
	loop {
		let loops = func.cfg.loop_analysis();
		let mut changed = false;
		for l in loops {
			let header = l.borrow().header.clone();
			let dedicated = header.borrow().prev.iter().any(|p| {
				!l.borrow().contains_block(p) && p.borrow().single_succ()
			}) && header
				.borrow()
				.prev
				.iter()
				.filter(|p| !l.borrow().contains_block(p))
				.count() == 1;
			if !dedicated
				&& insert_preheader_for_loop(l.clone(), func, temp_mgr).is_some()
			{
				changed = true;
				break;
			}
		}
		if changed {
			continue;
		}
		if split_shared_merge(func, temp_mgr) {
			continue;
		}
		if BACKWARD_SHAPING && split_shared_entry(func, temp_mgr) {
			continue;
		}
		break;
	}
}

/// Find a branch block whose post-dominator also merges paths that do
/// not come from under it, and give the branch a private merge block.
fn split_shared_merge(func: &mut Func, temp_mgr: &mut TempManager) -> bool {
	func.cfg.compute_dominator();
	let pdom = DomTree::new(&func.cfg, true);
	let blocks = func.cfg.blocks.clone();
	let dom = DomTree::new(&func.cfg, false);
	for x in blocks.iter() {
		if x.borrow().succ.len() < 2 {
			continue;
		}
		let xid = x.borrow().id;
		let Some(p) = pdom.idom(xid) else { continue };
		let pid = p.borrow().id;
		if pid < 0 {
			continue;
		}
		let loop_id = |n: &Node| {
			n.borrow().loop_.as_ref().map(|l| l.borrow().id)
		};
		if loop_id(x) != loop_id(&p) {
			continue;
		}
		let preds = p.borrow().prev.clone();
		let dominated: Vec<Node> = preds
			.iter()
			.filter(|s| dom.dominates(xid, s.borrow().id))
			.cloned()
			.collect();
		if dominated.len() < 2 || dominated.len() == preds.len() {
			continue;
		}
		// a back-edge from outside must not enter the split-off region
		let safe = dominated.iter().all(|s| {
			loop_id(s) == loop_id(x)
				&& !dom.dominates(pid, s.borrow().id)
				&& s.borrow()
					.prev
					.iter()
					.all(|sp| dom.dominates(xid, sp.borrow().id))
		});
		if !safe {
			continue;
		}
		trace!(
			"privatizing merge {} under branch {}",
			p.borrow().label(),
			x.borrow().label()
		);
		return split_block_predecessors(
			p.clone(),
			dominated,
			func,
			temp_mgr,
		)
		.is_some();
	}
	false
}

/// Mirror of `split_shared_merge` on the dominator side. Unused while
/// `BACKWARD_SHAPING` stays off.
#[allow(dead_code)]
fn split_shared_entry(
	func: &mut Func,
	temp_mgr: &mut TempManager,
) -> bool {
	func.cfg.compute_dominator();
	let dom = DomTree::new(&func.cfg, false);
	let blocks = func.cfg.blocks.clone();
	for p in blocks.iter() {
		if p.borrow().prev.len() < 2 {
			continue;
		}
		let pid = p.borrow().id;
		let Some(x) = dom.idom(pid) else { continue };
		let preds = p.borrow().prev.clone();
		let shared: Vec<Node> = preds
			.iter()
			.filter(|s| !dom.dominates(x.borrow().id, s.borrow().id))
			.cloned()
			.collect();
		if shared.len() < 2 || shared.len() == preds.len() {
			continue;
		}
		return split_block_predecessors(p.clone(), shared, func, temp_mgr)
			.is_some();
	}
	false
}

/// Post-evaluation shaping: materialize a block on every direct
/// dominator→postdominator edge scheduled for instrumentation and hang
/// the probe on it.
pub fn shape_post(forest: &mut LccForest, func: &mut Func) {
	let probes = std::mem::take(&mut forest.direct_probes);
	for dp in probes {
		let (Some(from), Some(to)) = (
			func.cfg.block_by_id(dp.from_block),
			func.cfg.block_by_id(dp.to_block),
		) else {
			continue;
		};
		let new_bb = block_on_edge(func, &from, &to);
		let id = new_bb.borrow().id;
		forest.register_unit(UnitLcc {
			block: id,
			first: 0,
			last: 0,
			with_term: true,
			ends_with_fence: false,
			cost: cost_const(0),
			initial: 0,
		});
		forest.mark(
			ProbePoint {
				block: id,
				slot: ProbeSlot::BeforeTerm,
			},
			dp.amount,
		);
	}
}

fn block_on_edge(func: &mut Func, from: &Node, to: &Node) -> Node {
	let new_bb = func.new_basicblock(from.borrow().weight);
	let new_bb = Rc::new(RefCell::new(new_bb));
	let to_label = to.borrow().label();
	let from_label = from.borrow().label();
	new_bb.borrow_mut().set_jump(Some(JumpInstr::new(to_label.clone())));

	let map: HashMap<Label, Label> =
		[(to_label.clone(), new_bb.borrow().label())]
			.into_iter()
			.collect();
	if let Some(term) = from.borrow_mut().jump_instr.as_mut() {
		term.map_label(&map);
	}
	let to_id = to.borrow().id;
	from.borrow_mut().succ.retain(|s| s.borrow().id != to_id);
	from.borrow_mut().succ.push(new_bb.clone());
	to.borrow_mut().replace_prev(&from_label, new_bb.clone());
	new_bb.borrow_mut().prev.push(from.clone());
	new_bb.borrow_mut().succ.push(to.clone());
	// the fresh block rides along in the branch's loop
	new_bb.borrow_mut().loop_ = from.borrow().loop_.clone();
	new_bb.borrow_mut().dominator = Some(from.clone());

	let pos = func.cfg.blocks.iter().position(|v| *v == *from).unwrap();
	func.cfg.blocks.insert(pos + 1, new_bb.clone());
	new_bb
}
