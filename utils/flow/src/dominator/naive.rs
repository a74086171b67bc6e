// naive algorithm computing dominator tree with complexity O(n*m)

use std::{
	cell::RefCell,
	collections::{HashMap, HashSet, VecDeque},
	rc::Rc,
};

use llvm::LlvmInstrTrait;

use crate::{basicblock::BasicBlock, cfg::CFG, Node};

// 如果要计算反向支配树，计算 dominates 时可能需要创建一个假的出口节点，
// 计算 dominator 和 dominates_directly 时会将它排除在外
pub fn compute_dominator(
	cfg: &CFG,
	reverse: bool,
	dominates: &mut HashMap<i32, Vec<Node>>,
	dominates_directly: &mut HashMap<i32, Vec<Node>>,
	dominator: &mut HashMap<i32, Node>,
) {
	let mut block_has_ret = Vec::new();
	for bb in cfg.blocks.iter() {
		let is_exit = bb.borrow().jump_instr.as_ref().map_or(false, |v| {
			v.is_ret() || v.is_unreachable()
		});
		if is_exit {
			block_has_ret.push(bb.clone());
		}
	}
	let exit;
	if block_has_ret.len() == 1 {
		exit = block_has_ret[0].clone();
	} else {
		exit = Rc::new(RefCell::new(BasicBlock::new(-1, 0.0)));
		block_has_ret.iter().for_each(|bb| {
			bb.borrow_mut().succ.push(exit.clone());
			exit.borrow_mut().prev.push(bb.clone());
		});
	}
	for bb in cfg.blocks.iter() {
		// 尝试将这个 bb 从图中移除，移除后无法访问的节点是被它支配的节点
		let to_be_removed = bb.borrow().id;

		let mut reachable = HashSet::new();
		let mut worklist = VecDeque::new();
		if reverse {
			if to_be_removed != exit.borrow().id {
				worklist.push_back(exit.clone());
			}
		} else if to_be_removed != cfg.get_entry().borrow().id {
			worklist.push_back(cfg.get_entry().clone());
		}
		while let Some(bb) = worklist.pop_front() {
			if reachable.contains(&bb.borrow().id) {
				continue;
			}
			reachable.insert(bb.borrow().id);
			if reverse {
				for pred in bb.borrow().prev.iter() {
					if pred.borrow().id != to_be_removed {
						worklist.push_back(pred.clone());
					}
				}
			} else {
				for succ in bb.borrow().succ.iter() {
					if succ.borrow().id != to_be_removed {
						worklist.push_back(succ.clone());
					}
				}
			}
		}
		cfg.blocks.iter().for_each(|bb_inner| {
			if !reachable.contains(&bb_inner.borrow().id) {
				dominates.entry(bb.borrow().id).or_default().push(bb_inner.clone());
			}
		});
	}
	// 计算完 dominates 后，计算 dominates_directly
	for bb in cfg.blocks.iter() {
		let bb_id = bb.borrow().id;
		let bb_dominates = dominates.get(&bb_id).cloned().unwrap_or_default();
		bb_dominates.iter().for_each(|bb_inner| {
			let bb_inner_id = bb_inner.borrow().id;
			if bb_inner_id == bb_id {
				return;
			}
			if let Some(idom) = dominator.get(&bb_inner_id).cloned() {
				// 如果 bb_inner 的支配者支配了 bb
				let idom_id = idom.borrow().id;
				if dominates
					.get(&idom_id)
					.map_or(false, |v| v.iter().any(|x| x.borrow().id == bb_id))
				{
					dominates_directly.entry(bb_id).or_default().push(bb_inner.clone());
					dominates_directly
						.entry(idom_id)
						.or_default()
						.retain(|x| x.borrow().id != bb_inner_id);
					dominator.insert(bb_inner_id, bb.clone());
				}
			} else {
				dominates_directly.entry(bb_id).or_default().push(bb_inner.clone());
				dominator.insert(bb_inner_id, bb.clone());
			}
		});
	}
	block_has_ret.iter().for_each(|bb| {
		let exit_id = exit.borrow().id;
		if exit_id == -1 {
			bb.borrow_mut().succ.retain(|v| v.borrow().id != exit_id);
		}
	});
	if exit.borrow().id == -1 {
		exit.borrow_mut().prev.clear();
	}
}
