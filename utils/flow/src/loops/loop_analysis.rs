use std::{cell::RefCell, rc::Rc};

use crate::{cfg::CFG, Node};

use super::{Loop, LoopPtr};

impl CFG {
	/// Rebuild the natural-loop forest. Recomputes the dominator tree
	/// first; every block's `loop_` points at its innermost loop.
	pub fn loop_analysis(&mut self) -> Vec<LoopPtr> {
		self.compute_dominator();
		let mut next_id = 0;
		loop_dfs(self.get_entry(), self, &mut next_id);
		for bb in self.blocks.iter() {
			calc_loop_level(bb.borrow().loop_.clone());
		}
		// 收集所有的 loop
		let mut loops = Vec::new();
		for bb in self.blocks.iter() {
			let mut cur = bb.borrow().loop_.clone();
			while let Some(l) = cur {
				if !loops.iter().any(|v: &LoopPtr| *v.borrow() == *l.borrow()) {
					loops.push(l.clone());
				}
				cur = l.borrow().outer.clone();
			}
		}
		loops
	}
}

fn calc_loop_level(loop_: Option<LoopPtr>) {
	if let Some(l) = loop_ {
		if l.borrow().level != -1 {
			return;
		}
		let outer = l.borrow().outer.clone();
		if let Some(outer) = outer {
			calc_loop_level(Some(outer.clone()));
			l.borrow_mut().level = outer.borrow().level + 1;
		} else {
			l.borrow_mut().level = 1;
		}
	}
}

// dfs on dom tree; a predecessor dominated by the current block closes a
// backedge, everything reaching it without leaving the region is the loop
pub fn loop_dfs(cur_bb: Node, cfg: &CFG, next_id: &mut u32) {
	cur_bb.borrow_mut().loop_ = None;
	for next in cur_bb.borrow().dominates_directly.iter() {
		loop_dfs(next.clone(), cfg, next_id);
	}
	let mut bbs = Vec::new();
	for prev in cur_bb.borrow().prev.iter() {
		if cur_bb.borrow().dominates.contains(prev) {
			bbs.push(prev.clone());
		}
	}
	if !bbs.is_empty() {
		let ptr_to_self = cfg
			.blocks
			.iter()
			.find(|bb| bb.borrow().id == cur_bb.borrow().id)
			.unwrap()
			.clone();
		*next_id += 1;
		let new_loop =
			Rc::new(RefCell::new(Loop::new(*next_id, ptr_to_self)));
		while let Some(bb) = bbs.pop() {
			if bb.borrow().loop_.is_none() {
				bb.borrow_mut().loop_ = Some(new_loop.clone());
				if bb.borrow().id != cur_bb.borrow().id {
					bbs.append(bb.borrow().prev.clone().as_mut());
				}
			} else {
				let mut inner_loop = bb.borrow().loop_.clone().unwrap();
				let mut outer_loop = inner_loop.borrow().outer.clone();
				while let Some(outer) = outer_loop.clone() {
					inner_loop = outer;
					outer_loop = inner_loop.borrow().outer.clone();
				}
				if *inner_loop.borrow() == *new_loop.borrow() {
					continue;
				}
				new_loop.borrow_mut().no_inner = false;
				inner_loop.borrow_mut().outer = Some(new_loop.clone());
				bbs.append(inner_loop.borrow().header.borrow().prev.clone().as_mut());
			}
		}
	}
}
