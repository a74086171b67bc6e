use std::collections::HashMap;

use flow::loops::loop_info::{analyze_exits, get_loop_bounds};
use flow::prelude::*;

/// Per-function scratch analyses, rebuilt at the top of each function
/// and after every CFG mutation.
pub struct FuncCx {
	pub dom: DomTree,
	pub pdom: DomTree,
	pub loops: Vec<LoopPtr>,
	pub probs: BranchProbs,
	pub scev: ScevAnalysis,
	pub exits: HashMap<u32, LoopExits>,
	pub bounds: HashMap<u32, LoopBounds>,
	pub blocks: HashMap<i32, Node>,
}

impl FuncCx {
	pub fn analyze(func: &mut Func) -> Self {
		let loops = func.cfg.loop_analysis();
		let dom = DomTree::new(&func.cfg, false);
		let pdom = DomTree::new(&func.cfg, true);
		let probs = BranchProbs::analyze(&func.cfg);
		let scev = ScevAnalysis::analyze(func);
		let mut exits = HashMap::new();
		let mut bounds = HashMap::new();
		for l in loops.iter() {
			let id = l.borrow().id;
			let e = analyze_exits(&func.cfg, l);
			if let Some(b) = get_loop_bounds(l, &e) {
				bounds.insert(id, b);
			}
			exits.insert(id, e);
		}
		let blocks = func
			.cfg
			.blocks
			.iter()
			.map(|b| (b.borrow().id, b.clone()))
			.collect();
		Self {
			dom,
			pdom,
			loops,
			probs,
			scev,
			exits,
			bounds,
			blocks,
		}
	}

	pub fn node(&self, id: i32) -> Node {
		self.blocks.get(&id).cloned().unwrap()
	}

	pub fn loop_of(&self, block: i32) -> Option<u32> {
		self
			.node(block)
			.borrow()
			.loop_
			.as_ref()
			.map(|l| l.borrow().id)
	}

	pub fn loop_ptr(&self, id: u32) -> Option<LoopPtr> {
		self.loops.iter().find(|l| l.borrow().id == id).cloned()
	}

	pub fn is_loop_header(&self, block: i32) -> bool {
		self
			.node(block)
			.borrow()
			.loop_
			.as_ref()
			.map_or(false, |l| l.borrow().header.borrow().id == block)
	}

	/// Whether the block closes or leaves its innermost loop.
	pub fn is_latch_or_exiting(&self, block: i32) -> bool {
		let Some(id) = self.loop_of(block) else {
			return false;
		};
		let Some(exits) = self.exits.get(&id) else {
			return false;
		};
		exits.latch.as_ref().map_or(true, |l| l.borrow().id == block)
			|| exits.exiting.as_ref().map_or(true, |e| e.borrow().id == block)
	}
}
