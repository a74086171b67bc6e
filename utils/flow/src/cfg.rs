use std::collections::{HashMap, HashSet};

use utils::Label;

pub use crate::basicblock::{BasicBlock, Node};

pub struct CFG {
	pub blocks: Vec<Node>,
}

impl CFG {
	pub fn new(id: i32, weight: f64) -> Self {
		Self {
			blocks: vec![BasicBlock::new_node(id, weight)],
		}
	}
	pub fn get_entry(&self) -> Node {
		self.blocks.first().unwrap().clone()
	}
	pub fn size(&self) -> usize {
		self.blocks.len()
	}
	pub fn block_of(&self, label: &Label) -> Option<Node> {
		self.blocks.iter().find(|v| v.borrow().label() == *label).cloned()
	}
	pub fn block_by_id(&self, id: i32) -> Option<Node> {
		self.blocks.iter().find(|v| v.borrow().id == id).cloned()
	}
	pub fn make_pretty(&mut self) {
		self.blocks.iter().for_each(|v| v.borrow_mut().make_pretty())
	}
	/// Rebuild `prev` lists from `succ` lists and drop phi sources whose
	/// predecessor edge no longer exists.
	pub fn resolve_prev(&mut self) {
		self.blocks.iter().for_each(|v| v.borrow_mut().prev.clear());
		self.blocks.iter().for_each(|u| {
			let succ = u.borrow().succ.clone();
			for v in succ {
				v.borrow_mut().prev.push(u.clone());
			}
		});
		for block in self.blocks.iter() {
			let labels: HashSet<_> =
				block.borrow().prev.iter().map(|v| v.borrow().label()).collect();
			for instr in block.borrow_mut().phi_instrs.iter_mut() {
				instr.source.retain(|(_, label)| labels.contains(label))
			}
		}
	}
	/// Reverse post-order over successor edges from the entry.
	pub fn rpo(&self) -> Vec<Node> {
		let mut visited = HashSet::new();
		let mut order = Vec::new();
		// iterative DFS keeping an explicit expansion state
		let mut stack = vec![(self.get_entry(), false)];
		while let Some((node, expanded)) = stack.pop() {
			let id = node.borrow().id;
			if expanded {
				order.push(node);
				continue;
			}
			if !visited.insert(id) {
				continue;
			}
			stack.push((node.clone(), true));
			for succ in node.borrow().succ.iter() {
				if !visited.contains(&succ.borrow().id) {
					stack.push((succ.clone(), false));
				}
			}
		}
		order.reverse();
		order
	}
	/// 计算正向支配树并将信息存在每一个节点中, 计算前会清空支配树信息
	pub fn compute_dominator(&mut self) {
		self.blocks.iter().for_each(|v| {
			v.borrow_mut().dominates.clear();
			v.borrow_mut().dominates_directly.clear();
			v.borrow_mut().dominator = None;
		});
		let mut dominates: HashMap<i32, Vec<Node>> = HashMap::new();
		let mut dominates_directly: HashMap<i32, Vec<Node>> = HashMap::new();
		let mut dominator: HashMap<i32, Node> = HashMap::new();
		crate::dominator::naive::compute_dominator(
			self,
			false,
			&mut dominates,
			&mut dominates_directly,
			&mut dominator,
		);
		for bb in self.blocks.iter() {
			let id = bb.borrow().id;
			bb.borrow_mut().dominates =
				dominates.remove(&id).unwrap_or_default();
			bb.borrow_mut().dominates_directly =
				dominates_directly.remove(&id).unwrap_or_default();
			bb.borrow_mut().dominator = dominator.get(&id).cloned();
		}
	}
}

pub fn link_node(from: &Node, to: &Node) {
	if from.borrow().jump_instr.is_none() {
		from.borrow_mut().succ.push(to.clone());
		to.borrow_mut().prev.push(from.clone());
	}
}

pub fn force_link_node(from: &Node, to: &Node) {
	from.borrow_mut().succ.push(to.clone());
	to.borrow_mut().prev.push(from.clone());
}

pub fn unlink_node(from: &Node, to: &Node) {
	let from_id = from.borrow().id;
	let to_id = to.borrow().id;
	from.borrow_mut().succ.retain(|v| v.borrow().id != to_id);
	to.borrow_mut().prev.retain(|v| v.borrow().id != from_id);
}
