pub mod naive;

use std::collections::{HashMap, HashSet};

use crate::{cfg::CFG, Node};

/// Dominance information keyed by block id. With `reverse` the tree is the
/// post-dominator tree (a virtual exit joins all `ret`/`unreachable`
/// blocks).
pub struct DomTree {
	pub dominates: HashMap<i32, Vec<Node>>,
	pub dominator: HashMap<i32, Node>,
	pub dom_direct: HashMap<i32, Vec<Node>>,
	sets: HashMap<i32, HashSet<i32>>,
}

impl DomTree {
	pub fn new(cfg: &CFG, reverse: bool) -> Self {
		let mut dominates = HashMap::new();
		let mut dom_direct = HashMap::new();
		let mut dominator = HashMap::new();
		naive::compute_dominator(
			cfg,
			reverse,
			&mut dominates,
			&mut dom_direct,
			&mut dominator,
		);
		let sets = dominates
			.iter()
			.map(|(k, v)| (*k, v.iter().map(|n| n.borrow().id).collect()))
			.collect();
		Self {
			dominates,
			dominator,
			dom_direct,
			sets,
		}
	}
	/// Whether `a` (strictly or not) dominates `b`.
	pub fn dominates(&self, a: i32, b: i32) -> bool {
		a == b || self.sets.get(&a).map_or(false, |s| s.contains(&b))
	}
	pub fn idom(&self, id: i32) -> Option<Node> {
		self.dominator.get(&id).cloned()
	}
}

#[cfg(test)]
mod tests {
	use llvm::{JumpCondInstr, JumpInstr, RetInstr, Value, VarType};

	use super::*;
	use crate::{basicblock::BasicBlock, cfg::force_link_node};

	// 1 → {2, 3} → 4 → ret
	fn diamond() -> CFG {
		let nodes: Vec<Node> =
			(1..=4).map(|i| BasicBlock::new_node(i, 1.0)).collect();
		force_link_node(&nodes[0], &nodes[1]);
		force_link_node(&nodes[0], &nodes[2]);
		force_link_node(&nodes[1], &nodes[3]);
		force_link_node(&nodes[2], &nodes[3]);
		nodes[0].borrow_mut().set_jump(Some(Box::new(JumpCondInstr {
			var_type: VarType::I32,
			cond: Value::Int(1),
			target_true: nodes[1].borrow().label(),
			target_false: nodes[2].borrow().label(),
		})));
		nodes[1]
			.borrow_mut()
			.set_jump(Some(JumpInstr::new(nodes[3].borrow().label())));
		nodes[2]
			.borrow_mut()
			.set_jump(Some(JumpInstr::new(nodes[3].borrow().label())));
		nodes[3]
			.borrow_mut()
			.set_jump(Some(Box::new(RetInstr { value: None })));
		CFG { blocks: nodes }
	}

	#[test]
	fn forward_dominance_in_a_diamond() {
		let cfg = diamond();
		let dom = DomTree::new(&cfg, false);
		assert!(dom.dominates(1, 4));
		assert!(dom.dominates(1, 2));
		assert!(!dom.dominates(2, 4));
		assert_eq!(dom.idom(4).unwrap().borrow().id, 1);
	}

	#[test]
	fn reverse_dominance_in_a_diamond() {
		let cfg = diamond();
		let pdom = DomTree::new(&cfg, true);
		assert!(pdom.dominates(4, 1));
		assert!(pdom.dominates(4, 2));
		assert!(!pdom.dominates(2, 1));
		assert_eq!(pdom.idom(1).unwrap().borrow().id, 4);
	}
}
