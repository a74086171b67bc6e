use std::{
	cell::RefCell, collections::HashMap, fmt::Display, hash::Hash, rc::Rc,
};

use llvm::{
	JumpInstr, LlvmInstr, LlvmInstrTrait, LlvmTemp, LlvmTempManager, PhiInstr,
	Value,
};
use log::trace;
use utils::{instr_format, to_label, Label};

use crate::{cfg::force_link_node, cfg::unlink_node, func::Func,
	loops::LoopPtr};

pub type Node = Rc<RefCell<BasicBlock>>;

pub struct BasicBlock {
	pub id: i32,
	pub weight: f64,
	pub prev: Vec<Node>,
	pub succ: Vec<Node>,
	pub phi_instrs: Vec<PhiInstr>,
	pub instrs: Vec<LlvmInstr>,
	pub jump_instr: Option<LlvmInstr>,
	// 支配树信息: all blocks dominated by self, direct children, parent
	pub dominates: Vec<Node>,
	pub dominates_directly: Vec<Node>,
	pub dominator: Option<Node>,
	pub loop_: Option<LoopPtr>,
}

fn get_other_label(
	now: *const BasicBlock,
	now_label: Label,
	other: &Node,
) -> Label {
	if std::ptr::eq(now, other.as_ptr()) {
		now_label
	} else {
		other.borrow().label()
	}
}

impl PartialEq for BasicBlock {
	fn eq(&self, other: &Self) -> bool {
		self.id == other.id
	}
}

impl Eq for BasicBlock {}

impl Hash for BasicBlock {
	fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
		self.id.hash(state);
	}
}

impl BasicBlock {
	pub fn new(id: i32, weight: f64) -> Self {
		BasicBlock {
			id,
			weight,
			prev: Vec::new(),
			succ: Vec::new(),
			phi_instrs: Vec::new(),
			instrs: Vec::new(),
			jump_instr: None,
			dominates: Vec::new(),
			dominates_directly: Vec::new(),
			dominator: None,
			loop_: None,
		}
	}
	pub fn new_node(id: i32, weight: f64) -> Node {
		Rc::new(RefCell::new(Self::new(id, weight)))
	}
	pub fn label(&self) -> Label {
		to_label(self.id)
	}
	// Use this before dropping a BasicBlock, or may lead to memory leak
	pub fn clear(&mut self) {
		self.prev.clear();
		self.succ.clear();
		self.dominates.clear();
		self.dominates_directly.clear();
		self.dominator = None;
		self.loop_ = None;
	}
	pub fn push(&mut self, instr: LlvmInstr) {
		self.instrs.push(instr);
	}
	pub fn push_phi(&mut self, instr: PhiInstr) {
		self.phi_instrs.push(instr);
	}
	pub fn single_prev(&self) -> bool {
		self.prev.len() == 1
	}
	pub fn single_succ(&self) -> bool {
		self.succ.len() == 1
	}
	pub fn get_succ(&self) -> Node {
		self.succ.first().unwrap().clone()
	}
	pub fn no_phi(&self) -> bool {
		self.phi_instrs.is_empty()
	}
	pub fn set_jump(&mut self, instr: Option<LlvmInstr>) {
		self.jump_instr = instr;
	}
	/// Successor labels as written in the terminator, duplicates kept.
	pub fn term_labels(&self) -> Vec<Label> {
		self.jump_instr.as_ref().map_or(Vec::new(), |v| v.target_labels())
	}
	pub fn replace_prev(&mut self, label: &Label, target: Node) {
		let new_label = get_other_label(self, self.label(), &target);
		for instr in self.phi_instrs.iter_mut() {
			if let Some((_, v)) = instr.source.iter_mut().find(|(_, v)| v == label) {
				*v = new_label.clone();
			}
		}
		if let Some(prev) =
			self.prev.iter_mut().find(|v| v.borrow().label() == *label)
		{
			*prev = target
		} else {
			unreachable!()
		}
	}
	pub fn map_temp(&mut self, map: &HashMap<LlvmTemp, Value>) {
		self.phi_instrs.iter_mut().for_each(|v| v.map_temp(map));
		self.instrs.iter_mut().for_each(|v| v.map_temp(map));
		if let Some(instr) = self.jump_instr.as_mut() {
			instr.map_temp(map);
		}
	}
	pub fn map_phi_label(&mut self, map: &HashMap<Label, Label>) {
		self.phi_instrs.iter_mut().for_each(|v| v.map_label(map));
	}
	pub fn map_label(&mut self, map: &HashMap<Label, Label>) {
		self.map_phi_label(map);
		if let Some(instr) = self.jump_instr.as_mut() {
			instr.map_label(map);
		}
	}
	pub fn make_pretty(&mut self) {
		self.phi_instrs.sort_by(|x, y| x.target.cmp(&y.target));
	}
}

/// Insert a fresh block taking over the given predecessors of `target`.
/// Phi sources moving with the predecessors are re-rooted in the new
/// block behind a fresh phi.
pub fn split_block_predecessors(
	target_rc: Node,
	preds: Vec<Node>,
	func: &mut Func,
	temp_mgr: &mut LlvmTempManager,
) -> Option<Node> {
	for prev in preds.iter() {
		trace!("prev: {}", prev.borrow().label());
		unlink_node(prev, &target_rc);
	}
	let mut target = target_rc.borrow_mut();
	let mut new_bb = func.new_basicblock(0.0);
	for phi in target.phi_instrs.iter_mut() {
		let new_target = temp_mgr.new_temp(phi.var_type);
		let new_source = phi
			.source
			.iter()
			.filter(|(_, l)| preds.iter().any(|b| b.borrow().label() == *l))
			.cloned()
			.collect::<Vec<(Value, Label)>>();
		phi
			.source
			.retain(|(_, l)| !preds.iter().any(|b| b.borrow().label() == *l));
		phi.source.push((Value::Temp(new_target.clone()), new_bb.label()));

		let new_phi = PhiInstr::new(new_target, new_source);
		new_bb.phi_instrs.push(new_phi);
	}
	let target_label = target.label();
	new_bb.set_jump(Some(JumpInstr::new(target_label.clone())));
	let new_bb = Rc::new(RefCell::new(new_bb));
	trace!("new_bb: {}", new_bb.borrow().label());
	let label_map: HashMap<_, _> =
		[(target_label, new_bb.borrow().label())].into_iter().collect();
	for prev in preds.iter() {
		if let Some(instr) = prev.borrow_mut().jump_instr.as_mut() {
			instr.map_label(&label_map);
		}
	}
	preds.iter().for_each(|b| force_link_node(b, &new_bb));
	drop(target);
	force_link_node(&new_bb, &target_rc);

	let target_pos =
		func.cfg.blocks.iter().position(|v| *v == target_rc).unwrap();
	func.cfg.blocks.insert(target_pos, new_bb.clone());

	Some(new_bb)
}

/// Split `block` before instruction index `at` (an index into `instrs`).
/// The tail instructions and the terminator move into a fresh block which
/// inherits all successors; `block` falls through to it.
pub fn split_block_at(block: &Node, at: usize, func: &mut Func) -> Node {
	let mut new_bb = func.new_basicblock(block.borrow().weight);
	let mut this = block.borrow_mut();
	new_bb.instrs = this.instrs.split_off(at);
	new_bb.jump_instr = this.jump_instr.take();
	let new_node = Rc::new(RefCell::new(new_bb));

	let old_label = this.label();
	let succs = std::mem::take(&mut this.succ);
	for succ in succs.iter() {
		if std::ptr::eq(succ.as_ptr(), &*this) {
			// self-loop edge: the backedge now starts at the tail block
			this.prev.retain(|v| v.borrow().label() != old_label);
			for phi in this.phi_instrs.iter_mut() {
				for (_, l) in phi.source.iter_mut() {
					if *l == old_label {
						*l = new_node.borrow().label();
					}
				}
			}
			this.prev.push(new_node.clone());
			new_node.borrow_mut().succ.push(block.clone());
		} else {
			succ.borrow_mut().replace_prev(&old_label, new_node.clone());
			new_node.borrow_mut().succ.push(succ.clone());
		}
	}
	this.set_jump(Some(JumpInstr::new(new_node.borrow().label())));
	this.succ.push(new_node.clone());
	new_node.borrow_mut().prev.push(block.clone());
	drop(this);

	let pos = func.cfg.blocks.iter().position(|v| *v == *block).unwrap();
	func.cfg.blocks.insert(pos + 1, new_node.clone());
	new_node
}

impl Display for BasicBlock {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		let instrs = self
			.phi_instrs
			.iter()
			.map(instr_format)
			.chain(self.instrs.iter().map(instr_format))
			.chain(self.jump_instr.iter().map(instr_format))
			.collect::<Vec<_>>()
			.join("\n");
		write!(f, "  {}:\n{}", self.label(), instrs)
	}
}
