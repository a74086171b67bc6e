use std::collections::{HashMap, HashSet};

use llvm::LlvmTemp;

use crate::cost::Cost;

/// Handle into the per-function container arena. Containers are created
/// during building and reduction and never freed before the function is
/// done.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub struct LccId(pub u32);

/// An edge between two sibling containers. The inner endpoints stay
/// pinned to the boundary unit containers however deeply the outer ends
/// get composed.
#[derive(Clone, Copy, Debug)]
pub struct LccEdge {
	pub from_inner: LccId,
	pub to_inner: LccId,
	pub fence: bool,
}

/// Where a probe lands inside a basic block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProbeSlot {
	/// Before the instruction at this index.
	Before(usize),
	/// Between the last ordinary instruction and the terminator.
	BeforeTerm,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProbePoint {
	pub block: i32,
	pub slot: ProbeSlot,
}

#[derive(Clone, Debug)]
pub enum ProbeAmount {
	Const(i64),
	Sym(Cost),
	/// A value computed by earlier instructions in the same block.
	Value(LlvmTemp),
}

#[derive(Clone, Debug)]
pub struct ProbeMarker {
	pub point: ProbePoint,
	pub amount: ProbeAmount,
}

/// A maximal fence-free instruction range within one basic block. The
/// range covers `instrs[first..last]`; a trailing fence is part of the
/// range, and the block terminator belongs to the final unit.
#[derive(Clone)]
pub struct UnitLcc {
	pub block: i32,
	pub first: usize,
	pub last: usize,
	pub with_term: bool,
	pub ends_with_fence: bool,
	pub cost: Cost,
	/// Cost amortized into this container from a skipped neighbor.
	pub initial: i64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopShape {
	SelfLoop,
	ColocatedExit,
	NonColocatedExit,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopPlan {
	/// Whole loop plus preheader accounted at the post-exit.
	Whole,
	/// Preheader committed locally, the loop joins the post-exit.
	SplitPre,
	StripMine,
	PerIteration,
}

#[derive(Clone)]
pub enum LccKind {
	Unit(UnitLcc),
	Path {
		head: LccId,
		tail: LccId,
	},
	Branch {
		dom: LccId,
		arms: Vec<LccId>,
		/// Probability numerators over `prob_den` per arm, direct edge
		/// last when present.
		arm_probs: Vec<f64>,
		has_direct: bool,
		postdom: LccId,
		mean: Cost,
		instrument_arms: bool,
	},
	ComplexBranch {
		dom: LccId,
		inner: Vec<LccId>,
		postdom: LccId,
		mean: Cost,
		instrument_inner: bool,
	},
	Loop {
		shape: LoopShape,
		plan: LoopPlan,
		preheader: LccId,
		header: LccId,
		body: Option<LccId>,
		post_exit: LccId,
		loop_id: u32,
		/// Cost of all iterations together (preheader/post-exit excluded).
		total: Cost,
		/// Cost of one full iteration.
		per_iter: Cost,
	},
	InvertedV {
		entry: LccId,
		outs: Vec<LccId>,
	},
	V {
		ins: Vec<LccId>,
		exit: LccId,
	},
	Unknown {
		entry: LccId,
		inner: Vec<LccId>,
		exit: LccId,
		/// The entry's own cost commits at the entry when a fence leads
		/// into the region.
		entry_committed: bool,
	},
}

pub struct Lcc {
	pub id: LccId,
	pub parent: Option<LccId>,
	pub preds: HashMap<LccId, LccEdge>,
	pub succs: HashMap<LccId, LccEdge>,
	pub kind: LccKind,
}

impl Lcc {
	pub fn is_unit(&self) -> bool {
		matches!(self.kind, LccKind::Unit(_))
	}
	/// Fence-carrying containers are terminal: they commit internally
	/// and never compose further.
	pub fn is_sealed(&self) -> bool {
		matches!(
			self.kind,
			LccKind::InvertedV { .. } | LccKind::V { .. } | LccKind::Unknown { .. }
		)
	}
}

/// A direct dominator→postdominator edge of an instrumented branch; the
/// post CFG shaping pass materializes a block on it to carry the probe.
pub struct DirectProbe {
	pub from_block: i32,
	pub to_block: i32,
	pub amount: ProbeAmount,
}

/// A loop scheduled for strip-mining after evaluation.
pub struct StripMineJob {
	pub loop_id: u32,
	pub body_cost: i64,
}

#[derive(Default)]
pub struct LccForest {
	pub nodes: Vec<Lcc>,
	/// Ordered unit containers per basic block.
	pub block_units: HashMap<i32, Vec<LccId>>,
	/// Outermost containers; with their recursive children they
	/// partition all unit containers.
	pub global: Vec<LccId>,
	pub markers: Vec<ProbeMarker>,
	pub direct_probes: Vec<DirectProbe>,
	pub strip_mines: Vec<StripMineJob>,
}

impl LccForest {
	pub fn get(&self, id: LccId) -> &Lcc {
		&self.nodes[id.0 as usize]
	}
	pub fn get_mut(&mut self, id: LccId) -> &mut Lcc {
		&mut self.nodes[id.0 as usize]
	}

	pub fn new_unit(&mut self, unit: UnitLcc) -> LccId {
		let id = LccId(self.nodes.len() as u32);
		self.block_units.entry(unit.block).or_default().push(id);
		self.nodes.push(Lcc {
			id,
			parent: None,
			preds: HashMap::new(),
			succs: HashMap::new(),
			kind: LccKind::Unit(unit),
		});
		self.global.push(id);
		id
	}

	/// Late registration for blocks minted after reduction (loop
	/// transformation, shaping); these never join the outer list.
	pub fn register_unit(&mut self, unit: UnitLcc) -> LccId {
		let id = LccId(self.nodes.len() as u32);
		self.block_units.entry(unit.block).or_default().push(id);
		self.nodes.push(Lcc {
			id,
			parent: None,
			preds: HashMap::new(),
			succs: HashMap::new(),
			kind: LccKind::Unit(unit),
		});
		id
	}

	pub fn add_edge(&mut self, from: LccId, to: LccId, fence: bool) {
		let edge = LccEdge {
			from_inner: from,
			to_inner: to,
			fence,
		};
		self.get_mut(from).succs.insert(to, edge);
		self.get_mut(to).preds.insert(from, edge);
	}

	/// Edges crossing the boundary of a prospective composite.
	pub fn external_edges(
		&self,
		children: &HashSet<LccId>,
	) -> (HashMap<LccId, LccEdge>, HashMap<LccId, LccEdge>) {
		let mut preds = HashMap::new();
		let mut succs = HashMap::new();
		for &child in children.iter() {
			for (p, edge) in self.get(child).preds.iter() {
				if !children.contains(p) {
					preds.insert(*p, *edge);
				}
			}
			for (s, edge) in self.get(child).succs.iter() {
				if !children.contains(s) {
					succs.insert(*s, *edge);
				}
			}
		}
		(preds, succs)
	}

	/// Create a composite over `children`, splice it into the global
	/// list and rewire every external neighbor. A backedge between two
	/// children that the rule did not consume survives as `self_edge`.
	pub fn compose(
		&mut self,
		kind: LccKind,
		children: Vec<LccId>,
		self_edge: Option<LccEdge>,
	) -> LccId {
		let id = LccId(self.nodes.len() as u32);
		let child_set: HashSet<LccId> = children.iter().copied().collect();
		let (preds, succs) = self.external_edges(&child_set);
		for &child in children.iter() {
			self.get_mut(child).parent = Some(id);
		}
		for (&p, _) in preds.iter() {
			let removed: Vec<(LccId, LccEdge)> = self
				.get(p)
				.succs
				.iter()
				.filter(|(k, _)| child_set.contains(k))
				.map(|(k, e)| (*k, *e))
				.collect();
			let node = self.get_mut(p);
			for (k, _) in removed.iter() {
				node.succs.remove(k);
			}
			if let Some((_, e)) = removed.into_iter().next() {
				node.succs.insert(id, e);
			}
		}
		for (&s, _) in succs.iter() {
			let removed: Vec<(LccId, LccEdge)> = self
				.get(s)
				.preds
				.iter()
				.filter(|(k, _)| child_set.contains(k))
				.map(|(k, e)| (*k, *e))
				.collect();
			let node = self.get_mut(s);
			for (k, _) in removed.iter() {
				node.preds.remove(k);
			}
			if let Some((_, e)) = removed.into_iter().next() {
				node.preds.insert(id, e);
			}
		}
		self.global.retain(|v| !child_set.contains(v));
		self.nodes.push(Lcc {
			id,
			parent: None,
			preds,
			succs,
			kind,
		});
		if let Some(edge) = self_edge {
			let node = self.get_mut(id);
			node.succs.insert(id, edge);
			node.preds.insert(id, edge);
		}
		self.global.push(id);
		id
	}

	/// The unit container whose start is this container's entry point.
	pub fn entry_unit(&self, id: LccId) -> LccId {
		match &self.get(id).kind {
			LccKind::Unit(_) => id,
			LccKind::Path { head, .. } => self.entry_unit(*head),
			LccKind::Branch { dom, .. } => self.entry_unit(*dom),
			LccKind::ComplexBranch { dom, .. } => self.entry_unit(*dom),
			LccKind::Loop { preheader, .. } => self.entry_unit(*preheader),
			LccKind::InvertedV { entry, .. } => self.entry_unit(*entry),
			LccKind::V { exit, .. } => self.entry_unit(*exit),
			LccKind::Unknown { entry, .. } => self.entry_unit(*entry),
		}
	}

	/// The unit container whose end is this container's exit point.
	pub fn exit_unit(&self, id: LccId) -> LccId {
		match &self.get(id).kind {
			LccKind::Unit(_) => id,
			LccKind::Path { tail, .. } => self.exit_unit(*tail),
			LccKind::Branch { postdom, .. } => self.exit_unit(*postdom),
			LccKind::ComplexBranch { postdom, .. } => self.exit_unit(*postdom),
			LccKind::Loop { post_exit, .. } => self.exit_unit(*post_exit),
			LccKind::InvertedV { entry, .. } => self.exit_unit(*entry),
			LccKind::V { exit, .. } => self.exit_unit(*exit),
			LccKind::Unknown { exit, .. } => self.exit_unit(*exit),
		}
	}

	pub fn entry_block(&self, id: LccId) -> i32 {
		match &self.get(self.entry_unit(id)).kind {
			LccKind::Unit(u) => u.block,
			_ => unreachable!(),
		}
	}

	pub fn exit_block(&self, id: LccId) -> i32 {
		match &self.get(self.exit_unit(id)).kind {
			LccKind::Unit(u) => u.block,
			_ => unreachable!(),
		}
	}

	/// The probe point sitting at the end of a unit container: before
	/// the closing fence, or between body and terminator.
	pub fn exit_point(&self, unit_id: LccId) -> ProbePoint {
		match &self.get(unit_id).kind {
			LccKind::Unit(u) => {
				if u.ends_with_fence {
					ProbePoint {
						block: u.block,
						slot: ProbeSlot::Before(u.last - 1),
					}
				} else {
					ProbePoint {
						block: u.block,
						slot: ProbeSlot::BeforeTerm,
					}
				}
			}
			_ => unreachable!(),
		}
	}

	pub fn unit(&self, id: LccId) -> &UnitLcc {
		match &self.get(id).kind {
			LccKind::Unit(u) => u,
			_ => unreachable!(),
		}
	}

	pub fn unit_mut(&mut self, id: LccId) -> &mut UnitLcc {
		match &mut self.get_mut(id).kind {
			LccKind::Unit(u) => u,
			_ => unreachable!(),
		}
	}

	pub fn mark(&mut self, point: ProbePoint, amount: ProbeAmount) {
		self.markers.push(ProbeMarker { point, amount });
	}
}
