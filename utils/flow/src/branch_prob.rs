use std::collections::HashMap;

use crate::cfg::CFG;

const LOOP_TAKEN: u64 = 15;
const LOOP_DEN: u64 = 16;

/// Static edge probabilities as numerator/denominator pairs. Backedges
/// are heavily taken, everything else splits evenly.
pub struct BranchProbs {
	map: HashMap<(i32, i32), (u64, u64)>,
}

impl BranchProbs {
	/// Requires the loop forest to be current.
	pub fn analyze(cfg: &CFG) -> Self {
		let mut map = HashMap::new();
		for bb in cfg.blocks.iter() {
			let from = bb.borrow().id;
			let succs = bb.borrow().succ.clone();
			let n = succs.len() as u64;
			if n == 0 {
				continue;
			}
			if n == 1 {
				map.insert((from, succs[0].borrow().id), (1, 1));
				continue;
			}
			let is_backedge = |to: &crate::Node| {
				bb.borrow()
					.loop_
					.as_ref()
					.map_or(false, |l| l.borrow().header.borrow().id == to.borrow().id)
			};
			let back_count = succs.iter().filter(|s| is_backedge(s)).count() as u64;
			for succ in succs.iter() {
				let to = succ.borrow().id;
				let p = if back_count > 0 {
					if is_backedge(succ) {
						(LOOP_TAKEN / back_count, LOOP_DEN)
					} else {
						(
							(LOOP_DEN - LOOP_TAKEN) / (n - back_count),
							LOOP_DEN,
						)
					}
				} else {
					(1, n)
				};
				map.insert((from, to), p);
			}
		}
		Self { map }
	}
	pub fn prob(&self, from: i32, to: i32) -> (u64, u64) {
		self.map.get(&(from, to)).copied().unwrap_or((1, 1))
	}
	pub fn prob_f64(&self, from: i32, to: i32) -> f64 {
		let (n, d) = self.prob(from, to);
		n as f64 / d as f64
	}
}
