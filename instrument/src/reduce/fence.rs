use std::collections::HashSet;

use crate::{
	context::FuncCx,
	lcc::{LccForest, LccId, LccKind},
};

use super::postdom_container;

/// R5: a fan-out whose outgoing edges are all fences. The region is
/// sealed; every child commits its own cost and nothing crosses the
/// fences.
pub(super) fn try_inverted_v(forest: &mut LccForest) -> bool {
	let candidates: Vec<LccId> = forest.global.clone();
	'outer: for a in candidates {
		let na = forest.get(a);
		if na.is_sealed() || na.succs.len() < 2 {
			continue;
		}
		if !na.succs.values().all(|e| e.fence) {
			continue;
		}
		let outs: Vec<LccId> = na.succs.keys().copied().collect();
		for &s in outs.iter() {
			if s == a || forest.get(s).is_sealed() {
				continue 'outer;
			}
			// no cost may flow into the fan-out targets from elsewhere
			if !forest.get(s).preds.values().all(|e| e.fence) {
				continue 'outer;
			}
		}
		let mut children = vec![a];
		children.extend(outs.iter().copied());
		forest.compose(
			LccKind::InvertedV { entry: a, outs },
			children,
			None,
		);
		return true;
	}
	false
}

/// R6: a merge whose incoming edges are all fences; the parents cannot
/// be joined with the exit side and commit individually.
pub(super) fn try_v(forest: &mut LccForest) -> bool {
	let candidates: Vec<LccId> = forest.global.clone();
	'outer: for e in candidates {
		let ne = forest.get(e);
		if ne.is_sealed() || ne.preds.len() < 2 {
			continue;
		}
		if !ne.preds.values().all(|edge| edge.fence) {
			continue;
		}
		let ins: Vec<LccId> = ne.preds.keys().copied().collect();
		for &p in ins.iter() {
			if p == e || forest.get(p).is_sealed() {
				continue 'outer;
			}
			if !forest.get(p).succs.values().all(|edge| edge.fence) {
				continue 'outer;
			}
		}
		let mut children = ins.clone();
		children.push(e);
		forest.compose(LccKind::V { ins, exit: e }, children, None);
		return true;
	}
	false
}

/// R7: last resort at a dominator/post-dominator pair whose middle fits
/// no other rule (internal fences, mixed composites). Every
/// intermediate container is instrumented at its own cost.
pub(super) fn try_unknown(
	forest: &mut LccForest,
	cx: &FuncCx,
) -> bool {
	let candidates: Vec<LccId> = forest.global.clone();
	for a in candidates {
		let na = forest.get(a);
		if na.is_sealed() || na.succs.len() < 2 {
			continue;
		}
		let Some(b) = postdom_container(forest, cx, a) else {
			continue;
		};
		// the region between, any shape, fences allowed
		let mut region = HashSet::new();
		let mut stack: Vec<LccId> = forest
			.get(a)
			.succs
			.keys()
			.copied()
			.filter(|&s| s != b)
			.collect();
		let mut ok = true;
		while let Some(s) = stack.pop() {
			if s == a || s == b {
				ok = false;
				break;
			}
			if !region.insert(s) {
				continue;
			}
			for &t in forest.get(s).succs.keys() {
				if t != b {
					stack.push(t);
				}
			}
		}
		if !ok || region.is_empty() {
			continue;
		}
		let sese = region.iter().all(|&s| {
			forest
				.get(s)
				.preds
				.keys()
				.all(|p| *p == a || region.contains(p))
		}) && forest
			.get(b)
			.preds
			.keys()
			.all(|p| *p == a || region.contains(p));
		if !sese {
			continue;
		}
		let entry_committed = forest
			.get(a)
			.succs
			.values()
			.any(|e| e.fence);
		let back = forest.get(b).succs.get(&a).copied();
		let inner: Vec<LccId> = region.iter().copied().collect();
		let mut children = vec![a];
		children.extend(inner.iter().copied());
		children.push(b);
		forest.compose(
			LccKind::Unknown {
				entry: a,
				inner,
				exit: b,
				entry_committed,
			},
			children,
			back,
		);
		return true;
	}
	false
}
