use llvm::LlvmTempManager;
use log::trace;

use crate::{basicblock::split_block_predecessors, func::Func, Node};

use super::LoopPtr;

/// Once we discover that a loop doesn't have a dedicated preheader, this
/// inserts one: every entering edge from outside the loop is re-routed
/// through a fresh block that falls through to the header.
pub fn insert_preheader_for_loop(
	loop_: LoopPtr,
	func: &mut Func,
	temp_mgr: &mut LlvmTempManager,
) -> Option<Node> {
	let header_rc = loop_.borrow().header.clone();
	let mut outside_blocks = Vec::new();
	for prev in header_rc.clone().borrow().prev.iter() {
		if !loop_.borrow().contains_block(prev) {
			outside_blocks.push(prev.clone());
		}
	}
	if outside_blocks.is_empty() {
		return None;
	}
	if outside_blocks.len() == 1
		&& outside_blocks[0].borrow().single_succ()
	{
		// already dedicated
		return Some(outside_blocks[0].clone());
	}

	trace!("inserting preheader for loop {}", loop_.borrow().id);
	split_block_predecessors(header_rc, outside_blocks, func, temp_mgr)
}
