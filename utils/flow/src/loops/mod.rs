use std::{cell::RefCell, rc::Rc};

use crate::Node;

pub mod loop_analysis;
pub mod loop_info;
pub mod utils;

pub use loop_info::{LoopBounds, LoopExits};

pub type LoopPtr = Rc<RefCell<Loop>>;

pub struct Loop {
	pub id: u32,
	pub outer: Option<LoopPtr>,
	pub header: Node,
	pub level: i32,
	pub no_inner: bool,
}

impl Loop {
	pub fn new(id: u32, header: Node) -> Self {
		Self {
			id,
			outer: None,
			header,
			level: -1,
			no_inner: true,
		}
	}
	/// Whether `bb` belongs to this loop or one nested inside it.
	pub fn contains_block(&self, bb: &Node) -> bool {
		let mut cur = bb.borrow().loop_.clone();
		while let Some(l) = cur {
			if l.borrow().id == self.id {
				return true;
			}
			cur = l.borrow().outer.clone();
		}
		false
	}
}

impl PartialEq for Loop {
	fn eq(&self, other: &Self) -> bool {
		self.id == other.id
	}
}

impl Eq for Loop {}
