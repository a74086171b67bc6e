pub mod basicblock;
pub mod branch_prob;
pub mod callgraph;
pub mod cfg;
pub mod dominator;
pub mod func;
pub mod loops;
pub mod program;
pub mod scev;

pub use basicblock::Node;
pub use cfg::CFG;

pub mod prelude {
	pub use crate::{
		basicblock::{
			split_block_at, split_block_predecessors, BasicBlock, Node,
		},
		branch_prob::BranchProbs,
		callgraph::CallGraph,
		cfg::{force_link_node, link_node, unlink_node, CFG},
		dominator::DomTree,
		func::{Func, FuncDecl},
		loops::{Loop, LoopBounds, LoopExits, LoopPtr},
		program::Program,
		scev::{Scev, ScevAnalysis},
	};
}
