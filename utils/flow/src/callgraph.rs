use std::collections::{HashMap, HashSet};

use llvm::LlvmInstrTrait;

use crate::program::Program;

/// Module call graph over defined functions. `order` lists functions with
/// callees before callers (condensation post-order); mutual recursion is
/// detected through the SCCs.
pub struct CallGraph {
	pub order: Vec<String>,
	recursive: HashSet<String>,
}

impl CallGraph {
	pub fn build(program: &Program) -> Self {
		let names: Vec<String> =
			program.funcs.iter().map(|f| f.name.clone()).collect();
		let index: HashMap<&str, usize> =
			names.iter().enumerate().map(|(i, n)| (n.as_str(), i)).collect();
		let mut edges: Vec<HashSet<usize>> = vec![HashSet::new(); names.len()];
		for (i, func) in program.funcs.iter().enumerate() {
			for bb in func.cfg.blocks.iter() {
				for instr in bb.borrow().instrs.iter() {
					if !instr.is_call() {
						continue;
					}
					if let llvm::LlvmInstrVariant::CallInstr(call) = instr.get_variant()
					{
						if let Some(&j) = index.get(call.func.name.as_str()) {
							edges[i].insert(j);
						}
					}
				}
			}
		}
		let sccs = tarjan(&edges);
		let mut order = Vec::new();
		let mut recursive = HashSet::new();
		for scc in sccs.iter() {
			for &i in scc.iter() {
				if scc.len() > 1 || edges[i].contains(&i) {
					recursive.insert(names[i].clone());
				}
				order.push(names[i].clone());
			}
		}
		Self { order, recursive }
	}
	pub fn is_recursive(&self, name: &str) -> bool {
		self.recursive.contains(name)
	}
}

// Tarjan's strongly connected components, iterative. SCCs come out with
// callees before callers.
fn tarjan(edges: &[HashSet<usize>]) -> Vec<Vec<usize>> {
	let n = edges.len();
	let mut index = vec![usize::MAX; n];
	let mut low = vec![0usize; n];
	let mut on_stack = vec![false; n];
	let mut stack = Vec::new();
	let mut sccs = Vec::new();
	let mut counter = 0;

	for root in 0..n {
		if index[root] != usize::MAX {
			continue;
		}
		let mut work: Vec<(usize, Vec<usize>)> =
			vec![(root, edges[root].iter().copied().collect())];
		index[root] = counter;
		low[root] = counter;
		counter += 1;
		stack.push(root);
		on_stack[root] = true;
		while let Some((v, children)) = work.last_mut() {
			let v = *v;
			if let Some(w) = children.pop() {
				if index[w] == usize::MAX {
					index[w] = counter;
					low[w] = counter;
					counter += 1;
					stack.push(w);
					on_stack[w] = true;
					work.push((w, edges[w].iter().copied().collect()));
				} else if on_stack[w] {
					low[v] = low[v].min(index[w]);
				}
			} else {
				work.pop();
				if let Some((parent, _)) = work.last() {
					low[*parent] = low[*parent].min(low[v]);
				}
				if low[v] == index[v] {
					let mut scc = Vec::new();
					loop {
						let w = stack.pop().unwrap();
						on_stack[w] = false;
						scc.push(w);
						if w == v {
							break;
						}
					}
					sccs.push(scc);
				}
			}
		}
	}
	sccs
}

#[cfg(test)]
mod tests {
	use std::collections::HashSet;

	use llvm::{CallInstr, RetInstr, Temp, VarType};
	use utils::Label;

	use super::*;
	use crate::{basicblock::BasicBlock, cfg::CFG, func::Func};

	fn func_calling(name: &str, callees: &[&str]) -> Func {
		let node = BasicBlock::new_node(1, 1.0);
		for callee in callees {
			node.borrow_mut().push(Box::new(CallInstr {
				target: Temp::new("_", VarType::Void, false),
				var_type: VarType::Void,
				func: Label::new(*callee),
				params: vec![],
			}));
		}
		node.borrow_mut().set_jump(Some(Box::new(RetInstr { value: None })));
		Func::new(
			CFG { blocks: vec![node] },
			name.to_string(),
			VarType::Void,
			vec![],
		)
	}

	#[test]
	fn callees_come_before_callers() {
		let mut program = crate::program::Program::default();
		program.funcs.push(func_calling("main", &["a", "b"]));
		program.funcs.push(func_calling("a", &["b"]));
		program.funcs.push(func_calling("b", &["puts"]));
		let cg = CallGraph::build(&program);
		let pos: Vec<usize> = ["b", "a", "main"]
			.iter()
			.map(|n| cg.order.iter().position(|o| o == n).unwrap())
			.collect();
		assert!(pos[0] < pos[1] && pos[1] < pos[2]);
		assert!(!cg.is_recursive("a"));
	}

	#[test]
	fn recursion_is_detected_through_sccs() {
		let mut program = crate::program::Program::default();
		program.funcs.push(func_calling("even", &["odd"]));
		program.funcs.push(func_calling("odd", &["even"]));
		program.funcs.push(func_calling("self", &["self"]));
		program.funcs.push(func_calling("leaf", &[]));
		let cg = CallGraph::build(&program);
		let recursive: HashSet<&str> = ["even", "odd", "self"]
			.into_iter()
			.collect();
		for name in ["even", "odd", "self", "leaf"] {
			assert_eq!(
				cg.is_recursive(name),
				recursive.contains(name),
				"{}",
				name
			);
		}
	}
}
