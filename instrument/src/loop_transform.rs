use std::{cell::RefCell, collections::HashMap, rc::Rc};

use flow::{basicblock::split_block_at, loops::Loop, prelude::*};
use llvm::{
	ArithInstr, ArithOp, CompInstr, CompKind, CompOp, ConvertInstr,
	ConvertOp, JumpCondInstr, LlvmInstrTrait, LlvmTemp, PhiInstr,
	TempManager, Value, VarType,
};
use log::{debug, trace};

use crate::{
	config::InstrumentConfig,
	context::FuncCx,
	cost::cost_const,
	lcc::{LccForest, ProbeAmount, ProbePoint, ProbeSlot, StripMineJob, UnitLcc},
	stats::Stats,
};

const MIN_INNER_TRIPS: i64 = 10;

/// Strip-mine every loop the evaluator scheduled: rewrite the loop into
/// an outer/inner pair whose outer iteration covers `commit / body`
/// iterations, and account each chunk with one value-carrying probe at
/// the outer pre-exit. Infeasible loops fall back to one probe per
/// iteration.
pub fn run(
	forest: &mut LccForest,
	func: &mut Func,
	cx: &FuncCx,
	config: &InstrumentConfig,
	temp_mgr: &mut TempManager,
	stats: &mut Stats,
) {
	let jobs = std::mem::take(&mut forest.strip_mines);
	let mut next_loop_id =
		cx.loops.iter().map(|l| l.borrow().id).max().unwrap_or(0);
	for job in jobs {
		next_loop_id += 1;
		if !strip_mine(
			forest,
			func,
			cx,
			config,
			temp_mgr,
			&job,
			next_loop_id,
		) {
			per_iteration_fallback(forest, cx, &job, stats);
		}
	}
}

fn per_iteration_fallback(
	forest: &mut LccForest,
	cx: &FuncCx,
	job: &StripMineJob,
	stats: &mut Stats,
) {
	let Some(exits) = cx.exits.get(&job.loop_id) else { return };
	let Some(latch) = exits.latch.as_ref() else { return };
	debug!(
		"loop {} cannot be strip-mined, probing every iteration",
		job.loop_id
	);
	forest.mark(
		ProbePoint {
			block: latch.borrow().id,
			slot: ProbeSlot::BeforeTerm,
		},
		ProbeAmount::Const(job.body_cost),
	);
	stats.loops_per_iteration += 1;
	stats.loops_strip_mined = stats.loops_strip_mined.saturating_sub(1);
}

fn widen_to_i64(
	value: Value,
	instrs: &mut Vec<llvm::LlvmInstr>,
	temp_mgr: &mut TempManager,
) -> Value {
	match value.get_type() {
		VarType::I64 => value,
		_ => {
			let target = temp_mgr.new_temp(VarType::I64);
			instrs.push(Box::new(ConvertInstr {
				target: target.clone(),
				op: ConvertOp::Sext,
				from_type: VarType::I32,
				to_type: VarType::I64,
				lhs: value,
			}));
			Value::Temp(target)
		}
	}
}

fn strip_mine(
	forest: &mut LccForest,
	func: &mut Func,
	cx: &FuncCx,
	config: &InstrumentConfig,
	temp_mgr: &mut TempManager,
	job: &StripMineJob,
	inner_loop_id: u32,
) -> bool {
	let inner = config.commit_bound() / job.body_cost.max(1);
	if inner <= MIN_INNER_TRIPS {
		return false;
	}
	let Some(bounds) = cx.bounds.get(&job.loop_id).cloned() else {
		return false;
	};
	let Some(outer_loop) = cx.loop_ptr(job.loop_id) else {
		return false;
	};
	let Some(exits) = cx.exits.get(&job.loop_id) else {
		return false;
	};
	let (Some(latch), Some(exiting), Some(exit)) =
		(exits.latch.clone(), exits.exiting.clone(), exits.exit.clone())
	else {
		return false;
	};
	// the rewrite needs the exit test at the latch
	if exiting.borrow().id != latch.borrow().id {
		return false;
	}
	let header = outer_loop.borrow().header.clone();
	if header.borrow().phi_instrs.is_empty() {
		return false;
	}
	let loop_blocks = exits.blocks.clone();
	trace!(
		"strip-mining loop {} with inner bound {}",
		job.loop_id,
		inner
	);

	// split the header right after its phis; the backedge target moves
	// into the split-off body head
	let body_head = split_block_at(&header, 0, func);
	let cur_latch = if latch.borrow().id == header.borrow().id {
		body_head.clone()
	} else {
		latch.clone()
	};

	// split the latch right before its conditional terminator
	let at = cur_latch.borrow().instrs.len();
	let inner_latch = split_block_at(&cur_latch, at, func);

	// the original exit branch and its polarity
	let orig_term = inner_latch.borrow().jump_instr.clone().unwrap();
	let (t_true, _t_false) = match orig_term.get_variant() {
		llvm::LlvmInstrVariant::JumpCondInstr(v) => {
			(v.target_true.clone(), v.target_false.clone())
		}
		_ => return false,
	};
	let continues_on_true = t_true == header.borrow().label();

	// chunk bound: endCond = iv + inner * step, computed per outer
	// iteration in the header
	let iv_type = bounds.indvar.var_type;
	let end_cond = temp_mgr.new_temp(iv_type);
	let chunk_step = inner * bounds.step;
	let chunk_value = if iv_type == VarType::I64 {
		Value::Int64(chunk_step)
	} else {
		Value::Int(chunk_step as i32)
	};
	header.borrow_mut().push(Box::new(ArithInstr {
		target: end_cond.clone(),
		op: ArithOp::Add,
		var_type: iv_type,
		lhs: Value::Temp(bounds.indvar.clone()),
		rhs: chunk_value,
	}));

	// outer pre-exit block carrying the original exit branch
	let mut pre_exit = func.new_basicblock(header.borrow().weight);
	pre_exit.set_jump(Some(orig_term));
	let pre_exit = Rc::new(RefCell::new(pre_exit));
	{
		let pos = func
			.cfg
			.blocks
			.iter()
			.position(|v| *v == inner_latch)
			.unwrap();
		func.cfg.blocks.insert(pos + 1, pre_exit.clone());
	}

	// inner latch decides: continue the chunk, or hand off to the
	// outer pre-exit
	{
		let mut lb = inner_latch.borrow_mut();
		let ne = temp_mgr.new_temp(VarType::I32);
		lb.push(Box::new(CompInstr {
			kind: CompKind::Icmp,
			target: ne.clone(),
			op: if continues_on_true {
				CompOp::NE
			} else {
				CompOp::EQ
			},
			var_type: iv_type,
			lhs: Value::Temp(bounds.next.clone()),
			rhs: Value::Temp(end_cond.clone()),
		}));
		let combined = temp_mgr.new_temp(VarType::I32);
		lb.push(Box::new(ArithInstr {
			target: combined.clone(),
			op: if continues_on_true {
				ArithOp::And
			} else {
				ArithOp::Or
			},
			var_type: VarType::I32,
			lhs: Value::Temp(bounds.cond_temp.clone()),
			rhs: Value::Temp(ne),
		}));
		let (on_true, on_false) = if continues_on_true {
			(body_head.borrow().label(), pre_exit.borrow().label())
		} else {
			(pre_exit.borrow().label(), body_head.borrow().label())
		};
		lb.set_jump(Some(Box::new(JumpCondInstr {
			var_type: VarType::I32,
			cond: Value::Temp(combined),
			target_true: on_true,
			target_false: on_false,
		})));
	}

	// rewire edges: inner backedge to the body head, outer edges from
	// the pre-exit
	let inner_latch_label = inner_latch.borrow().label();
	{
		let succs = inner_latch.borrow().succ.clone();
		for s in succs.iter() {
			// header and exit now hang off the pre-exit
			s.borrow_mut().replace_prev(&inner_latch_label, pre_exit.clone());
			pre_exit.borrow_mut().succ.push(s.clone());
		}
		inner_latch.borrow_mut().succ.clear();
		inner_latch.borrow_mut().succ.push(body_head.clone());
		inner_latch.borrow_mut().succ.push(pre_exit.clone());
		body_head.borrow_mut().prev.push(inner_latch.clone());
		pre_exit.borrow_mut().prev.push(inner_latch.clone());
	}

	// clone the outer phis into the inner header and remap the body
	let pre_exit_label = pre_exit.borrow().label();
	let header_label = header.borrow().label();
	let mut temp_map: HashMap<LlvmTemp, Value> = HashMap::new();
	for phi in header.borrow().phi_instrs.iter() {
		let clone_target = temp_mgr.new_temp(phi.var_type);
		temp_map.insert(phi.target.clone(), Value::Temp(clone_target));
	}
	let mut inner_phis = Vec::new();
	for phi in header.borrow().phi_instrs.iter() {
		let latch_value = phi
			.source
			.iter()
			.find(|(_, l)| *l == pre_exit_label)
			.map(|(v, _)| v.clone());
		let Some(mut latch_value) = latch_value else { continue };
		// a chunk hands the current incarnation back around
		latch_value.map_temp(&temp_map);
		let clone_target =
			temp_map.get(&phi.target).unwrap().unwrap_temp().unwrap();
		inner_phis.push(PhiInstr::new(
			clone_target,
			vec![
				(Value::Temp(phi.target.clone()), header_label.clone()),
				(latch_value, inner_latch_label.clone()),
			],
		));
	}
	for bb in loop_blocks.iter() {
		if *bb == header {
			continue;
		}
		bb.borrow_mut().map_temp(&temp_map);
	}
	body_head.borrow_mut().map_temp(&temp_map);
	inner_latch.borrow_mut().map_temp(&temp_map);
	for phi in inner_phis {
		body_head.borrow_mut().phi_instrs.push(phi);
	}
	// values leaving through the exit, and the ones the header restarts
	// the next chunk from, come from the current chunk
	for node in [&exit, &header] {
		for phi in node.borrow_mut().phi_instrs.iter_mut() {
			for (v, l) in phi.source.iter_mut() {
				if *l == pre_exit_label {
					v.map_temp(&temp_map);
				}
			}
		}
	}

	// chunk accounting: ((next - iv) / step) * body cost, sign-extended
	// into the clock domain
	{
		let mut instrs = Vec::new();
		let next64 = widen_to_i64(
			Value::Temp(bounds.next.clone()),
			&mut instrs,
			temp_mgr,
		);
		let iv64 = widen_to_i64(
			Value::Temp(bounds.indvar.clone()),
			&mut instrs,
			temp_mgr,
		);
		let diff = temp_mgr.new_temp(VarType::I64);
		instrs.push(Box::new(ArithInstr {
			target: diff.clone(),
			op: ArithOp::Sub,
			var_type: VarType::I64,
			lhs: next64,
			rhs: iv64,
		}));
		let iters = temp_mgr.new_temp(VarType::I64);
		instrs.push(Box::new(ArithInstr {
			target: iters.clone(),
			op: ArithOp::Div,
			var_type: VarType::I64,
			lhs: Value::Temp(diff),
			rhs: Value::Int64(bounds.step),
		}));
		let amount = temp_mgr.new_temp(VarType::I64);
		instrs.push(Box::new(ArithInstr {
			target: amount.clone(),
			op: ArithOp::Mul,
			var_type: VarType::I64,
			lhs: Value::Temp(iters),
			rhs: Value::Int64(job.body_cost),
		}));
		let mut pe = pre_exit.borrow_mut();
		for i in instrs {
			pe.push(i);
		}
		forest.mark(
			ProbePoint {
				block: pe.id,
				slot: ProbeSlot::BeforeTerm,
			},
			ProbeAmount::Value(amount),
		);
	}

	// register the chunk loop as a child in the loop forest
	let inner_loop = Rc::new(RefCell::new(Loop::new(
		inner_loop_id,
		body_head.clone(),
	)));
	inner_loop.borrow_mut().outer = Some(outer_loop.clone());
	outer_loop.borrow_mut().no_inner = false;
	for bb in loop_blocks.iter() {
		if *bb != header {
			bb.borrow_mut().loop_ = Some(inner_loop.clone());
		}
	}
	body_head.borrow_mut().loop_ = Some(inner_loop.clone());
	inner_latch.borrow_mut().loop_ = Some(inner_loop.clone());
	pre_exit.borrow_mut().loop_ = Some(outer_loop.clone());

	// the fresh blocks join the block-to-container map
	for bb in [&body_head, &inner_latch, &pre_exit] {
		let id = bb.borrow().id;
		let unit = UnitLcc {
			block: id,
			first: 0,
			last: bb.borrow().instrs.len(),
			with_term: true,
			ends_with_fence: false,
			cost: cost_const(0),
			initial: 0,
		};
		forest.register_unit(unit);
	}
	true
}
