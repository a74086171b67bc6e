use std::{cell::RefCell, rc::Rc};

use flow::{basicblock::split_block_at, prelude::*};
use llvm::{
	ArithInstr, ArithOp, CallInstr, CallPtrInstr, CompInstr, CompKind,
	CompOp, JumpCondInstr, JumpInstr, LlvmInstr, LoadInstr, StoreInstr,
	Temp, TempManager, Value, VarType,
};
use log::warn;
use utils::Label;

use crate::{
	config::{ClockKind, InstrumentConfig, ModeFlags},
	costmodel::expand_cost,
	lcc::{ProbeAmount, ProbeMarker, ProbeSlot},
	stats::Stats,
};

pub const LOCAL_LC: &str = "LocalLC";
pub const DISABLED_COUNT: &str = "lc_disabled_count";
pub const INTV_ACTION_HOOK: &str = "intvActionHook";
pub const LAST_CYCLE_TS: &str = "LastCycleTS";
pub const COMMIT_COUNT: &str = "commitCount";
pub const PUSH_COUNT: &str = "pushCount";
pub const CYCLE_COUNTER: &str = "llvm.readcyclecounter";

/// Cost of the probe sequence itself; the clock reset pre-charges it so
/// the next commit does not under-report.
pub const PROBE_FIXED_OVERHEAD: i64 = 6;

/// Which runtime symbols the emitted code ended up referring to.
#[derive(Default)]
pub struct RuntimeRefs {
	pub clock: bool,
	pub disabled: bool,
	pub hook: bool,
	pub last_cycle: bool,
	pub counters: bool,
	pub cycle_counter: bool,
}

fn tls(name: &str, var_type: VarType) -> Value {
	Value::Temp(Temp::new(name, var_type, true))
}

/// Materialize every probe marker into IR. Markers are applied from the
/// back of each block so earlier insertion points stay valid.
pub fn emit_probes(
	func: &mut Func,
	markers: Vec<ProbeMarker>,
	config: &InstrumentConfig,
	temp_mgr: &mut TempManager,
	refs: &mut RuntimeRefs,
	stats: &mut Stats,
) {
	let flags = config.flags();
	let mut by_block: std::collections::HashMap<i32, Vec<ProbeMarker>> =
		std::collections::HashMap::new();
	for m in markers {
		by_block.entry(m.point.block).or_default().push(m);
	}
	let mut block_ids: Vec<i32> = by_block.keys().copied().collect();
	block_ids.sort();
	for id in block_ids {
		let mut ms = by_block.remove(&id).unwrap();
		ms.sort_by_key(|m| match m.point.slot {
			ProbeSlot::BeforeTerm => usize::MAX,
			ProbeSlot::Before(i) => i,
		});
		for m in ms.into_iter().rev() {
			let Some(block) = func.cfg.block_by_id(id) else { continue };
			let mut idx = match m.point.slot {
				ProbeSlot::BeforeTerm => block.borrow().instrs.len(),
				ProbeSlot::Before(i) => i,
			};
			let amount = match m.amount {
				ProbeAmount::Const(c) => Value::Int64(c),
				ProbeAmount::Value(t) => {
					stats.value_probes += 1;
					Value::Temp(t)
				}
				ProbeAmount::Sym(cost) => {
					match expand_cost(&cost, &func.params, temp_mgr) {
						Some((instrs, value)) => {
							stats.value_probes += 1;
							let mut b = block.borrow_mut();
							let n = instrs.len();
							for (off, i) in instrs.into_iter().enumerate() {
								b.instrs.insert(idx + off, i);
							}
							idx += n;
							value
						}
						None => {
							warn!(
								"@{}: cost not lowerable at probe site, probe dropped",
								func.name
							);
							continue;
						}
					}
				}
			};
			insert_probe(
				func, &block, idx, amount, &flags, config, temp_mgr, refs,
			);
			stats.probes += 1;
		}
	}
}

/// The canonical three-step sequence: guard on the disabled depth,
/// add the amount into the clock, and commit through the handler when
/// the target interval is crossed.
#[allow(clippy::too_many_arguments)]
fn insert_probe(
	func: &mut Func,
	block: &Node,
	idx: usize,
	amount: Value,
	flags: &ModeFlags,
	config: &InstrumentConfig,
	temp_mgr: &mut TempManager,
	refs: &mut RuntimeRefs,
) {
	let cont = split_block_at(block, idx, func);
	let inc_bb = Rc::new(RefCell::new(
		func.new_basicblock(block.borrow().weight),
	));
	let fire_bb = Rc::new(RefCell::new(
		func.new_basicblock(block.borrow().weight),
	));
	{
		let pos =
			func.cfg.blocks.iter().position(|v| *v == *block).unwrap();
		func.cfg.blocks.insert(pos + 1, inc_bb.clone());
		func.cfg.blocks.insert(pos + 2, fire_bb.clone());
	}
	inc_bb.borrow_mut().loop_ = block.borrow().loop_.clone();
	fire_bb.borrow_mut().loop_ = block.borrow().loop_.clone();

	// guard: continue only when interrupts are not disabled
	refs.disabled = true;
	let depth = temp_mgr.new_temp(VarType::I32);
	let guard = temp_mgr.new_temp(VarType::I32);
	{
		let mut b = block.borrow_mut();
		b.push(Box::new(LoadInstr {
			target: depth.clone(),
			var_type: VarType::I32,
			addr: tls(DISABLED_COUNT, VarType::Ptr),
		}));
		b.push(Box::new(CompInstr {
			kind: CompKind::Icmp,
			target: guard.clone(),
			op: CompOp::EQ,
			var_type: VarType::I32,
			lhs: Value::Temp(depth.clone()),
			rhs: Value::Int(0),
		}));
		b.set_jump(Some(Box::new(JumpCondInstr {
			var_type: VarType::I32,
			cond: Value::Temp(guard.clone()),
			target_true: inc_bb.borrow().label(),
			target_false: cont.borrow().label(),
		})));
		let cont_id = cont.borrow().id;
		b.succ.retain(|s| s.borrow().id == cont_id);
		b.succ.insert(0, inc_bb.clone());
	}
	inc_bb.borrow_mut().prev.push(block.clone());

	// increment and threshold test
	refs.clock = true;
	let clk2 = temp_mgr.new_temp(VarType::I64);
	let over = temp_mgr.new_temp(VarType::I32);
	let mut cycle_now = None;
	{
		let mut b = inc_bb.borrow_mut();
		let cycle_delta = match flags.clock {
			ClockKind::CycleGated | ClockKind::Cycles => {
				refs.cycle_counter = true;
				refs.last_cycle = true;
				let now = temp_mgr.new_temp(VarType::I64);
				b.push(Box::new(CallInstr {
					target: now.clone(),
					var_type: VarType::I64,
					func: Label::new(CYCLE_COUNTER),
					params: vec![],
				}));
				let last = temp_mgr.new_temp(VarType::I64);
				b.push(Box::new(LoadInstr {
					target: last.clone(),
					var_type: VarType::I64,
					addr: tls(LAST_CYCLE_TS, VarType::Ptr),
				}));
				let delta = temp_mgr.new_temp(VarType::I64);
				b.push(Box::new(ArithInstr {
					target: delta.clone(),
					op: ArithOp::Sub,
					var_type: VarType::I64,
					lhs: Value::Temp(now.clone()),
					rhs: Value::Temp(last),
				}));
				cycle_now = Some(now);
				Some(delta)
			}
			_ => None,
		};
		let clk = temp_mgr.new_temp(VarType::I64);
		b.push(Box::new(LoadInstr {
			target: clk.clone(),
			var_type: VarType::I64,
			addr: tls(LOCAL_LC, VarType::Ptr),
		}));
		let increment = match flags.clock {
			ClockKind::Cycles => Value::Temp(cycle_delta.clone().unwrap()),
			_ => amount,
		};
		b.push(Box::new(ArithInstr {
			target: clk2.clone(),
			op: ArithOp::Add,
			var_type: VarType::I64,
			lhs: Value::Temp(clk),
			rhs: increment,
		}));
		b.push(Box::new(StoreInstr {
			value: Value::Temp(clk2.clone()),
			addr: tls(LOCAL_LC, VarType::Ptr),
		}));
		if config.probe_counters {
			refs.counters = true;
			bump_counter(&mut b, PUSH_COUNT, temp_mgr);
		}
		// the commit test: accumulated cost against the target interval,
		// or elapsed cycles against the cycle target
		let (test_value, threshold) = match flags.clock {
			ClockKind::CycleGated => (
				Value::Temp(cycle_delta.unwrap()),
				config.target_cycles,
			),
			ClockKind::Cycles => {
				(Value::Temp(clk2.clone()), config.target_cycles)
			}
			_ => (Value::Temp(clk2.clone()), config.target_interval),
		};
		b.push(Box::new(CompInstr {
			kind: CompKind::Icmp,
			target: over.clone(),
			op: CompOp::SGE,
			var_type: VarType::I64,
			lhs: test_value,
			rhs: Value::Int64(threshold),
		}));
		b.set_jump(Some(Box::new(JumpCondInstr {
			var_type: VarType::I32,
			cond: Value::Temp(over.clone()),
			target_true: fire_bb.borrow().label(),
			target_false: cont.borrow().label(),
		})));
		b.succ.push(fire_bb.clone());
		b.succ.push(cont.clone());
	}
	fire_bb.borrow_mut().prev.push(inc_bb.clone());
	cont.borrow_mut().prev.push(inc_bb.clone());

	// commit: raise the guard depth, reset the clock, call the handler
	// through the freshly loaded hook, then reload and lower the depth
	{
		refs.hook = true;
		let mut b = fire_bb.borrow_mut();
		let raised = temp_mgr.new_temp(VarType::I32);
		b.push(Box::new(ArithInstr {
			target: raised.clone(),
			op: ArithOp::Add,
			var_type: VarType::I32,
			lhs: Value::Temp(depth),
			rhs: Value::Int(1),
		}));
		b.push(Box::new(StoreInstr {
			value: Value::Temp(raised),
			addr: tls(DISABLED_COUNT, VarType::Ptr),
		}));
		let reset = match flags.clock {
			ClockKind::Cycles => 0,
			_ => PROBE_FIXED_OVERHEAD + config.target_interval / 2,
		};
		b.push(Box::new(StoreInstr {
			value: Value::Int64(reset),
			addr: tls(LOCAL_LC, VarType::Ptr),
		}));
		if let Some(now) = cycle_now {
			b.push(Box::new(StoreInstr {
				value: Value::Temp(now),
				addr: tls(LAST_CYCLE_TS, VarType::Ptr),
			}));
		}
		if config.probe_counters {
			bump_counter(&mut b, COMMIT_COUNT, temp_mgr);
		}
		let hook = temp_mgr.new_temp(VarType::Ptr);
		b.push(Box::new(LoadInstr {
			target: hook.clone(),
			var_type: VarType::Ptr,
			addr: tls(INTV_ACTION_HOOK, VarType::Ptr),
		}));
		b.push(Box::new(CallPtrInstr {
			target: Temp::new("_", VarType::Void, false),
			var_type: VarType::Void,
			func: Value::Temp(hook),
			params: vec![(VarType::I64, Value::Temp(clk2))],
		}));
		// reload instead of reusing: the handler may have nested
		let depth2 = temp_mgr.new_temp(VarType::I32);
		b.push(Box::new(LoadInstr {
			target: depth2.clone(),
			var_type: VarType::I32,
			addr: tls(DISABLED_COUNT, VarType::Ptr),
		}));
		let lowered = temp_mgr.new_temp(VarType::I32);
		b.push(Box::new(ArithInstr {
			target: lowered.clone(),
			op: ArithOp::Sub,
			var_type: VarType::I32,
			lhs: Value::Temp(depth2),
			rhs: Value::Int(1),
		}));
		b.push(Box::new(StoreInstr {
			value: Value::Temp(lowered),
			addr: tls(DISABLED_COUNT, VarType::Ptr),
		}));
		b.set_jump(Some(JumpInstr::new(cont.borrow().label())));
		b.succ.push(cont.clone());
	}
	cont.borrow_mut().prev.push(fire_bb.clone());
}

fn bump_counter(
	b: &mut std::cell::RefMut<'_, flow::basicblock::BasicBlock>,
	name: &str,
	temp_mgr: &mut TempManager,
) {
	let cur = temp_mgr.new_temp(VarType::I64);
	b.push(Box::new(LoadInstr {
		target: cur.clone(),
		var_type: VarType::I64,
		addr: tls(name, VarType::Ptr),
	}));
	let next = temp_mgr.new_temp(VarType::I64);
	b.push(Box::new(ArithInstr {
		target: next.clone(),
		op: ArithOp::Add,
		var_type: VarType::I64,
		lhs: Value::Temp(cur),
		rhs: Value::Int64(1),
	}));
	b.push(Box::new(StoreInstr {
		value: Value::Temp(next),
		addr: tls(name, VarType::Ptr),
	}));
}
