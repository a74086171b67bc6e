pub mod baseline;
pub mod builder;
pub mod config;
pub mod context;
pub mod cost;
pub mod costmodel;
pub mod evaluate;
pub mod lcc;
pub mod loop_transform;
pub mod probe;
pub mod reduce;
pub mod shape;
pub mod stats;

#[cfg(test)]
mod tests;

use std::collections::{HashMap, HashSet};

use flow::prelude::*;
use llvm::{
	GlobalVar, LlvmInstrTrait, LlvmInstrVariant::CallInstr, TempManager,
	VarType,
};
use log::{debug, info};
use utils::errors::Result;

use config::{InstrumentConfig, Placement, Storage};
use context::FuncCx;
use costmodel::{load_library_costs, write_library_costs, CostModel, FuncCost};
use evaluate::FuncTraits;
use probe::RuntimeRefs;
use stats::Stats;

/// The name an application uses to exempt its own handler machinery
/// from instrumentation.
pub const REGISTER_CI: &str = "register_ci";

pub struct CompilerInterrupt {
	pub config: InstrumentConfig,
	pub stats: Stats,
	lib_costs: HashMap<String, i64>,
	summaries: HashMap<String, FuncCost>,
	ci_internal: HashSet<String>,
}

impl CompilerInterrupt {
	/// Validates the configuration and loads the cost tables; every
	/// error here aborts before any IR is touched.
	pub fn new(mut config: InstrumentConfig) -> Result<Self> {
		config.load_config_file()?;
		config.validate()?;
		let lib_costs = load_library_costs(&config)?;
		Ok(Self {
			config,
			stats: Stats::default(),
			lib_costs,
			summaries: HashMap::new(),
			ci_internal: HashSet::new(),
		})
	}

	pub fn apply(&mut self, program: &mut Program) -> Result<()> {
		self.scan_markers(program);
		let cg = CallGraph::build(program);
		let defined: HashSet<String> =
			program.funcs.iter().map(|f| f.name.clone()).collect();
		let thread_entries = thread_entries(program);
		let mut no_credit: HashSet<String> = thread_entries.clone();
		for name in defined.iter() {
			if cg.is_recursive(name) {
				no_credit.insert(name.clone());
			}
		}

		let mut refs = RuntimeRefs::default();
		for name in cg.order.clone() {
			if self.ci_internal.contains(&name) {
				debug!("@{} is interrupt-internal, skipping", name);
				continue;
			}
			let Some(idx) =
				program.funcs.iter().position(|f| f.name == name)
			else {
				continue;
			};
			let traits = FuncTraits {
				is_thread_entry: thread_entries.contains(&name),
				is_recursive: cg.is_recursive(&name),
			};
			let Self {
				config,
				stats,
				lib_costs,
				summaries,
				ci_internal,
			} = self;
			let func = &mut program.funcs[idx];
			let temp_mgr = &mut program.temp_mgr;
			stats.functions += 1;
			let record = match config.flags().placement {
				Placement::Opt => instrument_opt(
					config,
					lib_costs,
					summaries,
					ci_internal,
					&defined,
					&no_credit,
					&traits,
					func,
					temp_mgr,
					&mut refs,
					stats,
				)?,
				Placement::Naive => {
					let markers = baseline::naive_markers(func, config, &defined);
					probe::emit_probes(
						func, markers, config, temp_mgr, &mut refs, stats,
					);
					FuncCost::default()
				}
				Placement::Legacy => {
					func.cfg.loop_analysis();
					let markers =
						baseline::legacy_markers(func, config, &defined);
					probe::emit_probes(
						func, markers, config, temp_mgr, &mut refs, stats,
					);
					FuncCost::default()
				}
				Placement::Coredet => {
					func.cfg.loop_analysis();
					let markers =
						baseline::coredet_markers(func, config, &defined);
					probe::emit_probes(
						func, markers, config, temp_mgr, &mut refs, stats,
					);
					FuncCost::default()
				}
			};
			self.summaries.insert(name, record);
		}

		if let Some(path) = self.config.out_cost_file.clone() {
			write_library_costs(&path, &cg.order, &self.summaries)?;
		}
		self.emit_runtime_globals(program, &refs);
		info!(
			"instrumented {} functions with {} probes",
			self.stats.functions, self.stats.probes
		);
		Ok(())
	}

	/// Calls to `register_ci(fn)` mark `fn` as interrupt-internal; it
	/// must never carry probes of its own.
	fn scan_markers(&mut self, program: &Program) {
		for func in program.funcs.iter() {
			for bb in func.cfg.blocks.iter() {
				for instr in bb.borrow().instrs.iter() {
					let CallInstr(call) = instr.get_variant() else {
						continue;
					};
					if call.func.name != REGISTER_CI {
						continue;
					}
					for (_, v) in call.params.iter() {
						if let Some(t) = v.unwrap_temp() {
							if t.is_global {
								self.ci_internal.insert(t.name);
							}
						}
					}
				}
			}
		}
	}

	fn emit_runtime_globals(
		&self,
		program: &mut Program,
		refs: &RuntimeRefs,
	) {
		let thread_local =
			self.config.flags().storage == Storage::ThreadLocal;
		let mut add = |name: &str, var_type: VarType| {
			if program.global_vars.iter().any(|g| g.name == name) {
				return;
			}
			let mut var = GlobalVar::new(name, var_type, 0);
			if thread_local {
				var = var.thread_local();
			}
			if !self.config.define_clock {
				var = var.external();
			}
			program.global_vars.push(var);
		};
		if refs.clock {
			add(probe::LOCAL_LC, VarType::I64);
		}
		if refs.disabled {
			add(probe::DISABLED_COUNT, VarType::I32);
		}
		if refs.hook {
			add(probe::INTV_ACTION_HOOK, VarType::Ptr);
		}
		if refs.last_cycle {
			add(probe::LAST_CYCLE_TS, VarType::I64);
		}
		if refs.counters {
			add(probe::COMMIT_COUNT, VarType::I64);
			add(probe::PUSH_COUNT, VarType::I64);
		}
		if refs.cycle_counter
			&& !program.decls.iter().any(|d| d.name == probe::CYCLE_COUNTER)
		{
			program.decls.push(FuncDecl {
				name: probe::CYCLE_COUNTER.to_string(),
				ret_type: VarType::I64,
				params: vec![],
			});
		}
	}
}

/// `main` and everything handed to `pthread_create` run at the top of a
/// thread; their prefix cost is never credited to a caller.
fn thread_entries(program: &Program) -> HashSet<String> {
	let mut entries = HashSet::new();
	entries.insert("main".to_string());
	for func in program.funcs.iter() {
		for bb in func.cfg.blocks.iter() {
			for instr in bb.borrow().instrs.iter() {
				let CallInstr(call) = instr.get_variant() else {
					continue;
				};
				if call.func.name != "pthread_create" {
					continue;
				}
				if let Some((_, v)) = call.params.get(2) {
					if let Some(t) = v.unwrap_temp() {
						if t.is_global {
							entries.insert(t.name);
						}
					}
				}
			}
		}
	}
	entries
}

#[allow(clippy::too_many_arguments)]
fn instrument_opt(
	config: &InstrumentConfig,
	lib_costs: &HashMap<String, i64>,
	summaries: &HashMap<String, FuncCost>,
	ci_internal: &HashSet<String>,
	defined: &HashSet<String>,
	no_credit: &HashSet<String>,
	traits: &FuncTraits,
	func: &mut Func,
	temp_mgr: &mut TempManager,
	refs: &mut RuntimeRefs,
	stats: &mut Stats,
) -> Result<FuncCost> {
	shape::shape_pre(func, temp_mgr);
	let cx = FuncCx::analyze(func);
	let cm = CostModel {
		config,
		lib_costs,
		summaries,
		defined,
		no_credit,
		ci_internal,
	};
	let has_fence = func.cfg.blocks.iter().any(|bb| {
		bb.borrow().instrs.iter().any(|i| cm.is_fence(i))
	});
	let mut forest = builder::build(func, &cm)?;
	reduce::reduce(&mut forest, func, &cx, &cm, config, stats);
	let summary =
		evaluate::evaluate(&mut forest, func, &cx, config, traits, stats);
	loop_transform::run(&mut forest, func, &cx, config, temp_mgr, stats);
	shape::shape_post(&mut forest, func);
	let markers = std::mem::take(&mut forest.markers);
	probe::emit_probes(func, markers, config, temp_mgr, refs, stats);
	Ok(FuncCost {
		// a function that reaches a fence accounts for itself
		summary: if has_fence { None } else { summary },
		has_fence,
	})
}
