use std::{
	collections::HashSet,
	fs,
	path::{Path, PathBuf},
};

use utils::{errors::Result, CintrError};

/// How the logical clock advances.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClockKind {
	/// Region costs are pre-computed; probes sit on region boundaries.
	Predictive,
	/// A concrete accumulator flows forward and commits greedily.
	Instantaneous,
	/// IR accounting with the commit test gated on the cycle counter.
	CycleGated,
	/// The clock itself accumulates cycle-counter deltas.
	Cycles,
}

/// Which placement engine decides where probes go.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Placement {
	Opt,
	Naive,
	Legacy,
	Coredet,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Storage {
	ThreadLocal,
	Process,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Accuracy {
	Heuristic,
	Accurate,
}

/// The four orthogonal axes behind the flat mode number.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ModeFlags {
	pub clock: ClockKind,
	pub placement: Placement,
	pub storage: Storage,
	pub accuracy: Accuracy,
	/// Branch on raw cycle delta instead of accumulated cost.
	pub push_on_cycles: bool,
}

/// Flat instrumentation-granularity selector, kept numbering-compatible
/// with the original driver (`-inst-gran=N`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InstGranularity {
	OptHeuristic = 1,
	OptHeuristicTl = 2,
	OptAccurate = 3,
	OptIntermediate = 4,
	NaiveHeuristic = 5,
	NaiveHeuristicTl = 6,
	NaiveAccurate = 7,
	NaiveIntermediate = 8,
	LegacyHeuristic = 9,
	LegacyAccurate = 10,
	LegacyIntermediate = 11,
	CoredetHeuristic = 12,
	CoredetAccurate = 13,
	CoredetIntermediate = 14,
	OptCycles = 15,
	NaiveCycles = 16,
	OptFiber = 17,
	NaiveFiber = 18,
}

impl InstGranularity {
	pub fn from_number(n: u32) -> Option<Self> {
		use InstGranularity::*;
		Some(match n {
			1 => OptHeuristic,
			2 => OptHeuristicTl,
			3 => OptAccurate,
			4 => OptIntermediate,
			5 => NaiveHeuristic,
			6 => NaiveHeuristicTl,
			7 => NaiveAccurate,
			8 => NaiveIntermediate,
			9 => LegacyHeuristic,
			10 => LegacyAccurate,
			11 => LegacyIntermediate,
			12 => CoredetHeuristic,
			13 => CoredetAccurate,
			14 => CoredetIntermediate,
			15 => OptCycles,
			16 => NaiveCycles,
			17 => OptFiber,
			18 => NaiveFiber,
			_ => return None,
		})
	}

	pub fn flags(&self, clock_type: u32) -> ModeFlags {
		use InstGranularity::*;
		let clock = match self {
			OptIntermediate | NaiveIntermediate | LegacyIntermediate
			| CoredetIntermediate => ClockKind::CycleGated,
			OptCycles | NaiveCycles => ClockKind::Cycles,
			OptFiber | NaiveFiber => ClockKind::CycleGated,
			_ if clock_type == 0 => ClockKind::Predictive,
			_ => ClockKind::Instantaneous,
		};
		let placement = match self {
			OptHeuristic | OptHeuristicTl | OptAccurate | OptIntermediate
			| OptCycles | OptFiber => Placement::Opt,
			NaiveHeuristic | NaiveHeuristicTl | NaiveAccurate
			| NaiveIntermediate | NaiveCycles | NaiveFiber => Placement::Naive,
			LegacyHeuristic | LegacyAccurate | LegacyIntermediate => {
				Placement::Legacy
			}
			CoredetHeuristic | CoredetAccurate | CoredetIntermediate => {
				Placement::Coredet
			}
		};
		let storage = match self {
			OptHeuristic | NaiveHeuristic => Storage::Process,
			_ => Storage::ThreadLocal,
		};
		let accuracy = match self {
			OptAccurate | NaiveAccurate | LegacyAccurate | CoredetAccurate => {
				Accuracy::Accurate
			}
			_ => Accuracy::Heuristic,
		};
		ModeFlags {
			clock,
			placement,
			storage,
			accuracy,
			push_on_cycles: matches!(self, OptFiber | NaiveFiber),
		}
	}
}

pub const DEFAULT_ALLOWED_DEVIATION: i64 = 100;
pub const DEFAULT_EXT_LIB_COST: i64 = 1;
pub const DEFAULT_FENCE_COST: i64 = 50;

pub struct InstrumentConfig {
	pub granularity: InstGranularity,
	/// 0 = predictive, 1 = instantaneous.
	pub clock_type: u32,
	pub mem_ops_cost: i64,
	/// Base cost of arithmetic, comparison and conversion instructions.
	pub arith_cost: i64,
	/// Overhead charged for the call itself, on top of the callee.
	pub call_base_cost: i64,
	pub target_interval: i64,
	pub target_cycles: i64,
	pub commit_interval: Option<i64>,
	pub ext_lib_cost: i64,
	pub allowed_deviation: i64,
	pub define_clock: bool,
	pub probe_counters: bool,
	pub config_file: Option<PathBuf>,
	pub in_cost_file: Option<PathBuf>,
	pub out_cost_file: Option<PathBuf>,
	/// Callee names across which no cost may be amortized.
	pub fences: HashSet<String>,
}

impl Default for InstrumentConfig {
	fn default() -> Self {
		Self {
			granularity: InstGranularity::OptHeuristicTl,
			clock_type: 1,
			mem_ops_cost: 1,
			arith_cost: 1,
			call_base_cost: 1,
			target_interval: 1000,
			target_cycles: 1000,
			commit_interval: Some(100),
			ext_lib_cost: DEFAULT_EXT_LIB_COST,
			allowed_deviation: DEFAULT_ALLOWED_DEVIATION,
			define_clock: false,
			probe_counters: false,
			config_file: None,
			in_cost_file: None,
			out_cost_file: None,
			fences: ["pthread_mutex_lock", "pthread_mutex_unlock"]
				.into_iter()
				.map(String::from)
				.collect(),
		}
	}
}

impl InstrumentConfig {
	pub fn flags(&self) -> ModeFlags {
		self.granularity.flags(self.clock_type)
	}

	/// The largest cost that may stay uncommitted between probes. In
	/// predictive mode the target interval bounds region growth instead.
	pub fn commit_bound(&self) -> i64 {
		self.commit_interval.unwrap_or(self.target_interval)
	}

	/// Every configuration error is fatal before any IR is touched.
	pub fn validate(&self) -> Result<()> {
		if self.clock_type > 1 {
			return Err(CintrError::ConfigError(format!(
				"clock type {} is not 0 (predictive) or 1 (instantaneous)",
				self.clock_type
			)));
		}
		if self.target_interval <= 0 {
			return Err(CintrError::ConfigError(
				"target interval must be positive".to_string(),
			));
		}
		if self.clock_type == 1 && self.commit_interval.is_none() {
			return Err(CintrError::ConfigError(
				"instantaneous clock requires a commit interval".to_string(),
			));
		}
		if self.commit_interval.map_or(false, |c| c <= 0) {
			return Err(CintrError::ConfigError(
				"commit interval must be positive".to_string(),
			));
		}
		if self.allowed_deviation < 0 {
			return Err(CintrError::ConfigError(
				"allowed deviation must be non-negative".to_string(),
			));
		}
		Ok(())
	}

	/// Instruction-class configuration: `fence:<name>` registers an
	/// opaque callee, `cost:<class>:<n>` overrides a base-cost class
	/// (`memory`, `arith`, `call`, `extlib`). A missing file is
	/// allowed.
	pub fn load_config_file(&mut self) -> Result<()> {
		let Some(path) = self.config_file.clone() else {
			return Ok(());
		};
		if !Path::new(&path).exists() {
			return Ok(());
		}
		let content =
			fs::read_to_string(&path).map_err(utils::map_sys_err)?;
		for (lineno, line) in content.lines().enumerate() {
			let line = line.trim();
			if line.is_empty() || line.starts_with('#') {
				continue;
			}
			let fields: Vec<_> = line.split(':').collect();
			match fields.as_slice() {
				["fence", name] => {
					self.fences.insert(name.to_string());
				}
				["cost", "memory", n] => {
					self.mem_ops_cost = parse_cost(*n, &path, lineno)?;
				}
				["cost", "arith", n] => {
					self.arith_cost = parse_cost(*n, &path, lineno)?;
				}
				["cost", "call", n] => {
					self.call_base_cost = parse_cost(*n, &path, lineno)?;
				}
				["cost", "extlib", n] => {
					self.ext_lib_cost = parse_cost(*n, &path, lineno)?;
				}
				_ => {
					return Err(CintrError::ConfigError(format!(
						"{}:{}: unrecognized directive `{}`",
						path.display(),
						lineno + 1,
						line
					)))
				}
			}
		}
		Ok(())
	}
}

fn parse_cost(s: &str, path: &Path, lineno: usize) -> Result<i64> {
	s.parse().map_err(|_| {
		CintrError::ConfigError(format!(
			"{}:{}: `{}` is not a cost",
			path.display(),
			lineno + 1,
			s
		))
	})
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn mode_axes_decompose() {
		let flags = InstGranularity::OptHeuristicTl.flags(1);
		assert_eq!(flags.clock, ClockKind::Instantaneous);
		assert_eq!(flags.placement, Placement::Opt);
		assert_eq!(flags.storage, Storage::ThreadLocal);
		assert!(!flags.push_on_cycles);

		let flags = InstGranularity::NaiveIntermediate.flags(0);
		assert_eq!(flags.clock, ClockKind::CycleGated);
		assert_eq!(flags.placement, Placement::Naive);

		let flags = InstGranularity::OptFiber.flags(0);
		assert!(flags.push_on_cycles);
	}

	#[test]
	fn all_eighteen_modes_resolve() {
		for n in 1..=18 {
			assert!(InstGranularity::from_number(n).is_some(), "mode {}", n);
		}
		assert!(InstGranularity::from_number(0).is_none());
		assert!(InstGranularity::from_number(19).is_none());
	}

	#[test]
	fn config_file_overrides_cost_classes() {
		let dir = std::env::temp_dir().join("cintr-config-test");
		std::fs::create_dir_all(&dir).unwrap();
		let path = dir.join("classes.cfg");
		std::fs::write(
			&path,
			"# instruction classes\nfence:my_lock\ncost:memory:4\n\
			 cost:arith:2\ncost:call:3\ncost:extlib:7\n",
		)
		.unwrap();
		let mut config = InstrumentConfig::default();
		config.config_file = Some(path.clone());
		config.load_config_file().unwrap();
		assert!(config.fences.contains("my_lock"));
		assert_eq!(config.mem_ops_cost, 4);
		assert_eq!(config.arith_cost, 2);
		assert_eq!(config.call_base_cost, 3);
		assert_eq!(config.ext_lib_cost, 7);

		std::fs::write(&path, "cost:stack:9\n").unwrap();
		let mut config = InstrumentConfig::default();
		config.config_file = Some(path.clone());
		assert!(config.load_config_file().is_err());
		std::fs::remove_file(path).ok();
	}

	#[test]
	fn validation_rejects_bad_configs() {
		let mut config = InstrumentConfig::default();
		assert!(config.validate().is_ok());
		config.target_interval = 0;
		assert!(config.validate().is_err());

		let mut config = InstrumentConfig::default();
		config.clock_type = 1;
		config.commit_interval = None;
		assert!(config.validate().is_err());
	}
}
