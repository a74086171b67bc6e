use std::path::PathBuf;

pub use clap::Parser;

/// Instrument LLVM-flavored IR with compiler-interrupt probes.
#[derive(Parser, Debug)]
#[command(name = "cintr", version)]
pub struct Args {
	/// Input IR file
	#[arg(value_parser)]
	pub input: Option<String>,

	/// Output file (defaults to stdout)
	#[arg(short)]
	pub output: Option<String>,

	/// Instrumentation granularity (1-18)
	#[arg(long = "inst-gran", default_value_t = 2)]
	pub inst_gran: u32,

	/// Clock type: 0 = predictive, 1 = instantaneous
	#[arg(long = "clock-type", default_value_t = 1)]
	pub clock_type: u32,

	/// Base cost of a memory operation
	#[arg(long = "mem-ops-cost", default_value_t = 1)]
	pub mem_ops_cost: i64,

	/// Target interval in IR units
	#[arg(long = "intv", default_value_t = 1000)]
	pub target_interval: i64,

	/// Target interval in cycles (cycle-gated modes)
	#[arg(long = "cycle-intv", default_value_t = 1000)]
	pub target_cycles: i64,

	/// Commit interval: the most cost carried between probes
	#[arg(long = "commit-intv")]
	pub commit_interval: Option<i64>,

	/// Default cost of an external library call
	#[arg(long = "ext-lib-cost", default_value_t = 1)]
	pub ext_lib_cost: i64,

	/// Largest branch-cost spread amortized behind an average
	#[arg(long = "all-dev", default_value_t = 100)]
	pub allowed_deviation: i64,

	/// Emit the thread-local clock definitions from this module
	#[arg(long = "defclock", default_value_t = 0)]
	pub defclock: u32,

	/// Emit commitCount/pushCount profiling counters
	#[arg(long = "probe-stats")]
	pub probe_stats: bool,

	/// Instruction-class configuration file
	#[arg(long = "config-file")]
	pub config_file: Option<PathBuf>,

	/// Library cost table to read
	#[arg(long = "in-cost-file")]
	pub in_cost_file: Option<PathBuf>,

	/// Library cost table to write
	#[arg(long = "out-cost-file")]
	pub out_cost_file: Option<PathBuf>,

	/// Print a JSON statistics record to stderr
	#[arg(long)]
	pub stats: bool,

	/// Log level
	#[arg(long = "log", default_value = "warn")]
	pub log_level: String,
}
