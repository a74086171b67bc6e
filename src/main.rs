mod cli;

use std::{
	fs::{self, File},
	io,
	io::Write,
};

use anyhow::Result;
use clap::Parser;
use flow::prelude::Program;
use instrument::{
	config::{InstGranularity, InstrumentConfig},
	CompilerInterrupt,
};
use utils::{fatal_error, map_sys_err};

use crate::cli::Args;

fn step_parse(name: Option<String>) -> Result<Program> {
	let Some(name) = name else {
		fatal_error("no input files");
	};
	let code = fs::read_to_string(&name)
		.unwrap_or_else(|_| fatal_error(format!("cannot read {}", name)));
	Ok(irparser::parse(&code)?)
}

fn step_config(args: &Args) -> InstrumentConfig {
	let Some(granularity) = InstGranularity::from_number(args.inst_gran)
	else {
		fatal_error(format!(
			"instrumentation granularity {} is not in 1..=18",
			args.inst_gran
		));
	};
	// predictive region growth is bounded by the target interval; only
	// the instantaneous clock needs a commit interval by default
	let commit_interval = args
		.commit_interval
		.or_else(|| (args.clock_type == 1).then_some(100));
	InstrumentConfig {
		granularity,
		clock_type: args.clock_type,
		mem_ops_cost: args.mem_ops_cost,
		target_interval: args.target_interval,
		target_cycles: args.target_cycles,
		commit_interval,
		ext_lib_cost: args.ext_lib_cost,
		allowed_deviation: args.allowed_deviation,
		define_clock: args.defclock != 0,
		probe_counters: args.probe_stats,
		config_file: args.config_file.clone(),
		in_cost_file: args.in_cost_file.clone(),
		out_cost_file: args.out_cost_file.clone(),
		..InstrumentConfig::default()
	}
}

fn main() -> Result<()> {
	let args = Args::parse();
	env_logger::Builder::new()
		.parse_filters(&args.log_level)
		.init();

	let mut writer: Box<dyn Write> = if let Some(o) = &args.output {
		Box::new(File::create(o).map_err(map_sys_err)?)
	} else {
		Box::new(io::stdout())
	};

	let mut program = step_parse(args.input.clone())?;
	let config = step_config(&args);
	let mut pass = match CompilerInterrupt::new(config) {
		Ok(pass) => pass,
		Err(e) => fatal_error(e),
	};
	if let Err(e) = pass.apply(&mut program) {
		fatal_error(e);
	}
	write!(writer, "{}", program)?;

	if args.stats {
		eprintln!("{}", serde_json::to_string_pretty(&pass.stats)?);
	}
	Ok(())
}
