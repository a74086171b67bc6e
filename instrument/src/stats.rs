use serde_derive::Serialize;

/// Counters for the statistics dump (`--stats`).
#[derive(Default, Serialize)]
pub struct Stats {
	pub functions: u32,
	pub summarized_functions: u32,
	pub probes: u32,
	pub value_probes: u32,
	pub rule_path: u32,
	pub rule_branch: u32,
	pub rule_loop: u32,
	pub rule_complex: u32,
	pub rule_inverted_v: u32,
	pub rule_v: u32,
	pub rule_unknown: u32,
	/// Branches amortized behind a weighted mean instead of per-arm
	/// probes.
	pub rule2_saves: u32,
	/// Complex regions amortized behind a path-averaged mean.
	pub rule7_saves: u32,
	pub loops_strip_mined: u32,
	pub loops_per_iteration: u32,
	pub direct_edge_blocks: u32,
	pub amortized_units: u32,
}
