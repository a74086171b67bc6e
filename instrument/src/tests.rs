use crate::{
	config::{InstGranularity, InstrumentConfig},
	CompilerInterrupt,
};

fn instrument(
	src: &str,
	tweak: impl FnOnce(&mut InstrumentConfig),
) -> (String, CompilerInterrupt) {
	let mut program = irparser::parse(src).unwrap();
	let mut config = InstrumentConfig::default();
	tweak(&mut config);
	let mut pass = CompilerInterrupt::new(config).unwrap();
	pass.apply(&mut program).unwrap();
	(program.to_string(), pass)
}

fn repeat_adds(n: usize, ty: &str, seed: &str) -> String {
	let mut out = String::new();
	let mut prev = seed.to_string();
	for i in 0..n {
		let name = format!("%v{}{}", seed.trim_start_matches('%'), i);
		out.push_str(&format!(
			"    {} = add {} {}, 1\n",
			name, ty, prev
		));
		prev = name;
	}
	out
}

/// Straight-line function of total cost 10 with T = C = 100: exactly
/// one probe at the end of the block carrying the whole cost.
#[test]
fn straight_line_commits_once() {
	let src = format!(
		"define i32 @f(i32 %x) {{\n  %entry:\n{}    ret i32 %x\n}}\n",
		repeat_adds(9, "i32", "%x")
	);
	let (printed, pass) = instrument(&src, |c| {
		c.clock_type = 1;
		c.target_interval = 100;
		c.commit_interval = Some(100);
	});
	assert_eq!(pass.stats.probes, 1);
	assert!(printed.contains("@LocalLC"));
	assert!(printed.contains("add i64"));
	// the committed amount is the block cost
	assert!(printed.contains(", 10"), "{}", printed);
}

/// Branch arms of cost 80 and 120 under deviation 100 fold into a
/// weighted average at the merge instead of per-arm probes.
#[test]
fn small_spread_amortizes_branch() {
	let src = format!(
		"define void @f(i32 %c) {{
  %entry:
    br i32 %c, label %l, label %r
  %l:
{}    br label %m
  %r:
{}    br label %m
  %m:
    ret void
}}
",
		repeat_adds(79, "i32", "%c"),
		repeat_adds(119, "i32", "%c")
	);
	let (printed, pass) = instrument(&src, |c| {
		c.clock_type = 1;
		c.target_interval = 400;
		c.commit_interval = Some(400);
	});
	assert_eq!(pass.stats.rule2_saves, 1);
	assert_eq!(pass.stats.probes, 1);
	// 1 (branch) + mean 100 + 1 (ret)
	assert!(printed.contains(", 102"), "{}", printed);
}

/// The same shape with arm costs 10 and 1000 exceeds the deviation:
/// each arm carries its own probe.
#[test]
fn large_spread_instruments_each_arm() {
	let src = format!(
		"define void @f(i32 %c) {{
  %entry:
    br i32 %c, label %l, label %r
  %l:
{}    br label %m
  %r:
{}    br label %m
  %m:
    ret void
}}
",
		repeat_adds(9, "i32", "%c"),
		repeat_adds(999, "i32", "%c")
	);
	let (printed, pass) = instrument(&src, |c| {
		c.clock_type = 1;
		c.target_interval = 100;
		c.commit_interval = Some(100);
	});
	assert_eq!(pass.stats.rule2_saves, 0);
	// both arms, plus the merge block's own cost
	assert!(pass.stats.probes >= 2);
	assert!(printed.contains(", 1001"), "{}", printed);
}

/// A direct dominator→postdominator edge of an instrumented branch gets
/// a dummy block carrying the entry cost plus one.
#[test]
fn direct_edge_gets_probe_block() {
	let src = format!(
		"define void @f(i32 %c) {{
  %entry:
    br i32 %c, label %a, label %m
  %a:
{}    br label %m
  %m:
    ret void
}}
",
		repeat_adds(1000, "i32", "%c")
	);
	let (printed, pass) = instrument(&src, |c| {
		c.clock_type = 1;
		c.target_interval = 100;
		c.commit_interval = Some(100);
	});
	assert_eq!(pass.stats.direct_edge_blocks, 1);
	// the dummy block commits entry + 1
	assert!(printed.contains(", 2"), "{}", printed);
}

/// A fence in the middle of a block splits it into two containers and
/// nothing amortizes across; the fence's configured cost lands in the
/// preceding container, committed before the fence call runs.
#[test]
fn fence_isolates_costs() {
	let src = "
declare void @pthread_mutex_lock(ptr)
define void @f(ptr %m) {
  %entry:
    %a = add i32 1, 2
    call void @pthread_mutex_lock(ptr %m)
    %b = add i32 3, 4
    ret void
}
";
	let (printed, pass) = instrument(src, |c| {
		c.clock_type = 1;
		c.target_interval = 10;
		c.commit_interval = Some(10);
	});
	assert_eq!(pass.stats.probes, 2);
	// add (1) + call (1) + lock cost (50)
	assert!(printed.contains(", 52"), "{}", printed);
	let probe_pos = printed.find("load i64, ptr @LocalLC").unwrap();
	let fence_pos = printed.find("call void @pthread_mutex_lock").unwrap();
	assert!(probe_pos < fence_pos);
}

/// A custom fence without a cost entry in the library table is fatal.
#[test]
fn fence_without_cost_is_refused() {
	let src = "
declare void @take_lock(ptr)
define void @f(ptr %m) {
  %entry:
    call void @take_lock(ptr %m)
    ret void
}
";
	let mut program = irparser::parse(src).unwrap();
	let mut config = InstrumentConfig::default();
	config.fences.insert("take_lock".to_string());
	let mut pass = CompilerInterrupt::new(config).unwrap();
	assert!(pass.apply(&mut program).is_err());
}

/// Self-loop with body cost 5 and a symbolic trip count under C = 1000
/// strip-mines with an inner bound of 200 and accounts each chunk with
/// a value probe.
#[test]
fn symbolic_self_loop_strip_mines() {
	let src = "
define i32 @f(i32 %n) {
  %entry:
    br label %loop
  %loop:
    %iv = phi i32 [0, %entry], [%iv.next, %loop]
    %acc = phi i32 [0, %entry], [%acc.next, %loop]
    %acc.next = add i32 %acc, %iv
    %iv.next = add i32 %iv, 1
    %c = icmp slt i32 %iv.next, %n
    br i32 %c, label %loop, label %done
  %done:
    ret i32 %acc.next
}
";
	let (printed, pass) = instrument(src, |c| {
		c.clock_type = 1;
		c.target_interval = 1000;
		c.commit_interval = Some(1000);
	});
	assert_eq!(pass.stats.loops_strip_mined, 1);
	assert_eq!(pass.stats.value_probes, 1);
	// chunk bound: iv + inner * step with inner = 1000 / 5
	assert!(printed.contains(", 200"), "{}", printed);
	// chunk accounting multiplies iterations by the body cost
	assert!(printed.contains("mul i64"), "{}", printed);
}

/// A constant-trip loop that fits the commit interval together with its
/// preheader is accounted whole, with no probe inside the loop.
#[test]
fn small_constant_loop_commits_whole() {
	let src = format!(
		"define i32 @f(i32 %x) {{
  %entry:
{}    br label %loop
  %loop:
    %iv = phi i32 [0, %entry], [%iv.next, %loop]
    %iv.next = add i32 %iv, 1
    %c = icmp slt i32 %iv.next, 10
    br i32 %c, label %loop, label %done
  %done:
    ret i32 %x
}}
",
		repeat_adds(29, "i32", "%x")
	);
	let (printed, pass) = instrument(&src, |c| {
		c.clock_type = 1;
		c.target_interval = 100;
		c.commit_interval = Some(100);
	});
	assert_eq!(pass.stats.loops_strip_mined, 0);
	assert_eq!(pass.stats.loops_per_iteration, 0);
	assert_eq!(pass.stats.probes, 1);
	// 30 (preheader) + 10 iterations of 3 + 1 (ret)
	assert!(printed.contains(", 61"), "{}", printed);
	let _ = printed;
}

/// Duplicate terminator targets look like a collapsed switch: the
/// branch reduction refuses them (the loop rule still applies around).
#[test]
fn duplicate_successors_refuse_branch_rule() {
	let src = "
define void @f(i32 %c, i32 %d) {
  %entry:
    br i32 %c, label %m, label %m
  %m:
    br i32 %d, label %m2, label %x
  %m2:
    br label %m
  %x:
    ret void
}
";
	let (_, pass) = instrument(src, |c| {
		c.clock_type = 1;
	});
	assert_eq!(pass.stats.rule_branch, 0);
	assert_eq!(pass.stats.rule_loop, 1);
}

/// Predictive mode: a simple callee exports its summarized cost to the
/// caller instead of probing itself.
#[test]
fn predictive_summarizes_callee() {
	let src = format!(
		"define i32 @g(i32 %x) {{
  %entry:
{}    ret i32 %x
}}
define i32 @main(i32 %x) {{
  %entry:
    %a = add i32 %x, 1
    %r = call i32 @g(i32 %a)
    ret i32 %r
}}
",
		repeat_adds(4, "i32", "%x")
	);
	let (printed, pass) = instrument(&src, |c| {
		c.clock_type = 0;
		c.target_interval = 100;
		// predictive mode carries no commit interval; the target
		// interval bounds region growth
		c.commit_interval = None;
	});
	assert_eq!(pass.stats.summarized_functions, 1);
	assert_eq!(pass.stats.probes, 1);
	// callee body carries no clock updates
	let g_body = &printed
		[printed.find("@g").unwrap()..printed.find("@main").unwrap()];
	assert!(!g_body.contains("LocalLC"));
	// caller charges add + (call + summary) + ret = 1 + (1 + 5) + 1
	assert!(printed.contains(", 8"), "{}", printed);
}

/// Functions registered through `register_ci` stay untouched.
#[test]
fn registered_handlers_are_not_instrumented() {
	let src = "
declare void @register_ci(ptr)
define void @handler(i64 %ic) {
  %entry:
    %a = add i64 %ic, 1
    ret void
}
define i32 @main() {
  %entry:
    call void @register_ci(ptr @handler)
    ret i32 0
}
";
	let (printed, _) = instrument(src, |c| {
		c.clock_type = 1;
	});
	let h_body = &printed
		[printed.find("@handler").unwrap()..printed.find("@main").unwrap()];
	assert!(!h_body.contains("LocalLC"));
}

/// `--defclock` decides whether this module defines the runtime TLS
/// state or merely declares it.
#[test]
fn defclock_controls_tls_definitions() {
	let src = "define i32 @f(i32 %x) {\n  %entry:\n    %a = add i32 %x, 1\n    ret i32 %a\n}\n";
	let (with_def, _) = instrument(src, |c| {
		c.clock_type = 1;
		c.define_clock = true;
	});
	assert!(with_def.contains("@LocalLC = thread_local global i64 0"));
	let (without, _) = instrument(src, |c| {
		c.clock_type = 1;
		c.define_clock = false;
	});
	assert!(without
		.contains("@LocalLC = external thread_local global i64"));
}

/// Naive placement probes every block terminator.
#[test]
fn naive_mode_probes_every_block() {
	let src = "
define void @f(i32 %c) {
  %entry:
    br i32 %c, label %l, label %m
  %l:
    %a = add i32 %c, 1
    br label %m
  %m:
    ret void
}
";
	let (_, pass) = instrument(src, |c| {
		c.granularity = InstGranularity::NaiveHeuristicTl;
		c.clock_type = 1;
	});
	assert_eq!(pass.stats.probes, 3);
}

/// Cycle-gated commit reads the cycle counter and keeps the last
/// timestamp.
#[test]
fn intermediate_mode_uses_cycle_counter() {
	let src = "define i32 @f(i32 %x) {\n  %entry:\n    %a = add i32 %x, 1\n    ret i32 %a\n}\n";
	let (printed, _) = instrument(src, |c| {
		c.granularity = InstGranularity::OptIntermediate;
	});
	assert!(printed.contains("@llvm.readcyclecounter"));
	assert!(printed.contains("@LastCycleTS"));
	assert!(printed.contains("declare i64 @llvm.readcyclecounter()"));
}

/// The instrumented output still parses: probes are well-formed IR.
#[test]
fn instrumented_output_reparses() {
	let src = "
define i32 @f(i32 %n) {
  %entry:
    br label %loop
  %loop:
    %iv = phi i32 [0, %entry], [%iv.next, %loop]
    %iv.next = add i32 %iv, 1
    %c = icmp slt i32 %iv.next, %n
    br i32 %c, label %loop, label %done
  %done:
    ret i32 %iv.next
}
";
	let (printed, _) = instrument(src, |c| {
		c.clock_type = 1;
	});
	let reparsed = irparser::parse(&printed).unwrap();
	assert_eq!(reparsed.funcs.len(), 1);
}
