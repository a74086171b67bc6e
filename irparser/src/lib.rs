pub mod parser;

pub use parser::parse;

#[cfg(test)]
mod tests {
	use super::parse;

	const MODULE: &str = r#"
@counter = thread_local global i64 0
declare i32 @getchar()
define i32 @sum(i32 %n) {
  %entry:
    br label %head
  %head:
    %i = phi i32 [0, %entry], [%i.next, %head]
    %acc = phi i32 [0, %entry], [%acc.next, %head]
    %acc.next = add i32 %acc, %i
    %i.next = add i32 %i, 1
    %c = icmp slt i32 %i.next, %n
    br i32 %c, label %head, label %done
  %done:
    ret i32 %acc.next
}
"#;

	#[test]
	fn parse_builds_cfg_edges() {
		let program = parse(MODULE).unwrap();
		assert_eq!(program.global_vars.len(), 1);
		assert_eq!(program.decls.len(), 1);
		let func = &program.funcs[0];
		assert_eq!(func.name, "sum");
		assert_eq!(func.cfg.size(), 3);
		let entry = func.cfg.get_entry();
		assert_eq!(entry.borrow().succ.len(), 1);
		let head = entry.borrow().get_succ();
		// self-loop plus exit edge
		assert_eq!(head.borrow().succ.len(), 2);
		assert_eq!(head.borrow().prev.len(), 2);
		assert_eq!(head.borrow().phi_instrs.len(), 2);
	}

	#[test]
	fn print_parse_print_is_stable() {
		let program = parse(MODULE).unwrap();
		let printed = program.to_string();
		let reparsed = parse(&printed).unwrap();
		assert_eq!(printed, reparsed.to_string());
	}

	#[test]
	fn rejects_unknown_branch_target() {
		let src = "define void @f() { %a: br label %nowhere }";
		assert!(parse(src).is_err());
	}
}
