// SPDX-License-Identifier: LGPL-2.1-or-later
// See Notices.txt for copyright information

use usc_ir::dominance::PostDominatorTree;
use usc_ir::{parse_function, Function, Marker};
use usc_predication::{
    open_scope_counts, predicate_function, split_merges, ControlDependenceGraph, LinearProgram,
    PredicationError, PredicationOptions, ReturnGuardPolicy,
};

fn predicate(source: &str) -> LinearProgram {
    let options = PredicationOptions {
        verify: true,
        ..PredicationOptions::default()
    };
    predicate_function(parse_function(source).unwrap(), &options).unwrap()
}

fn names(program: &LinearProgram) -> Vec<&str> {
    program
        .order
        .iter()
        .map(|&block| program.function[block].name.as_str())
        .collect()
}

fn markers(program: &LinearProgram) -> Vec<String> {
    program
        .order
        .iter()
        .flat_map(|&block| program.function[block].markers())
        .map(ToString::to_string)
        .collect()
}

fn unwinds(program: &LinearProgram) -> Vec<(&str, u32)> {
    program
        .order
        .iter()
        .flat_map(|&block| {
            program.function[block]
                .markers()
                .filter_map(move |marker| match *marker {
                    Marker::Unwind { depth } => {
                        Some((program.function[block].name.as_str(), depth))
                    }
                    _ => None,
                })
        })
        .collect()
}

fn initial_count(program: &LinearProgram) -> i64 {
    i64::from(program.return_guard.is_some())
}

/// every block of the linear program falls through to the next one
fn assert_linear(program: &LinearProgram) {
    for pair in program.order.windows(2) {
        let block = &program.function[pair[0]];
        assert!(
            block.successors().any(|target| target == pair[1]),
            "{} does not fall through to {}",
            block.name,
            program.function[pair[1]].name
        );
    }
    let last = *program.order.last().unwrap();
    assert_eq!(last, program.function.exit());
    assert_eq!(program.function.entry(), program.order[0]);
}

/// every decision and every alternate ends in a predicated edge around its scope
fn assert_scopes_predicated(program: &LinearProgram) {
    let function = &program.function;
    let find = |name: String| {
        program
            .order
            .iter()
            .copied()
            .find(|&block| function[block].name == name)
    };
    for (position, &block) in program.order.iter().enumerate() {
        let name = &function[block].name;
        let expected = if let Some(enter) = find(format!("{}.enter", name)) {
            let skip = find(format!("{}.alternate", name))
                .or_else(|| find(format!("{}.exit", name)))
                .unwrap();
            Some((enter, skip))
        } else if let Some(decision) = name.strip_suffix(".alternate") {
            let skip = find(format!("{}.exit", decision)).unwrap();
            Some((program.order[position + 1], skip))
        } else {
            None
        };
        if let Some((enter, skip)) = expected {
            assert_eq!(
                function[block].terminator,
                usc_ir::Terminator::Predicated { enter, skip },
                "{} lost its skip edge:\n{}",
                name,
                program
            );
        }
    }
}

const SCENARIO_A: &str = r"
a:
    live %0
    br_cond %0 then join
then:
    store %0
    br join
join:
    ret
";

const SCENARIO_B: &str = r"
a:
    br_cond %0 then else
then:
    %1 = fadd %0 %0
    br join
else:
    %2 = fsub %0 %0
    br join
join:
    ret
";

const SCENARIO_C: &str = r"
entry:
    br header
header:
    br_cond %0 brk rest
brk:
    break
    br rest
rest:
    %2 = fmul %1 %1
    br latch
latch:
    br_cond %2 header done
done:
    ret
";

const SCENARIO_D: &str = r"
a:
    br_cond %0 then b
b:
    br_cond %1 then else
then:
    store %0
    br join
else:
    store %1
    br join
join:
    ret
";

const EXITS: &str = r"
entry:
    br h
h:
    br_cond %0 a b
a:
    br_cond %1 c join_a
c:
    continue
    br join_a
join_a:
    br latch
b:
    br_cond %2 r latch
r:
    return
    br latch
latch:
    br_cond %3 h out
out:
    ret
";

const NESTED_LOOPS: &str = r"
entry:
    br outer
outer:
    br_cond %0 inner outer_latch
inner:
    br_cond %1 brk inner_latch
brk:
    break
    br inner_latch
inner_latch:
    br_cond %2 inner outer_latch
outer_latch:
    br_cond %3 outer done
done:
    ret
";

const INFINITE: &str = r"
entry:
    br h
h:
    loop_merge out
    br_cond %0 leave stay
leave:
    break
    br stay
stay:
    br h
out:
    ret
";

const NESTED_SCOPES: &str = r"
entry:
    br_cond %0 outer_then join
outer_then:
    br_cond %1 inner_then inner_else
inner_then:
    store %1
    br inner_join
inner_else:
    store %2
    br inner_join
inner_join:
    br_cond %2 deep rest
deep:
    store %0
    br rest
rest:
    br join
join:
    br h
h:
    br_cond %3 x latch
x:
    store %3
    br latch
latch:
    br_cond %4 h out
out:
    ret
";

#[test]
fn test_if_without_else() {
    let program = predicate(SCENARIO_A);
    assert_eq!(names(&program), ["a", "a.enter", "then", "a.exit", "join"]);
    assert_eq!(markers(&program), ["enter_scope %0", "exit_scope"]);
    assert_eq!(open_scope_counts(&program.function, &program.order, 0), [1, 0]);
    assert_eq!(program.return_guard, None);
    assert_eq!(program.stats.scopes, 1);
    assert_linear(&program);
}

#[test]
fn test_if_else() {
    let program = predicate(SCENARIO_B);
    assert_eq!(
        names(&program),
        ["a", "a.enter", "then", "a.alternate", "else", "a.exit", "join"]
    );
    assert_eq!(
        markers(&program),
        ["enter_scope %0", "enter_alternate", "exit_scope"]
    );
    assert_linear(&program);
}

#[test]
fn test_break_in_if_inside_loop() {
    let program = predicate(SCENARIO_C);
    assert_eq!(
        names(&program),
        [
            "entry",
            "header.loop_enter",
            "header",
            "header.enter",
            "brk",
            "header.exit",
            "rest",
            "latch",
            "header.loop_exit_guard",
            "header.loop_test",
            "done",
        ]
    );
    assert_eq!(unwinds(&program), [("brk", 3)]);
    let loop_tests = markers(&program)
        .iter()
        .filter(|marker| marker.contains("loop_test"))
        .count();
    assert_eq!(loop_tests, 1);
    assert!(markers(&program).contains(&"%4 = loop_test not %2".to_string()));
    assert_eq!(program.stats.loops, 1);
    assert_linear(&program);
}

#[test]
fn test_short_circuit_merge_is_cloned_once() {
    let program = predicate(SCENARIO_D);
    assert_eq!(program.stats.clones, 1);
    let thens: Vec<_> = names(&program)
        .into_iter()
        .filter(|name| name.starts_with("then"))
        .collect();
    assert_eq!(thens.len(), 2);
    assert_ne!(thens[0], thens[1]);
    assert_linear(&program);
}

#[test]
fn test_continue_and_return_depths() {
    let program = predicate(EXITS);
    assert_eq!(unwinds(&program), [("c", 3), ("r", 5)]);
    let guard = program.return_guard.unwrap();
    assert_eq!(program.function.exit(), guard);
    assert_linear(&program);
    let position = |name: &str| names(&program).iter().position(|&v| v == name).unwrap();
    match program.function[program.order[position("c")]].terminator {
        usc_ir::Terminator::Predicated { skip, .. } => {
            assert_eq!(program.function[skip].name, "h.loop_exit_guard")
        }
        ref terminator => panic!("unexpected terminator: {:?}", terminator),
    }
    match program.function[program.order[position("r")]].terminator {
        usc_ir::Terminator::Predicated { skip, .. } => assert_eq!(skip, guard),
        ref terminator => panic!("unexpected terminator: {:?}", terminator),
    }
}

#[test]
fn test_break_unwinds_innermost_loop_only() {
    let program = predicate(NESTED_LOOPS);
    assert_eq!(unwinds(&program), [("brk", 3)]);
    assert_eq!(program.stats.loops, 2);
    let names = names(&program);
    let brk = names.iter().position(|&name| name == "brk").unwrap();
    match program.function[program.order[brk]].terminator {
        usc_ir::Terminator::Predicated { skip, .. } => {
            let skip = names
                .iter()
                .position(|&name| name == program.function[skip].name)
                .unwrap();
            assert_eq!(names[skip - 1], "inner.loop_test");
        }
        ref terminator => panic!("unexpected terminator: {:?}", terminator),
    }
    assert_linear(&program);
}

#[test]
fn test_infinite_loop() {
    let program = predicate(INFINITE);
    assert!(markers(&program).iter().any(|marker| marker.ends_with("loop_test never")));
    assert_eq!(unwinds(&program), [("leave", 3)]);
    assert_linear(&program);
}

#[test]
fn test_brackets_balance() {
    let options = PredicationOptions {
        return_guard: ReturnGuardPolicy::Always,
        verify: true,
        ..PredicationOptions::default()
    };
    for source in [
        SCENARIO_A,
        SCENARIO_B,
        SCENARIO_C,
        SCENARIO_D,
        EXITS,
        NESTED_LOOPS,
        INFINITE,
        NESTED_SCOPES,
    ] {
        for program in [
            predicate(source),
            predicate_function(parse_function(source).unwrap(), &options).unwrap(),
        ] {
            let counts =
                open_scope_counts(&program.function, &program.order, initial_count(&program));
            assert!(counts.iter().all(|&count| count >= 0), "{}", program);
            assert_eq!(counts.last().copied().unwrap_or(0), 0, "{}", program);
        }
    }
}

#[test]
fn test_every_block_survives() {
    for source in [
        SCENARIO_A,
        SCENARIO_B,
        SCENARIO_C,
        SCENARIO_D,
        EXITS,
        NESTED_LOOPS,
        INFINITE,
        NESTED_SCOPES,
    ] {
        let function = parse_function(source).unwrap();
        let reachable = function.reachable_blocks(function.entry());
        let original: Vec<String> = function
            .iter()
            .filter(|(block, _)| reachable.contains(block.index()))
            .map(|(_, block)| block.name.clone())
            .collect();
        let program = predicate(source);
        let names = names(&program);
        for name in original {
            assert!(names.contains(&name.as_str()), "{} lost:\n{}", name, program);
        }
        let output_reachable = program
            .function
            .reachable_blocks(program.function.entry())
            .count_ones(..);
        assert!(output_reachable >= program.order.len());
        assert!(program.order.len() >= reachable.count_ones(..));
    }
}

#[test]
fn test_nested_scopes_keep_predicated_edges() {
    let program = predicate(NESTED_SCOPES);
    assert_eq!(
        names(&program),
        [
            "entry",
            "entry.enter",
            "outer_then",
            "outer_then.enter",
            "inner_then",
            "outer_then.alternate",
            "inner_else",
            "outer_then.exit",
            "inner_join",
            "inner_join.enter",
            "deep",
            "inner_join.exit",
            "rest",
            "entry.exit",
            "join",
            "h.loop_enter",
            "h",
            "h.enter",
            "x",
            "h.exit",
            "latch",
            "h.loop_exit_guard",
            "h.loop_test",
            "out",
        ]
    );
    assert_scopes_predicated(&program);
    assert_eq!(program.stats.scopes, 4);
    assert_linear(&program);
}

#[test]
fn test_every_scope_keeps_predicated_edges() {
    for source in [
        SCENARIO_A,
        SCENARIO_B,
        SCENARIO_C,
        SCENARIO_D,
        EXITS,
        NESTED_LOOPS,
        INFINITE,
    ] {
        assert_scopes_predicated(&predicate(source));
    }
}

#[test]
fn test_printed_program_reparses() {
    let program = predicate(EXITS);
    let printed = program.to_string();
    assert!(printed.starts_with("# nesting counter %4\nfunction main\n"));
    let reparsed = parse_function(&printed).unwrap();
    assert_eq!(reparsed.block_count(), program.order.len());
    assert_eq!(reparsed[reparsed.exit()].name, "main.return_guard");
    for (block, _) in reparsed.iter() {
        let text = reparsed.display_block(block).to_string();
        assert!(printed.contains(&text), "{} not in:\n{}", text, printed);
    }
}

fn merge_owners(function: &mut Function) -> usize {
    let oracle = PostDominatorTree::compute(function, function.entry(), function.exit());
    let mut cdg =
        ControlDependenceGraph::build(function, &oracle, function.entry(), function.exit())
            .unwrap();
    let first = split_merges(&mut cdg, function);
    assert_eq!(split_merges(&mut cdg, function), 0);
    for decision in cdg.reachable_decisions() {
        assert_eq!(cdg[decision].predecessors.len(), 1);
    }
    first
}

#[test]
fn test_duplication_is_idempotent() {
    assert_eq!(merge_owners(&mut parse_function(SCENARIO_D).unwrap()), 1);
    assert_eq!(merge_owners(&mut parse_function(SCENARIO_B).unwrap()), 0);
}

#[test]
fn test_errors() {
    let irreducible = r"
a:
    br_cond %0 b c
b:
    br c
c:
    br_cond %1 b d
d:
    ret
";
    let error = predicate_function(
        parse_function(irreducible).unwrap(),
        &PredicationOptions::default(),
    )
    .unwrap_err();
    assert!(matches!(error, PredicationError::IrreducibleControlFlow(_)));
    assert!(!error.is_internal());
    let stray_break = "a:\n    break\n    br b\nb:\n    ret\n";
    let error = predicate_function(
        parse_function(stray_break).unwrap(),
        &PredicationOptions::default(),
    )
    .unwrap_err();
    assert!(matches!(error, PredicationError::ExitOutsideLoop(_)));
}

#[test]
fn test_entry_loop() {
    let program = predicate(
        r"
h:
    store %0
    br_cond %0 h out
out:
    ret
",
    );
    assert_eq!(
        names(&program),
        ["h.loop_enter", "h", "h.loop_exit_guard", "h.loop_test", "out"]
    );
    assert!(unwinds(&program).is_empty());
    assert_linear(&program);
}
