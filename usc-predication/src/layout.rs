// SPDX-License-Identifier: LGPL-2.1-or-later
// See Notices.txt for copyright information

//! if-conversion of a control dependence graph into a straight chain of blocks

use crate::cdg::{ControlDependenceGraph, DecisionId, RegionId};
use crate::context::PredicationContext;
use crate::duplicate::split_merges;
use crate::errors::{IrreducibleControlFlow, PredicationResult, UnresolvedMerge};
use log::{debug, trace};
use usc_ir::dominance::PostDominatorTree;
use fixedbitset::FixedBitSet;
use usc_ir::{BasicBlock, BlockId, Function, Marker};

struct ScopeLayout<'a, 'b> {
    cdg: &'a ControlDependenceGraph,
    function: &'a mut Function,
    context: &'a mut PredicationContext<'b>,
}

impl ScopeLayout<'_, '_> {
    fn marker_block(&mut self, decision: DecisionId, suffix: &str, marker: Marker) -> BlockId {
        let name = format!("{}.{}", self.function[self.cdg[decision].block].name, suffix);
        self.function.add_block(BasicBlock::with_marker(name, marker))
    }
    fn region(&mut self, region: RegionId) -> PredicationResult<Vec<BlockId>> {
        let cdg = self.cdg;
        let mut retval: Vec<BlockId> = Vec::new();
        for &member in &cdg[region].members {
            if cdg[member].predecessors != [region] {
                return Err(UnresolvedMerge {
                    block: self.function[cdg[member].block].name.clone(),
                }
                .into());
            }
            let chain = self.decision(member)?;
            if let (Some(&last), Some(&first)) = (retval.last(), chain.first()) {
                self.function.set_unconditional_successor(last, first);
            }
            retval.extend(chain);
        }
        Ok(retval)
    }
    fn decision(&mut self, decision: DecisionId) -> PredicationResult<Vec<BlockId>> {
        let cdg = self.cdg;
        let block = cdg[decision].block;
        let condition = match cdg[decision].condition {
            Some(condition) if !cdg[decision].children.is_empty() => condition,
            _ => return Ok(vec![block]),
        };
        self.context.stats.scopes += 1;
        let mut retval = vec![block];
        match cdg[decision].children[..] {
            [(successor_index, region)] => {
                let body = self.region(region)?;
                let enter = self.marker_block(
                    decision,
                    "enter",
                    Marker::EnterScope {
                        condition,
                        invert: successor_index == 1,
                    },
                );
                let exit = self.marker_block(decision, "exit", Marker::ExitScope);
                trace!(
                    "one-armed scope on {} (successor {})",
                    self.function[block].name,
                    successor_index
                );
                self.function.set_predicated_successors(block, enter, exit);
                self.chain(enter, &body, exit);
                retval.push(enter);
                retval.extend(body);
                retval.push(exit);
            }
            [(_, then_region), (_, else_region), ..] => {
                let then_body = self.region(then_region)?;
                let else_body = self.region(else_region)?;
                let enter = self.marker_block(
                    decision,
                    "enter",
                    Marker::EnterScope {
                        condition,
                        invert: false,
                    },
                );
                let alternate = self.marker_block(decision, "alternate", Marker::EnterAlternate);
                let exit = self.marker_block(decision, "exit", Marker::ExitScope);
                trace!("two-armed scope on {}", self.function[block].name);
                self.function
                    .set_predicated_successors(block, enter, alternate);
                self.chain(enter, &then_body, alternate);
                let else_first = else_body.first().copied().unwrap_or(exit);
                self.function
                    .set_predicated_successors(alternate, else_first, exit);
                if let Some(&else_last) = else_body.last() {
                    self.function.set_unconditional_successor(else_last, exit);
                }
                retval.push(enter);
                retval.extend(then_body);
                retval.push(alternate);
                retval.extend(else_body);
                retval.push(exit);
            }
            [] => {}
        }
        Ok(retval)
    }
    /// link `head` to the start of `body` and the end of `body` to `tail`
    ///
    /// `body` is already linked internally; its decisions keep their predicated edges.
    fn chain(&mut self, head: BlockId, body: &[BlockId], tail: BlockId) {
        link_around(self.function, head, body, tail);
    }
}

/// link `head` to the first block of the laid-out `body` and its last block to `tail`
pub(crate) fn link_around(
    function: &mut Function,
    head: BlockId,
    body: &[BlockId],
    tail: BlockId,
) {
    match (body.first(), body.last()) {
        (Some(&first), Some(&last)) => {
            function.set_unconditional_successor(head, first);
            function.set_unconditional_successor(last, tail);
        }
        _ => function.set_unconditional_successor(head, tail),
    }
}

/// lay out a control dependence graph whose merges were already split
///
/// Returns the blocks in execution order. Every block but the last ends in an
/// edge to its neighbor or, for decisions and alternates, a predicated edge.
pub(crate) fn lay_out(
    cdg: &ControlDependenceGraph,
    function: &mut Function,
    context: &mut PredicationContext,
) -> PredicationResult<Vec<BlockId>> {
    ScopeLayout {
        cdg,
        function,
        context,
    }
    .region(cdg.root())
}

/// reject cycles among the blocks reachable from `entry`, not following edges out of `exit`
pub(crate) fn check_acyclic(
    function: &Function,
    entry: BlockId,
    exit: BlockId,
) -> PredicationResult<()> {
    let mut finished = FixedBitSet::with_capacity(function.block_count());
    let mut on_stack = FixedBitSet::with_capacity(function.block_count());
    let mut stack = vec![(entry, function[entry].successors().collect::<Vec<_>>())];
    on_stack.insert(entry.index());
    while let Some((block, successors)) = stack.last_mut() {
        let block = *block;
        match successors.pop() {
            Some(successor) if block != exit => {
                if on_stack.contains(successor.index()) {
                    return Err(IrreducibleControlFlow {
                        block: function[successor].name.clone(),
                    }
                    .into());
                }
                if !finished.contains(successor.index()) {
                    on_stack.insert(successor.index());
                    stack.push((successor, function[successor].successors().collect()));
                }
            }
            _ => {
                on_stack.set(block.index(), false);
                finished.insert(block.index());
                stack.pop();
            }
        }
    }
    Ok(())
}

/// if-convert the acyclic sub-graph between `entry` and `exit` into a chain of blocks
pub(crate) fn predicate_sub_graph(
    function: &mut Function,
    context: &mut PredicationContext,
    entry: BlockId,
    exit: BlockId,
) -> PredicationResult<Vec<BlockId>> {
    check_acyclic(function, entry, exit)?;
    let oracle = PostDominatorTree::compute(function, entry, exit);
    let mut cdg = ControlDependenceGraph::build(function, &oracle, entry, exit)?;
    trace!("control dependence graph:\n{}", cdg.display(function));
    let clones = split_merges(&mut cdg, function);
    context.stats.clones += clones;
    debug!(
        "laying out {}..{}: {} clones",
        function[entry].name, function[exit].name, clones
    );
    lay_out(&cdg, function, context)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cdg::tests::{block, build};
    use crate::options::PredicationOptions;
    use usc_ir::{parse_function, Instruction, Terminator};

    fn names(function: &Function, order: &[BlockId]) -> Vec<String> {
        order
            .iter()
            .map(|&block| function[block].name.clone())
            .collect()
    }

    fn run(source: &str) -> (Function, Vec<BlockId>) {
        let mut function = parse_function(source).unwrap();
        let options = PredicationOptions::default();
        let mut context = PredicationContext::new(&options, &mut function);
        let (entry, exit) = (function.entry(), function.exit());
        let order = predicate_sub_graph(&mut function, &mut context, entry, exit).unwrap();
        (function, order)
    }

    #[test]
    fn test_one_armed() {
        let (function, order) = run(r"
a:
    br_cond %0 then join
then:
    store %0
    br join
join:
    ret
");
        assert_eq!(
            names(&function, &order),
            ["a", "a.enter", "then", "a.exit", "join"]
        );
        let a = block(&function, "a");
        assert_eq!(
            function[a].terminator,
            Terminator::Predicated {
                enter: order[1],
                skip: order[3],
            }
        );
        assert_eq!(
            function[order[1]].instructions,
            [Instruction::Marker(Marker::EnterScope {
                condition: usc_ir::Value::new(0),
                invert: false,
            })]
        );
        assert_eq!(function[order[4]].terminator, Terminator::Return);
    }

    #[test]
    fn test_one_armed_on_false_edge_inverts() {
        let (function, order) = run(r"
a:
    br_cond %0 join else
else:
    br join
join:
    ret
");
        assert_eq!(
            function[order[1]].markers().next(),
            Some(&Marker::EnterScope {
                condition: usc_ir::Value::new(0),
                invert: true,
            })
        );
    }

    #[test]
    fn test_two_armed() {
        let (function, order) = run(r"
a:
    br_cond %0 then else
then:
    br join
else:
    br join
join:
    ret
");
        assert_eq!(
            names(&function, &order),
            ["a", "a.enter", "then", "a.alternate", "else", "a.exit", "join"]
        );
        assert_eq!(
            function[order[3]].terminator,
            Terminator::Predicated {
                enter: order[4],
                skip: order[5],
            }
        );
        assert_eq!(
            function[order[2]].terminator,
            Terminator::Branch { target: order[3] }
        );
    }

    #[test]
    fn test_nested_decision_keeps_predicated_edge() {
        let (function, order) = run(r"
a:
    br_cond %0 b join
b:
    br_cond %1 c d
c:
    br d
d:
    br join
join:
    ret
");
        assert_eq!(
            names(&function, &order),
            ["a", "a.enter", "b", "b.enter", "c", "b.exit", "d", "a.exit", "join"]
        );
        assert_eq!(
            function[order[0]].terminator,
            Terminator::Predicated {
                enter: order[1],
                skip: order[7],
            }
        );
        assert_eq!(
            function[order[2]].terminator,
            Terminator::Predicated {
                enter: order[3],
                skip: order[5],
            }
        );
        assert_eq!(
            function[order[1]].terminator,
            Terminator::Branch { target: order[2] }
        );
        assert_eq!(
            function[order[6]].terminator,
            Terminator::Branch { target: order[7] }
        );
    }

    #[test]
    fn test_unresolved_merge_is_reported() {
        let mut function = parse_function(
            r"
a:
    br_cond %0 then b
b:
    br_cond %1 then join
then:
    br join
join:
    ret
",
        )
        .unwrap();
        let cdg = build(&function);
        let options = PredicationOptions::default();
        let mut context = PredicationContext::new(&options, &mut function);
        match lay_out(&cdg, &mut function, &mut context) {
            Err(crate::PredicationError::UnresolvedMerge(error)) => assert_eq!(error.block, "then"),
            result => panic!("unexpected result: {:?}", result),
        }
    }

    #[test]
    fn test_cycle_is_rejected() {
        let function = parse_function(
            r"
a:
    br_cond %0 b c
b:
    br c
c:
    br_cond %1 b d
d:
    ret
",
        )
        .unwrap();
        let error = check_acyclic(&function, function.entry(), function.exit()).unwrap_err();
        assert!(matches!(
            error,
            crate::PredicationError::IrreducibleControlFlow(_)
        ));
    }
}
