// SPDX-License-Identifier: LGPL-2.1-or-later
// See Notices.txt for copyright information

//! natural loop extraction and wrapping

use crate::context::PredicationContext;
use crate::errors::{MalformedLoop, PredicationResult, UnreachableLoop};
use crate::layout::{link_around, predicate_sub_graph};
use fixedbitset::FixedBitSet;
use hashbrown::{HashMap, HashSet};
use log::debug;
use usc_ir::dominance::DominatorTree;
use usc_ir::{BasicBlock, BlockId, Function, LoopCondition, Marker, NestedProgram, Terminator};

/// a natural loop with a single back edge
#[derive(Clone, Debug)]
pub struct LoopDescriptor {
    pub header: BlockId,
    /// source of the back edge; decides whether the loop continues
    pub latch: BlockId,
    /// the block reached when the loop finishes
    pub merge: BlockId,
    pub condition: LoopCondition,
    /// lanes leave when `condition` is false instead of true
    pub invert: bool,
    body: FixedBitSet,
}

impl LoopDescriptor {
    pub fn is_infinite(&self) -> bool {
        self.condition == LoopCondition::Never
    }
    pub fn contains(&self, block: BlockId) -> bool {
        self.body.contains(block.index())
    }
    pub fn body_len(&self) -> usize {
        self.body.count_ones(..)
    }
}

fn malformed(function: &Function, header: BlockId, reason: impl Into<String>) -> MalformedLoop {
    MalformedLoop {
        header: function[header].name.clone(),
        reason: reason.into(),
    }
}

/// read the loop continuation off the latch's terminator
fn continuation(
    function: &Function,
    header: BlockId,
    latch: BlockId,
) -> Result<(LoopCondition, bool, BlockId), MalformedLoop> {
    let infinite = || match function[header].loop_merge {
        Some(merge) => Ok((LoopCondition::Never, false, merge)),
        None => Err(malformed(
            function,
            header,
            "loop never exits through its latch and has no loop_merge annotation",
        )),
    };
    let retval = match function[latch].terminator {
        Terminator::Branch { .. } => infinite()?,
        Terminator::BranchConditional {
            condition,
            true_target,
            false_target,
        } => match (true_target == header, false_target == header) {
            (true, true) => infinite()?,
            (true, false) => (LoopCondition::Value(condition), true, false_target),
            (false, true) => (LoopCondition::Value(condition), false, true_target),
            (false, false) => {
                return Err(malformed(function, header, "latch does not branch to the header"))
            }
        },
        _ => {
            return Err(malformed(
                function,
                header,
                format!(
                    "latch `{}` must end in `br` or `br_cond`",
                    function[latch].name
                ),
            ))
        }
    };
    if let Some(merge) = function[header].loop_merge {
        if merge != retval.2 {
            return Err(malformed(
                function,
                header,
                format!(
                    "loop_merge `{}` does not match the latch's exit `{}`",
                    function[merge].name, function[retval.2].name
                ),
            ));
        }
    }
    Ok(retval)
}

/// find every natural loop of `function`, innermost first
pub fn extract_loops(function: &Function) -> PredicationResult<Vec<LoopDescriptor>> {
    let dominators = DominatorTree::compute(function, function.entry());
    let predecessors = function.predecessors();
    let mut back_edges = Vec::new();
    let mut latches = HashMap::new();
    for (block, data) in function.iter() {
        if !dominators.contains(block) {
            continue;
        }
        let mut targets: Vec<_> = data.successors().collect();
        targets.dedup();
        for header in targets {
            if !dominators.dominates(header, block) {
                continue;
            }
            if let Some(&other_header) = latches.get(&block) {
                return Err(malformed(
                    function,
                    header,
                    format!(
                        "latch `{}` also closes the loop at `{}`",
                        function[block].name, function[other_header].name
                    ),
                )
                .into());
            }
            latches.insert(block, header);
            back_edges.push((header, block));
        }
    }
    let mut headers = HashSet::new();
    let mut retval = Vec::with_capacity(back_edges.len());
    for (header, latch) in back_edges {
        if !headers.insert(header) {
            return Err(malformed(function, header, "more than one back edge").into());
        }
        let (condition, invert, merge) = continuation(function, header, latch)?;
        let mut body = FixedBitSet::with_capacity(function.block_count());
        body.insert(header.index());
        let mut worklist = vec![latch];
        while let Some(block) = worklist.pop() {
            if !body.put(block.index()) {
                worklist.extend_from_slice(predecessors.get(block));
            }
        }
        if body.contains(merge.index()) {
            return Err(malformed(
                function,
                header,
                format!("exit `{}` is inside the loop", function[merge].name),
            )
            .into());
        }
        for block in body.ones().map(BlockId::new) {
            if block == latch {
                continue;
            }
            if let Some(target) = function[block]
                .successors()
                .find(|target| !body.contains(target.index()))
            {
                return Err(malformed(
                    function,
                    header,
                    format!(
                        "`{}` leaves the loop through `{}` instead of the latch",
                        function[block].name, function[target].name
                    ),
                )
                .into());
            }
        }
        retval.push(LoopDescriptor {
            header,
            latch,
            merge,
            condition,
            invert,
            body,
        });
    }
    for (index, a) in retval.iter().enumerate() {
        for b in &retval[index + 1..] {
            let overlaps = a.body.ones().any(|block| b.body.contains(block));
            let nested = a.body.ones().all(|block| b.body.contains(block))
                || b.body.ones().all(|block| a.body.contains(block));
            if overlaps && !nested {
                return Err(malformed(
                    function,
                    a.header,
                    format!("overlaps the loop at `{}`", function[b.header].name),
                )
                .into());
            }
        }
    }
    retval.sort_by_key(LoopDescriptor::body_len);
    Ok(retval)
}

/// if-convert the loop's body and collapse the loop into one block owning the wrapped program
///
/// Returns the collapsed block, which ends in an edge to the loop's merge block.
pub(crate) fn wrap_loop(
    function: &mut Function,
    context: &mut PredicationContext,
    descriptor: &LoopDescriptor,
) -> PredicationResult<BlockId> {
    let LoopDescriptor { header, latch, .. } = *descriptor;
    if !function
        .reachable_blocks(function.entry())
        .contains(header.index())
    {
        return Err(UnreachableLoop {
            header: function[header].name.clone(),
        }
        .into());
    }
    // earlier collapses may have renamed the merge block
    let (condition, invert, merge) = continuation(function, header, latch)?;
    let name = function[header].name.clone();
    debug!("wrapping loop {}", name);
    function[latch].terminator = Terminator::Open;
    let body = predicate_sub_graph(function, context, header, latch)?;
    let mut collapsed = BasicBlock::new(format!("{}.loop", name));
    collapsed.live_in = function[header].live_in.clone();
    collapsed.terminator = Terminator::Branch { target: merge };
    let collapsed = function.add_block(collapsed);
    function.redirect_predecessors(header, collapsed);
    if function.entry() == header {
        function.set_entry(collapsed);
    }
    let annotated: Vec<_> = function
        .iter()
        .filter(|(_, block)| block.loop_merge == Some(header))
        .map(|(block, _)| block)
        .collect();
    for block in annotated {
        function[block].loop_merge = Some(collapsed);
    }
    function[header].loop_merge = None;
    let enter = function.add_block(BasicBlock::with_marker(
        format!("{}.loop_enter", name),
        Marker::LoopEnter,
    ));
    let guard = function.add_block(BasicBlock::with_marker(
        format!("{}.loop_exit_guard", name),
        Marker::LoopExitGuard,
    ));
    let predicate = function.new_value();
    let test = function.add_block(BasicBlock::with_marker(
        format!("{}.loop_test", name),
        Marker::LoopTest {
            result: predicate,
            condition,
            invert,
        },
    ));
    link_around(function, enter, &body, guard);
    function.set_unconditional_successor(guard, test);
    let mut blocks = Vec::with_capacity(body.len() + 3);
    blocks.push(enter);
    blocks.extend(body);
    blocks.push(guard);
    blocks.push(test);
    function[test].terminator = Terminator::LoopBranch {
        predicate,
        body: header,
        exit: merge,
    };
    function[collapsed].nested = Some(NestedProgram::new(blocks));
    context.stats.loops += 1;
    Ok(collapsed)
}
