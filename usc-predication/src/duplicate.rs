// SPDX-License-Identifier: LGPL-2.1-or-later
// See Notices.txt for copyright information

//! block duplication: give every merge point a single owning scope

use crate::cdg::{ControlDependenceGraph, Decision, DecisionId, RegionId};
use hashbrown::{HashMap, HashSet};
use log::trace;
use usc_ir::{BlockId, Function, NestedProgram};

/// copy `block` and, recursively, the inner loop it stands in for
///
/// Edges between blocks of the nested program are re-pointed at the copies;
/// every other edge keeps its target.
pub fn clone_block_deep(function: &mut Function, block: BlockId) -> BlockId {
    let retval = function.clone_block(block);
    if let Some(nested) = function[retval].nested.clone() {
        let mut map = HashMap::new();
        for &nested_block in &nested.blocks {
            let copy = clone_block_deep(function, nested_block);
            map.insert(nested_block, copy);
        }
        for &copy in map.values() {
            function[copy]
                .terminator
                .map_targets(|target| map.get(&target).copied().unwrap_or(target));
        }
        function[retval].nested = Some(NestedProgram::new(
            nested.blocks.iter().map(|block| map[block]).collect(),
        ));
    }
    retval
}

/// clone `decision` for the region `owner`; child regions are copied with shared members
fn clone_decision(
    cdg: &mut ControlDependenceGraph,
    function: &mut Function,
    decision: DecisionId,
    owner: RegionId,
) -> DecisionId {
    let original = &cdg[decision];
    let block = clone_block_deep(function, original.block);
    let condition = original.condition;
    let children: Vec<_> = original
        .children
        .iter()
        .map(|&(successor_index, region)| (successor_index, cdg[region].members.clone()))
        .collect();
    let children = children
        .into_iter()
        .map(|(successor_index, members)| (successor_index, cdg.add_cloned_region(members)))
        .collect();
    trace!(
        "cloned {} into {}",
        function[cdg[decision].block].name,
        function[block].name
    );
    cdg.add_decision(Decision {
        block,
        condition,
        children,
        predecessors: vec![owner],
    })
}

/// clone every decision owned by more than one region until each has exactly one owner
///
/// The last owner to be visited keeps the original block. Returns the number of clones made.
pub fn split_merges(cdg: &mut ControlDependenceGraph, function: &mut Function) -> usize {
    let mut clones = 0;
    let mut visited = HashSet::new();
    let mut worklist = vec![cdg.root()];
    while let Some(region) = worklist.pop() {
        if !visited.insert(region) {
            continue;
        }
        for position in 0..cdg[region].members.len() {
            let mut member = cdg[region].members[position];
            if cdg[member].predecessors.len() > 1 {
                cdg[member].predecessors.retain(|&owner| owner != region);
                member = clone_decision(cdg, function, member, region);
                cdg[region].members[position] = member;
                clones += 1;
            }
            worklist.extend(cdg[member].children.iter().map(|&(_, child)| child));
        }
    }
    clones
}
