// SPDX-License-Identifier: LGPL-2.1-or-later
// See Notices.txt for copyright information

//! control dependence graph
//!
//! Every block of the analyzed sub-graph gets a [`Decision`] node. The
//! [`Region`] node for branch outcome `(B, i)` lists, in post-dominator
//! order, the blocks that run exactly when `B` takes successor `i`. The
//! entry block's post-dominator chain forms the root region.

use crate::errors::{OracleInconsistency, PredicationResult};
use hashbrown::{HashMap, HashSet};
use std::fmt;
use std::ops::{Index, IndexMut};
use usc_ir::dominance::PostDominance;
use usc_ir::{BlockId, Function, Terminator, Value};

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct DecisionId(usize);

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct RegionId(usize);

#[derive(Clone, Debug)]
pub struct Decision {
    pub block: BlockId,
    /// branch condition; `None` for straight-line blocks
    pub condition: Option<Value>,
    /// control-dependent regions keyed by successor index, sorted
    pub children: Vec<(usize, RegionId)>,
    /// regions listing this node as a member
    pub predecessors: Vec<RegionId>,
}

#[derive(Clone, Debug, Default)]
pub struct Region {
    pub members: Vec<DecisionId>,
}

#[derive(Clone, Debug)]
pub struct ControlDependenceGraph {
    decisions: Vec<Decision>,
    regions: Vec<Region>,
    root: RegionId,
    block_map: HashMap<BlockId, DecisionId>,
}

impl Index<DecisionId> for ControlDependenceGraph {
    type Output = Decision;
    fn index(&self, index: DecisionId) -> &Decision {
        &self.decisions[index.0]
    }
}

impl IndexMut<DecisionId> for ControlDependenceGraph {
    fn index_mut(&mut self, index: DecisionId) -> &mut Decision {
        &mut self.decisions[index.0]
    }
}

impl Index<RegionId> for ControlDependenceGraph {
    type Output = Region;
    fn index(&self, index: RegionId) -> &Region {
        &self.regions[index.0]
    }
}

impl IndexMut<RegionId> for ControlDependenceGraph {
    fn index_mut(&mut self, index: RegionId) -> &mut Region {
        &mut self.regions[index.0]
    }
}

fn chain_error(function: &Function, block: BlockId, reason: &'static str) -> OracleInconsistency {
    OracleInconsistency {
        block: function[block].name.clone(),
        reason,
    }
}

impl ControlDependenceGraph {
    /// build the graph for the blocks reachable from `entry`, stopping at `exit`
    pub fn build(
        function: &Function,
        oracle: &impl PostDominance,
        entry: BlockId,
        exit: BlockId,
    ) -> PredicationResult<Self> {
        let mut retval = ControlDependenceGraph {
            decisions: Vec::new(),
            regions: Vec::new(),
            root: RegionId(0),
            block_map: HashMap::new(),
        };
        let step_limit = function.block_count() + 1;
        let root = retval.add_region();
        retval.root = root;
        let mut block = entry;
        for step in 0.. {
            if step > step_limit {
                return Err(chain_error(function, entry, "post-dominator chain has a cycle").into());
            }
            retval.add_member(root, block);
            if block == exit {
                break;
            }
            block = oracle
                .immediate_post_dominator(block)
                .ok_or_else(|| chain_error(function, block, "block does not reach the exit"))?;
        }
        let mut visited_edges = HashSet::new();
        let mut worklist = vec![entry];
        while let Some(block) = worklist.pop() {
            if block == exit {
                continue;
            }
            if !oracle.contains(block) {
                return Err(chain_error(function, block, "block does not reach the exit").into());
            }
            let is_decision = function[block].is_decision();
            let condition = match function[block].terminator {
                Terminator::BranchConditional { condition, .. } if is_decision => Some(condition),
                _ => None,
            };
            let decision = retval.decision_for(block);
            retval[decision].condition = condition;
            for (successor_index, successor) in function[block].successors().enumerate() {
                if !visited_edges.insert((block, successor_index)) {
                    continue;
                }
                worklist.push(successor);
                if !is_decision || oracle.post_dominates(successor, block) {
                    continue;
                }
                let region = retval.add_region();
                retval[decision].children.push((successor_index, region));
                let mut member = successor;
                for step in 0.. {
                    if step > step_limit {
                        return Err(chain_error(
                            function,
                            successor,
                            "post-dominator chain has a cycle",
                        )
                        .into());
                    }
                    if oracle.post_dominates(member, block) {
                        break;
                    }
                    retval.add_member(region, member);
                    member = oracle.immediate_post_dominator(member).ok_or_else(|| {
                        chain_error(function, member, "post-dominator chain ends before the merge")
                    })?;
                }
            }
        }
        Ok(retval)
    }
    fn add_region(&mut self) -> RegionId {
        let retval = RegionId(self.regions.len());
        self.regions.push(Region::default());
        retval
    }
    fn decision_for(&mut self, block: BlockId) -> DecisionId {
        let decisions = &mut self.decisions;
        *self.block_map.entry(block).or_insert_with(|| {
            let retval = DecisionId(decisions.len());
            decisions.push(Decision {
                block,
                condition: None,
                children: Vec::new(),
                predecessors: Vec::new(),
            });
            retval
        })
    }
    fn add_member(&mut self, region: RegionId, block: BlockId) {
        let decision = self.decision_for(block);
        self[region].members.push(decision);
        if !self[decision].predecessors.contains(&region) {
            self[decision].predecessors.push(region);
        }
    }
    pub(crate) fn add_decision(&mut self, decision: Decision) -> DecisionId {
        let retval = DecisionId(self.decisions.len());
        self.decisions.push(decision);
        retval
    }
    pub(crate) fn add_cloned_region(&mut self, members: Vec<DecisionId>) -> RegionId {
        let retval = self.add_region();
        for &member in &members {
            self[member].predecessors.push(retval);
        }
        self[retval].members = members;
        retval
    }
    /// the region holding the entry block's post-dominator chain
    pub fn root(&self) -> RegionId {
        self.root
    }
    /// the node built for `block`, if `block` was reached
    pub fn decision(&self, block: BlockId) -> Option<DecisionId> {
        self.block_map.get(&block).copied()
    }
    pub fn decisions(&self) -> impl Iterator<Item = (DecisionId, &Decision)> {
        self.decisions
            .iter()
            .enumerate()
            .map(|(index, decision)| (DecisionId(index), decision))
    }
    /// decisions reachable from the root region, each listed once
    pub fn reachable_decisions(&self) -> Vec<DecisionId> {
        let mut retval = Vec::new();
        let mut seen = HashSet::new();
        let mut worklist = vec![self.root];
        while let Some(region) = worklist.pop() {
            for &member in &self[region].members {
                if seen.insert(member) {
                    retval.push(member);
                    worklist.extend(self[member].children.iter().map(|&(_, child)| child));
                }
            }
        }
        retval
    }
    pub fn display<'a>(&'a self, function: &'a Function) -> impl fmt::Display + 'a {
        struct DisplayCDG<'a> {
            cdg: &'a ControlDependenceGraph,
            function: &'a Function,
        }
        impl DisplayCDG<'_> {
            fn fmt_region(
                &self,
                f: &mut fmt::Formatter,
                region: RegionId,
                indent: Indent,
                seen: &mut HashSet<RegionId>,
            ) -> fmt::Result {
                if !seen.insert(region) {
                    return writeln!(f, "{}region r{} (repeated)", indent, region.0);
                }
                writeln!(f, "{}region r{}", indent, region.0)?;
                for &member in &self.cdg[region].members {
                    let decision = &self.cdg[member];
                    write!(
                        f,
                        "{}{}",
                        indent.make_more(),
                        self.function[decision.block].name
                    )?;
                    if let Some(condition) = decision.condition {
                        write!(f, " ({})", condition)?;
                    }
                    if decision.predecessors.len() > 1 {
                        write!(f, " [{} owners]", decision.predecessors.len())?;
                    }
                    writeln!(f)?;
                    for &(successor_index, child) in &decision.children {
                        writeln!(f, "{}{}:", indent.make_more().make_more(), successor_index)?;
                        self.fmt_region(f, child, indent.make_more().make_more().make_more(), seen)?;
                    }
                }
                Ok(())
            }
        }
        impl fmt::Display for DisplayCDG<'_> {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                self.fmt_region(f, self.cdg.root, Indent::default(), &mut HashSet::new())
            }
        }
        DisplayCDG {
            cdg: self,
            function,
        }
    }
}

#[derive(Copy, Clone, Debug, Default)]
struct Indent(usize);

impl Indent {
    fn make_more(self) -> Self {
        Indent(self.0 + 1)
    }
}

impl fmt::Display for Indent {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for _ in 0..self.0 {
            write!(f, "    ")?;
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use usc_ir::dominance::PostDominatorTree;
    use usc_ir::parse_function;

    pub(crate) fn block(function: &Function, name: &str) -> BlockId {
        function
            .iter()
            .find(|(_, block)| block.name == name)
            .map(|(id, _)| id)
            .unwrap()
    }

    pub(crate) fn build(function: &Function) -> ControlDependenceGraph {
        let oracle = PostDominatorTree::compute(function, function.entry(), function.exit());
        ControlDependenceGraph::build(function, &oracle, function.entry(), function.exit())
            .unwrap()
    }

    fn member_names(
        cdg: &ControlDependenceGraph,
        function: &Function,
        region: RegionId,
    ) -> Vec<String> {
        cdg[region]
            .members
            .iter()
            .map(|&member| function[cdg[member].block].name.clone())
            .collect()
    }

    #[test]
    fn test_if_then() {
        let function = parse_function(
            r"
a:
    br_cond %0 then join
then:
    store %0
    br join
join:
    ret
",
        )
        .unwrap();
        let cdg = build(&function);
        assert_eq!(member_names(&cdg, &function, cdg.root()), ["a", "join"]);
        let a = cdg.decision(block(&function, "a")).unwrap();
        assert_eq!(cdg[a].condition, Some(Value::new(0)));
        assert_eq!(cdg[a].children.len(), 1);
        let (successor_index, region) = cdg[a].children[0];
        assert_eq!(successor_index, 0);
        assert_eq!(member_names(&cdg, &function, region), ["then"]);
    }

    #[test]
    fn test_if_else_chain() {
        let function = parse_function(
            r"
a:
    br_cond %0 t1 e
t1:
    br t2
t2:
    br join
e:
    br join
join:
    ret
",
        )
        .unwrap();
        let cdg = build(&function);
        let a = cdg.decision(block(&function, "a")).unwrap();
        let children: Vec<_> = cdg[a]
            .children
            .iter()
            .map(|&(index, region)| (index, member_names(&cdg, &function, region)))
            .collect();
        assert_eq!(
            children,
            [(0, vec!["t1".to_string(), "t2".to_string()]), (1, vec!["e".to_string()])]
        );
        for name in ["t1", "t2", "e", "join"] {
            let decision = cdg.decision(block(&function, name)).unwrap();
            assert_eq!(cdg[decision].predecessors.len(), 1, "{}", name);
        }
    }

    #[test]
    fn test_short_circuit_merge_has_two_owners() {
        let function = parse_function(
            r"
a:
    br_cond %0 then b
b:
    br_cond %1 then else
then:
    br join
else:
    br join
join:
    ret
",
        )
        .unwrap();
        let cdg = build(&function);
        let then = cdg.decision(block(&function, "then")).unwrap();
        assert_eq!(cdg[then].predecessors.len(), 2);
        let b = cdg.decision(block(&function, "b")).unwrap();
        assert_eq!(cdg[b].predecessors.len(), 1);
        assert_eq!(cdg.reachable_decisions().len(), 5);
        let dump = cdg.display(&function).to_string();
        assert!(dump.contains("then [2 owners]"), "{}", dump);
    }

    #[test]
    fn test_same_target_twice_is_not_a_decision() {
        let function = parse_function(
            r"
a:
    br_cond %0 b b
b:
    ret
",
        )
        .unwrap();
        let cdg = build(&function);
        let a = cdg.decision(block(&function, "a")).unwrap();
        assert_eq!(cdg[a].condition, None);
        assert!(cdg[a].children.is_empty());
    }
}
