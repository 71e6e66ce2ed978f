// SPDX-License-Identifier: LGPL-2.1-or-later
// See Notices.txt for copyright information

//! dominator and post-dominator trees over a `Function`'s blocks

use crate::block::BlockId;
use crate::function::Function;
use hashbrown::HashMap;
use petgraph::algo::dominators;
use petgraph::graph::{DiGraph, NodeIndex};

/// post-dominance queries the predication pass relies on
pub trait PostDominance {
    /// true if `block` is part of the analyzed sub-graph and reaches its exit
    fn contains(&self, block: BlockId) -> bool;
    /// true if every path from `b` to the exit passes through `a`; reflexive
    fn post_dominates(&self, a: BlockId, b: BlockId) -> bool;
    /// the closest strict post-dominator of `block`; `None` for the exit
    fn immediate_post_dominator(&self, block: BlockId) -> Option<BlockId>;
}

#[derive(Debug)]
struct BlockGraph {
    graph: DiGraph<BlockId, ()>,
    node_indexes: HashMap<BlockId, NodeIndex>,
}

impl BlockGraph {
    /// collect the blocks reachable from `entry`, not following edges out of `stop`
    fn new(function: &Function, entry: BlockId, stop: Option<BlockId>, reverse: bool) -> Self {
        let mut graph = DiGraph::new();
        let mut node_indexes = HashMap::new();
        let mut worklist = vec![entry];
        node_indexes.insert(entry, graph.add_node(entry));
        let mut edges = Vec::new();
        while let Some(block) = worklist.pop() {
            if Some(block) == stop {
                continue;
            }
            for target in function[block].successors() {
                if !node_indexes.contains_key(&target) {
                    node_indexes.insert(target, graph.add_node(target));
                    worklist.push(target);
                }
                edges.push((block, target));
            }
        }
        for (from, to) in edges {
            let (from, to) = (node_indexes[&from], node_indexes[&to]);
            if reverse {
                graph.update_edge(to, from, ());
            } else {
                graph.update_edge(from, to, ());
            }
        }
        Self {
            graph,
            node_indexes,
        }
    }
}

#[derive(Debug)]
struct Tree {
    blocks: BlockGraph,
    dominators: dominators::Dominators<NodeIndex>,
}

impl Tree {
    fn new(blocks: BlockGraph, root: BlockId) -> Self {
        let dominators = dominators::simple_fast(&blocks.graph, blocks.node_indexes[&root]);
        Self { blocks, dominators }
    }
    fn node(&self, block: BlockId) -> Option<NodeIndex> {
        let node = *self.blocks.node_indexes.get(&block)?;
        self.dominators.immediate_dominator(node)?;
        Some(node)
    }
    fn contains(&self, block: BlockId) -> bool {
        self.blocks.node_indexes.get(&block).map_or(false, |&node| {
            node == self.dominators.root() || self.dominators.immediate_dominator(node).is_some()
        })
    }
    fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        if a == b {
            return self.contains(b);
        }
        let (a, b) = match (self.blocks.node_indexes.get(&a), self.node(b)) {
            (Some(&a), Some(b)) => (a, b),
            _ => return false,
        };
        self.dominators
            .dominators(b)
            .map_or(false, |mut chain| chain.any(|node| node == a))
    }
    fn immediate_dominator(&self, block: BlockId) -> Option<BlockId> {
        let node = self.node(block)?;
        self.dominators
            .immediate_dominator(node)
            .map(|node| self.blocks.graph[node])
    }
}

/// post-dominator tree of the sub-graph between an entry and an exit block
///
/// Blocks from which the exit can't be reached are not part of the tree.
#[derive(Debug)]
pub struct PostDominatorTree {
    tree: Tree,
    exit: BlockId,
}

impl PostDominatorTree {
    /// analyze the blocks reachable from `entry`, treating `exit` as the sink
    pub fn compute(function: &Function, entry: BlockId, exit: BlockId) -> Self {
        let mut blocks = BlockGraph::new(function, entry, Some(exit), true);
        if !blocks.node_indexes.contains_key(&exit) {
            let node = blocks.graph.add_node(exit);
            blocks.node_indexes.insert(exit, node);
        }
        Self {
            tree: Tree::new(blocks, exit),
            exit,
        }
    }
    /// the sink of the analyzed sub-graph
    pub fn exit(&self) -> BlockId {
        self.exit
    }
}

impl PostDominance for PostDominatorTree {
    fn contains(&self, block: BlockId) -> bool {
        self.tree.contains(block)
    }
    fn post_dominates(&self, a: BlockId, b: BlockId) -> bool {
        self.tree.dominates(a, b)
    }
    fn immediate_post_dominator(&self, block: BlockId) -> Option<BlockId> {
        self.tree.immediate_dominator(block)
    }
}

/// forward dominator tree of the blocks reachable from an entry block
#[derive(Debug)]
pub struct DominatorTree {
    tree: Tree,
}

impl DominatorTree {
    /// analyze the blocks reachable from `entry`
    pub fn compute(function: &Function, entry: BlockId) -> Self {
        Self {
            tree: Tree::new(BlockGraph::new(function, entry, None, false), entry),
        }
    }
    /// true if `block` is reachable from the entry
    pub fn contains(&self, block: BlockId) -> bool {
        self.tree.contains(block)
    }
    /// true if every path from the entry to `b` passes through `a`; reflexive
    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        self.tree.dominates(a, b)
    }
    /// the closest strict dominator of `block`; `None` for the entry
    pub fn immediate_dominator(&self, block: BlockId) -> Option<BlockId> {
        self.tree.immediate_dominator(block)
    }
}
