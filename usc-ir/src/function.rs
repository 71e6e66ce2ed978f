// SPDX-License-Identifier: LGPL-2.1-or-later
// See Notices.txt for copyright information

use crate::block::{BasicBlock, BlockId, Terminator};
use crate::instruction::{Instruction, LoopCondition, Marker, Value};
use crate::text::{BlockDisplay, FunctionDisplay};
use fixedbitset::FixedBitSet;
use hashbrown::HashMap;
use std::ops::{Index, IndexMut};

/// reasons a `Function` can't be constructed
#[derive(Clone, Debug, thiserror::Error)]
pub enum InvalidFunction {
    /// the block list is empty
    #[error("function `{function}` has no blocks")]
    NoBlocks {
        /// function name
        function: String,
    },
    /// the entry or exit index is not a block
    #[error("function `{function}`: block index {index} out of range")]
    BlockOutOfRange {
        /// function name
        function: String,
        /// the offending index
        index: usize,
    },
    /// a terminator names a block that doesn't exist
    #[error("block `{block}`: successor index {target} out of range")]
    TargetOutOfRange {
        /// name of the block holding the terminator
        block: String,
        /// the offending index
        target: usize,
    },
    /// a loop-merge annotation names a block that doesn't exist
    #[error("block `{block}`: loop merge index {target} out of range")]
    LoopMergeOutOfRange {
        /// name of the annotated block
        block: String,
        /// the offending index
        target: usize,
    },
    /// the exit block doesn't leave the function
    #[error("exit block `{block}` does not end in `ret`")]
    ExitDoesNotReturn {
        /// name of the exit block
        block: String,
    },
}

/// predecessor lists of the blocks reachable from the entry block
#[derive(Clone, Debug, Default)]
pub struct Predecessors(HashMap<BlockId, Vec<BlockId>>);

impl Predecessors {
    /// the predecessors of `block`, in discovery order
    pub fn get(&self, block: BlockId) -> &[BlockId] {
        self.0.get(&block).map_or(&[], Vec::as_slice)
    }
}

/// a function: an arena of basic blocks plus a single entry and a single exit
#[derive(Clone, Debug)]
pub struct Function {
    name: String,
    blocks: Vec<BasicBlock>,
    entry: BlockId,
    exit: BlockId,
    value_count: usize,
}

impl Function {
    /// create a function from its blocks; terminators refer to blocks by position in `blocks`
    pub fn new(
        name: impl Into<String>,
        blocks: Vec<BasicBlock>,
        entry: BlockId,
        exit: BlockId,
    ) -> Result<Self, InvalidFunction> {
        let name = name.into();
        if blocks.is_empty() {
            return Err(InvalidFunction::NoBlocks { function: name });
        }
        for index in [entry.index(), exit.index()] {
            if index >= blocks.len() {
                return Err(InvalidFunction::BlockOutOfRange {
                    function: name,
                    index,
                });
            }
        }
        let mut value_count = 0;
        let mut note_value = |value: Value| value_count = value_count.max(value.index() + 1);
        for block in &blocks {
            if let Some(target) = block.successors().find(|v| v.index() >= blocks.len()) {
                return Err(InvalidFunction::TargetOutOfRange {
                    block: block.name.clone(),
                    target: target.index(),
                });
            }
            if let Some(merge) = block.loop_merge {
                if merge.index() >= blocks.len() {
                    return Err(InvalidFunction::LoopMergeOutOfRange {
                        block: block.name.clone(),
                        target: merge.index(),
                    });
                }
            }
            if let Some(last) = (0..block.live_in.len())
                .rev()
                .find(|&v| block.live_in.contains(v))
            {
                note_value(Value::new(last));
            }
            for instruction in &block.instructions {
                match instruction {
                    Instruction::Operation {
                        result, operands, ..
                    } => {
                        result.iter().chain(operands).copied().for_each(&mut note_value);
                    }
                    Instruction::Marker(Marker::EnterScope { condition, .. }) => {
                        note_value(*condition)
                    }
                    Instruction::Marker(Marker::LoopTest {
                        result, condition, ..
                    }) => {
                        note_value(*result);
                        if let LoopCondition::Value(condition) = *condition {
                            note_value(condition);
                        }
                    }
                    Instruction::Marker(_) | Instruction::Exit(_) => {}
                }
            }
            match block.terminator {
                Terminator::BranchConditional { condition, .. } => note_value(condition),
                Terminator::LoopBranch { predicate, .. } => note_value(predicate),
                _ => {}
            }
        }
        if blocks[exit.index()].terminator != Terminator::Return {
            return Err(InvalidFunction::ExitDoesNotReturn {
                block: blocks[exit.index()].name.clone(),
            });
        }
        Ok(Self {
            name,
            blocks,
            entry,
            exit,
            value_count,
        })
    }
    /// the function name
    pub fn name(&self) -> &str {
        &self.name
    }
    /// the entry block
    pub fn entry(&self) -> BlockId {
        self.entry
    }
    /// replace the entry block
    pub fn set_entry(&mut self, entry: BlockId) {
        self.entry = entry;
    }
    /// the exit block, ending in `Terminator::Return`
    pub fn exit(&self) -> BlockId {
        self.exit
    }
    /// replace the exit block
    pub fn set_exit(&mut self, exit: BlockId) {
        self.exit = exit;
    }
    /// number of blocks in the arena, including blocks no longer reachable
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }
    /// number of registers allocated so far
    pub fn value_count(&self) -> usize {
        self.value_count
    }
    /// allocate a fresh register
    pub fn new_value(&mut self) -> Value {
        let retval = Value::new(self.value_count);
        self.value_count += 1;
        retval
    }
    /// add a block to the arena
    pub fn add_block(&mut self, block: BasicBlock) -> BlockId {
        let retval = BlockId::new(self.blocks.len());
        self.blocks.push(block);
        retval
    }
    /// all blocks in the arena, in allocation order
    pub fn iter(&self) -> impl Iterator<Item = (BlockId, &BasicBlock)> {
        self.blocks
            .iter()
            .enumerate()
            .map(|(index, block)| (BlockId::new(index), block))
    }
    /// make `target` the only successor of `block`
    pub fn set_unconditional_successor(&mut self, block: BlockId, target: BlockId) {
        self[block].terminator = Terminator::Branch { target };
    }
    /// end `block` in a real two-way branch
    pub fn set_conditional_successors(
        &mut self,
        block: BlockId,
        condition: Value,
        true_target: BlockId,
        false_target: BlockId,
    ) {
        self[block].terminator = Terminator::BranchConditional {
            condition,
            true_target,
            false_target,
        };
    }
    /// end `block` in a predicated two-way edge
    pub fn set_predicated_successors(&mut self, block: BlockId, enter: BlockId, skip: BlockId) {
        self[block].terminator = Terminator::Predicated { enter, skip };
    }
    /// make every edge into `from` point at `to` instead; returns the number of blocks changed
    pub fn redirect_predecessors(&mut self, from: BlockId, to: BlockId) -> usize {
        let mut changed = 0;
        for block in &mut self.blocks {
            if block.successors().any(|target| target == from) {
                block.terminator.retarget(from, to);
                changed += 1;
            }
        }
        changed
    }
    /// copy `block` into a new arena slot with the same successors
    ///
    /// The copy shares `nested` block ids with the original; deep copies are up to the caller.
    pub fn clone_block(&mut self, block: BlockId) -> BlockId {
        let retval = BlockId::new(self.blocks.len());
        let mut copy = self[block].clone();
        copy.name = format!("{}.{}", copy.name, retval.index());
        self.add_block(copy)
    }
    /// the set of blocks reachable from `start` by following terminators
    pub fn reachable_blocks(&self, start: BlockId) -> FixedBitSet {
        let mut visited = FixedBitSet::with_capacity(self.blocks.len());
        let mut worklist = vec![start];
        while let Some(block) = worklist.pop() {
            if visited.put(block.index()) {
                continue;
            }
            worklist.extend(self[block].successors());
        }
        visited
    }
    /// predecessor lists for every block reachable from the entry block
    pub fn predecessors(&self) -> Predecessors {
        let reachable = self.reachable_blocks(self.entry);
        let mut retval: HashMap<BlockId, Vec<BlockId>> = HashMap::new();
        for (block_id, block) in self.iter() {
            if !reachable.contains(block_id.index()) {
                continue;
            }
            for target in block.successors() {
                let predecessors = retval.entry(target).or_default();
                if !predecessors.contains(&block_id) {
                    predecessors.push(block_id);
                }
            }
        }
        Predecessors(retval)
    }
    /// display the blocks reachable from the entry block in the text format
    pub fn display(&self) -> FunctionDisplay<'_> {
        FunctionDisplay::new(self, None)
    }
    /// display the blocks in `order` in the text format
    pub fn display_ordered<'a>(&'a self, order: &'a [BlockId]) -> FunctionDisplay<'a> {
        FunctionDisplay::new(self, Some(order))
    }
    /// display one block in the text format
    pub fn display_block(&self, block: BlockId) -> BlockDisplay<'_> {
        BlockDisplay::new(self, block)
    }
}

impl Index<BlockId> for Function {
    type Output = BasicBlock;
    fn index(&self, index: BlockId) -> &BasicBlock {
        &self.blocks[index.index()]
    }
}

impl IndexMut<BlockId> for Function {
    fn index_mut(&mut self, index: BlockId) -> &mut BasicBlock {
        &mut self.blocks[index.index()]
    }
}
