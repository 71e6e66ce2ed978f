// SPDX-License-Identifier: LGPL-2.1-or-later
// See Notices.txt for copyright information

use crate::instruction::{Instruction, Marker, Value};
use fixedbitset::FixedBitSet;

/// index of a basic block in its `Function`
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct BlockId(usize);

impl BlockId {
    /// create a `BlockId` from an arena index
    pub const fn new(index: usize) -> Self {
        BlockId(index)
    }
    /// the arena index
    pub const fn index(self) -> usize {
        self.0
    }
}

/// the instruction ending a basic block
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub enum Terminator {
    /// unconditional jump
    Branch {
        /// the successor
        target: BlockId,
    },
    /// real two-way branch; `true_target` is successor 0 and `false_target` is successor 1
    BranchConditional {
        /// the branch condition
        condition: Value,
        /// successor taken when `condition` is true
        true_target: BlockId,
        /// successor taken when `condition` is false
        false_target: BlockId,
    },
    /// predicated two-way edge produced by if-conversion
    ///
    /// Lanes continue into `enter`; `skip` is only taken when no lane is enabled.
    Predicated {
        /// the predicated continuation
        enter: BlockId,
        /// join point taken when every lane is disabled
        skip: BlockId,
    },
    /// the back edge of a wrapped loop
    LoopBranch {
        /// predicate produced by the loop test
        predicate: Value,
        /// the first block of the loop body
        body: BlockId,
        /// the block after the loop
        exit: BlockId,
    },
    /// leave the function
    Return,
    /// end of an isolated sub-program whose successor has not been wired yet
    Open,
}

impl Terminator {
    /// the successors, in successor-index order
    pub fn targets(&self) -> impl Iterator<Item = BlockId> {
        let targets = match *self {
            Terminator::Branch { target } => [Some(target), None],
            Terminator::BranchConditional {
                true_target,
                false_target,
                ..
            } => [Some(true_target), Some(false_target)],
            Terminator::Predicated { enter, skip } => [Some(enter), Some(skip)],
            Terminator::LoopBranch { body, exit, .. } => [Some(body), Some(exit)],
            Terminator::Return | Terminator::Open => [None, None],
        };
        IntoIterator::into_iter(targets).flatten()
    }
    /// replace every successor equal to `from` with `to`
    pub fn retarget(&mut self, from: BlockId, to: BlockId) {
        let mut replace = |target: &mut BlockId| {
            if *target == from {
                *target = to;
            }
        };
        match self {
            Terminator::Branch { target } => replace(target),
            Terminator::BranchConditional {
                true_target,
                false_target,
                ..
            } => {
                replace(true_target);
                replace(false_target);
            }
            Terminator::Predicated { enter, skip } => {
                replace(enter);
                replace(skip);
            }
            Terminator::LoopBranch { body, exit, .. } => {
                replace(body);
                replace(exit);
            }
            Terminator::Return | Terminator::Open => {}
        }
    }
    /// rewrite every successor through `map`
    pub fn map_targets(&mut self, mut map: impl FnMut(BlockId) -> BlockId) {
        match self {
            Terminator::Branch { target } => *target = map(*target),
            Terminator::BranchConditional {
                true_target,
                false_target,
                ..
            } => {
                *true_target = map(*true_target);
                *false_target = map(*false_target);
            }
            Terminator::Predicated { enter, skip } => {
                *enter = map(*enter);
                *skip = map(*skip);
            }
            Terminator::LoopBranch { body, exit, .. } => {
                *body = map(*body);
                *exit = map(*exit);
            }
            Terminator::Return | Terminator::Open => {}
        }
    }
}

/// an already-wrapped inner loop owned by the block standing in for it
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct NestedProgram {
    /// the linear order of the loop's blocks, `LOOP_ENTER` first and `LOOP_TEST` last
    pub blocks: Vec<BlockId>,
}

impl NestedProgram {
    /// create a `NestedProgram` from a non-empty block order
    pub fn new(blocks: Vec<BlockId>) -> Self {
        assert!(!blocks.is_empty(), "nested program has no blocks");
        Self { blocks }
    }
    /// the first block
    pub fn entry(&self) -> BlockId {
        self.blocks[0]
    }
    /// the last block
    pub fn exit(&self) -> BlockId {
        self.blocks[self.blocks.len() - 1]
    }
}

/// a basic block
#[derive(Clone, Debug)]
pub struct BasicBlock {
    /// label used by the text format
    pub name: String,
    /// values available on entry to the block
    pub live_in: FixedBitSet,
    /// set on loop headers: the block control reaches when the loop finishes
    pub loop_merge: Option<BlockId>,
    /// the body
    pub instructions: Vec<Instruction>,
    /// the block terminator
    pub terminator: Terminator,
    /// the inner loop this block stands in for
    pub nested: Option<NestedProgram>,
}

impl BasicBlock {
    /// create an empty block with an `Open` terminator
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            live_in: FixedBitSet::with_capacity(0),
            loop_merge: None,
            instructions: Vec::new(),
            terminator: Terminator::Open,
            nested: None,
        }
    }
    /// create a block holding a single scope marker
    pub fn with_marker(name: impl Into<String>, marker: Marker) -> Self {
        let mut retval = Self::new(name);
        retval.instructions.push(Instruction::Marker(marker));
        retval
    }
    /// true if the block ends in a real branch with two distinct successors
    pub fn is_decision(&self) -> bool {
        match self.terminator {
            Terminator::BranchConditional {
                true_target,
                false_target,
                ..
            } => true_target != false_target,
            _ => false,
        }
    }
    /// the scope markers in the block, in order
    pub fn markers(&self) -> impl Iterator<Item = &Marker> {
        self.instructions.iter().filter_map(Instruction::marker)
    }
    /// the successors, in successor-index order
    pub fn successors(&self) -> impl Iterator<Item = BlockId> {
        self.terminator.targets()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_targets_in_successor_order() {
        let terminator = Terminator::BranchConditional {
            condition: Value::new(0),
            true_target: BlockId::new(3),
            false_target: BlockId::new(1),
        };
        let targets: Vec<_> = terminator.targets().collect();
        assert_eq!(targets, [BlockId::new(3), BlockId::new(1)]);
        assert_eq!(Terminator::Return.targets().count(), 0);
    }

    #[test]
    fn test_retarget() {
        let mut terminator = Terminator::Predicated {
            enter: BlockId::new(2),
            skip: BlockId::new(2),
        };
        terminator.retarget(BlockId::new(2), BlockId::new(5));
        assert_eq!(
            terminator,
            Terminator::Predicated {
                enter: BlockId::new(5),
                skip: BlockId::new(5),
            }
        );
    }

    #[test]
    fn test_decision_needs_distinct_successors() {
        let mut block = BasicBlock::new("b");
        block.terminator = Terminator::BranchConditional {
            condition: Value::new(0),
            true_target: BlockId::new(1),
            false_target: BlockId::new(1),
        };
        assert!(!block.is_decision());
        block.terminator = Terminator::BranchConditional {
            condition: Value::new(0),
            true_target: BlockId::new(1),
            false_target: BlockId::new(2),
        };
        assert!(block.is_decision());
    }
}
