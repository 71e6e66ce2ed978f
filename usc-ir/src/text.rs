// SPDX-License-Identifier: LGPL-2.1-or-later
// See Notices.txt for copyright information

//! text-format printer; the output is accepted by `parse`

use crate::block::{BlockId, Terminator};
use crate::function::Function;
use std::fmt;

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

/// displays one basic block
pub struct BlockDisplay<'a> {
    function: &'a Function,
    block: BlockId,
}

impl<'a> BlockDisplay<'a> {
    pub(crate) fn new(function: &'a Function, block: BlockId) -> Self {
        Self { function, block }
    }
}

impl fmt::Display for BlockDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let function = self.function;
        let block = &function[self.block];
        let indent = Indent::default().make_more();
        let label = |block: BlockId| &function[block].name;
        writeln!(f, "{}:", block.name)?;
        let live_in: Vec<_> = (0..block.live_in.len())
            .filter(|&v| block.live_in.contains(v))
            .collect();
        if !live_in.is_empty() {
            write!(f, "{}live", indent)?;
            for value in live_in {
                write!(f, " %{}", value)?;
            }
            writeln!(f)?;
        }
        if let Some(merge) = block.loop_merge {
            writeln!(f, "{}loop_merge {}", indent, label(merge))?;
        }
        if let Some(nested) = &block.nested {
            write!(f, "{}# nested:", indent)?;
            for &nested_block in &nested.blocks {
                write!(f, " {}", label(nested_block))?;
            }
            writeln!(f)?;
        }
        for instruction in &block.instructions {
            writeln!(f, "{}{}", indent, instruction)?;
        }
        write!(f, "{}", indent)?;
        match block.terminator {
            Terminator::Branch { target } => writeln!(f, "br {}", label(target)),
            Terminator::BranchConditional {
                condition,
                true_target,
                false_target,
            } => writeln!(
                f,
                "br_cond {} {} {}",
                condition,
                label(true_target),
                label(false_target)
            ),
            Terminator::Predicated { enter, skip } => {
                writeln!(f, "br_pred {} {}", label(enter), label(skip))
            }
            Terminator::LoopBranch {
                predicate,
                body,
                exit,
            } => writeln!(f, "loop_br {} {} {}", predicate, label(body), label(exit)),
            Terminator::Return => writeln!(f, "ret"),
            Terminator::Open => writeln!(f, "open"),
        }
    }
}

/// displays a function, either in a given block order or entry-first in arena order
pub struct FunctionDisplay<'a> {
    function: &'a Function,
    order: Option<&'a [BlockId]>,
}

impl<'a> FunctionDisplay<'a> {
    pub(crate) fn new(function: &'a Function, order: Option<&'a [BlockId]>) -> Self {
        Self { function, order }
    }
}

impl fmt::Display for FunctionDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let function = self.function;
        writeln!(f, "function {}", function.name())?;
        let order: Vec<BlockId> = match self.order {
            Some(order) => order.to_vec(),
            None => {
                let entry = function.entry();
                let reachable = function.reachable_blocks(entry);
                let mut order = vec![entry];
                order.extend(
                    function
                        .iter()
                        .map(|(block, _)| block)
                        .filter(|&block| block != entry && reachable.contains(block.index())),
                );
                order
            }
        };
        for block in order {
            fmt::Display::fmt(&function.display_block(block), f)?;
        }
        Ok(())
    }
}
