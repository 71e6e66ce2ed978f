// SPDX-License-Identifier: LGPL-2.1-or-later
// See Notices.txt for copyright information

use log::trace;
use usc_ir::{BlockId, Function, Terminator};

/// splice every collapsed loop's nested program into `order` in place of the collapsed block
///
/// Edges into a collapsed block are moved to its `loop_enter` block and the
/// loop test's exit edge takes over the collapsed block's successor.
pub(crate) fn flatten(function: &mut Function, order: &[BlockId]) -> Vec<BlockId> {
    let mut retval = Vec::with_capacity(order.len());
    for &block in order {
        let nested = match function[block].nested.take() {
            Some(nested) => nested,
            None => {
                retval.push(block);
                continue;
            }
        };
        let (enter, test) = (nested.entry(), nested.exit());
        function.redirect_predecessors(block, enter);
        if function.entry() == block {
            function.set_entry(enter);
        }
        if let Terminator::Branch { target } = function[block].terminator {
            if let Terminator::LoopBranch { exit, .. } = &mut function[test].terminator {
                *exit = target;
            }
        }
        trace!(
            "flattening {} ({} blocks)",
            function[block].name,
            nested.blocks.len()
        );
        retval.extend(flatten(function, &nested.blocks));
    }
    retval
}
