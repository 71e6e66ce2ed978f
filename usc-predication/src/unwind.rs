// SPDX-License-Identifier: LGPL-2.1-or-later
// See Notices.txt for copyright information

//! rewriting of `break`, `continue` and early `return` into `unwind`
//!
//! One forward walk over the linear program tracks two depths. The break
//! depth counts scopes opened since the innermost `loop_enter`; the return
//! depth counts every open bracket plus the one closed by the return guard.
//! `enter_alternate` closes one scope and opens another, so it leaves both
//! depths unchanged. A `loop_enter` opens two levels: `continue` unwinds to
//! the loop's `loop_exit_guard` through one of them, `break` unwinds past
//! the loop test through both.

use crate::context::PredicationContext;
use crate::errors::{ExitOutsideLoop, NestingTooDeep, PredicationResult, UnbalancedScopes};
use crate::options::ReturnGuardPolicy;
use log::{debug, trace, warn};
use usc_ir::{BasicBlock, BlockId, Function, Instruction, Marker, NonLocalExit, Terminator};

#[derive(Debug, Default)]
struct LoopFrame {
    saved_break_depth: u32,
    /// blocks whose skip edge must reach the loop's exit
    pending_breaks: Vec<BlockId>,
    /// blocks whose skip edge must reach the loop's `loop_exit_guard`
    pending_continues: Vec<BlockId>,
}

#[derive(Debug)]
pub(crate) struct Linearized {
    pub(crate) order: Vec<BlockId>,
    pub(crate) return_guard: Option<BlockId>,
}

fn set_skip(function: &mut Function, block: BlockId, join: BlockId) {
    if let Terminator::Predicated { skip, .. } = &mut function[block].terminator {
        *skip = join;
    }
}

struct Linearizer<'a, 'b> {
    function: &'a mut Function,
    context: &'a mut PredicationContext<'b>,
    order: Vec<BlockId>,
    frames: Vec<LoopFrame>,
    break_depth: u32,
    return_depth: u32,
    return_guard: Option<BlockId>,
}

impl Linearizer<'_, '_> {
    fn unbalanced(&self, block: BlockId, reason: &'static str) -> UnbalancedScopes {
        UnbalancedScopes {
            block: self.function[block].name.clone(),
            depth: self.return_depth.into(),
            reason,
        }
    }
    fn return_guard(&mut self) -> BlockId {
        let function = &mut *self.function;
        *self.return_guard.get_or_insert_with(|| {
            let name = format!("{}.return_guard", function.name());
            function.add_block(BasicBlock::with_marker(name, Marker::ExitScope))
        })
    }
    fn marker(&mut self, block: BlockId, marker: &Marker) -> PredicationResult<()> {
        match *marker {
            Marker::EnterScope { .. } => {
                self.break_depth += 1;
                self.return_depth += 1;
            }
            Marker::EnterAlternate | Marker::Unwind { .. } => {}
            Marker::ExitScope => {
                self.break_depth = self.break_depth.saturating_sub(1);
                self.return_depth = self.return_depth.saturating_sub(1);
            }
            Marker::LoopEnter => {
                self.frames.push(LoopFrame {
                    saved_break_depth: self.break_depth,
                    ..LoopFrame::default()
                });
                self.break_depth = 0;
                self.return_depth += 2;
            }
            Marker::LoopExitGuard => {
                self.return_depth = self.return_depth.saturating_sub(1);
                let frame = match self.frames.last_mut() {
                    Some(frame) => frame,
                    None => {
                        return Err(self.unbalanced(block, "loop_exit_guard outside a loop").into())
                    }
                };
                for site in frame.pending_continues.drain(..) {
                    set_skip(self.function, site, block);
                }
            }
            Marker::LoopTest { .. } => {
                self.return_depth = self.return_depth.saturating_sub(1);
                let exit = match self.function[block].terminator {
                    Terminator::LoopBranch { exit, .. } => exit,
                    _ => {
                        return Err(self.unbalanced(block, "loop_test does not end its block").into())
                    }
                };
                let frame = match self.frames.pop() {
                    Some(frame) => frame,
                    None => {
                        return Err(self.unbalanced(block, "loop_test outside a loop").into())
                    }
                };
                self.break_depth = frame.saved_break_depth;
                for site in frame.pending_breaks {
                    set_skip(self.function, site, exit);
                }
            }
        }
        Ok(())
    }
    /// replace the exit at `instructions[index]` of the block at `order[position]`
    fn exit(
        &mut self,
        position: usize,
        index: usize,
        exit: NonLocalExit,
    ) -> PredicationResult<()> {
        let block = self.order[position];
        let outside_loop = || ExitOutsideLoop {
            block: self.function[block].name.clone(),
            exit,
        };
        let depth = match exit {
            NonLocalExit::Break if self.frames.is_empty() => return Err(outside_loop().into()),
            NonLocalExit::Continue if self.frames.is_empty() => return Err(outside_loop().into()),
            NonLocalExit::Break => self.break_depth + 2,
            NonLocalExit::Continue => self.break_depth + 1,
            NonLocalExit::Return => self.return_depth,
        };
        if let Some(limit) = self.context.options.max_unwind_depth {
            if depth > limit {
                return Err(NestingTooDeep {
                    block: self.function[block].name.clone(),
                    depth,
                    limit,
                }
                .into());
            }
        }
        trace!(
            "{} in {} becomes unwind {}",
            exit,
            self.function[block].name,
            depth
        );
        self.context.stats.unwinds += 1;
        let instructions = &mut self.function[block].instructions;
        instructions[index] = Instruction::Marker(Marker::Unwind { depth });
        let dead = instructions.len() - index - 1;
        if dead != 0 {
            instructions.truncate(index + 1);
            warn!(
                "dropped {} unreachable instructions after {} in {}",
                dead, exit, self.function[block].name
            );
        }
        let fall_through = match self.function[block].terminator.clone() {
            Terminator::Branch { target } => target,
            terminator => {
                let name = format!("{}.tail", self.function[block].name);
                let mut tail = BasicBlock::new(name);
                tail.terminator = terminator;
                let tail = self.function.add_block(tail);
                if self.function.exit() == block {
                    self.function.set_exit(tail);
                }
                self.order.insert(position + 1, tail);
                tail
            }
        };
        let join = match exit {
            NonLocalExit::Return => self.return_guard(),
            _ => fall_through,
        };
        self.function
            .set_predicated_successors(block, fall_through, join);
        if let Some(frame) = self.frames.last_mut() {
            match exit {
                NonLocalExit::Break => frame.pending_breaks.push(block),
                NonLocalExit::Continue => frame.pending_continues.push(block),
                NonLocalExit::Return => {}
            }
        }
        Ok(())
    }
    fn run(mut self) -> PredicationResult<Linearized> {
        if self.context.options.return_guard == ReturnGuardPolicy::Always {
            self.return_guard();
        }
        let mut position = 0;
        while position < self.order.len() {
            let block = self.order[position];
            let mut index = 0;
            while index < self.function[block].instructions.len() {
                match self.function[block].instructions[index].clone() {
                    Instruction::Marker(marker) => self.marker(block, &marker)?,
                    Instruction::Exit(exit) => self.exit(position, index, exit)?,
                    Instruction::Operation { .. } => {}
                }
                index += 1;
            }
            position += 1;
        }
        if !self.frames.is_empty() {
            let last = self.order[self.order.len() - 1];
            return Err(self.unbalanced(last, "loop_enter without loop_test").into());
        }
        if let Some(guard) = self.return_guard {
            let last = self.function.exit();
            self.function.set_unconditional_successor(last, guard);
            self.function[guard].terminator = Terminator::Return;
            self.function.set_exit(guard);
            self.order.push(guard);
        }
        Ok(Linearized {
            order: self.order,
            return_guard: self.return_guard,
        })
    }
}

/// rewrite every non-local exit of the linear program `order`
///
/// Each exit becomes `unwind` and its block ends in a predicated edge whose
/// skip target is the exit's join point.
pub(crate) fn linearize_exits(
    function: &mut Function,
    context: &mut PredicationContext,
    order: Vec<BlockId>,
) -> PredicationResult<Linearized> {
    debug!("linearizing non-local exits of {}", function.name());
    Linearizer {
        function,
        context,
        order,
        frames: Vec::new(),
        break_depth: 0,
        return_depth: 1,
        return_guard: None,
    }
    .run()
}
