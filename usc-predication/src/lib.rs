// SPDX-License-Identifier: LGPL-2.1-or-later
// See Notices.txt for copyright information

//! If-conversion of structured control flow into a linear, scope-bracketed program
//!
//! [`predicate_function`] rewrites every branch of a [`Function`] into a pair of
//! scope markers, wraps every natural loop with loop markers and replaces
//! `break`, `continue` and early `return` by `unwind`. The result runs every
//! lane through every instruction under a per-lane enable mask.

mod cdg;
mod context;
mod duplicate;
mod errors;
mod flatten;
mod layout;
mod loops;
mod options;
mod unwind;
mod verify;

pub use crate::cdg::{ControlDependenceGraph, Decision, DecisionId, Region, RegionId};
pub use crate::context::PredicationStats;
pub use crate::duplicate::{clone_block_deep, split_merges};
pub use crate::errors::*;
pub use crate::loops::{extract_loops, LoopDescriptor};
pub use crate::options::{PredicationOptions, ReturnGuardPolicy};
pub use crate::verify::{open_scope_counts, verify_brackets};

use crate::context::PredicationContext;
use log::{debug, info};
use std::fmt;
use usc_ir::{BlockId, Function, Value};

/// a predicated function, ready for hardware lowering
#[derive(Clone, Debug)]
pub struct LinearProgram {
    pub function: Function,
    /// the blocks in execution order
    pub order: Vec<BlockId>,
    /// register reserved for the scope-nesting accumulator
    pub nesting_counter: Value,
    /// the `exit_scope` block in front of the function's `ret`, if one was added
    pub return_guard: Option<BlockId>,
    pub stats: PredicationStats,
}

impl fmt::Display for LinearProgram {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "# nesting counter {}", self.nesting_counter)?;
        write!(f, "{}", self.function.display_ordered(&self.order))
    }
}

/// predicate `function`; on error the function can't be compiled but others can
pub fn predicate_function(
    mut function: Function,
    options: &PredicationOptions,
) -> PredicationResult<LinearProgram> {
    let mut context = PredicationContext::new(options, &mut function);
    let loops = extract_loops(&function)?;
    debug!("{}: {} loops", function.name(), loops.len());
    for descriptor in &loops {
        loops::wrap_loop(&mut function, &mut context, descriptor)?;
    }
    let (entry, exit) = (function.entry(), function.exit());
    let skeleton = layout::predicate_sub_graph(&mut function, &mut context, entry, exit)?;
    let order = flatten::flatten(&mut function, &skeleton);
    let linearized = unwind::linearize_exits(&mut function, &mut context, order)?;
    if options.verify {
        verify_brackets(
            &function,
            &linearized.order,
            linearized.return_guard.is_some(),
        )?;
    }
    info!("{}: {}", function.name(), context.stats);
    Ok(LinearProgram {
        nesting_counter: context.nesting_counter,
        stats: context.stats,
        function,
        order: linearized.order,
        return_guard: linearized.return_guard,
    })
}
