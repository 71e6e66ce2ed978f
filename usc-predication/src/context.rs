// SPDX-License-Identifier: LGPL-2.1-or-later
// See Notices.txt for copyright information

use crate::options::PredicationOptions;
use std::fmt;
use usc_ir::{Function, Value};

/// counters describing what the pass did to one function
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default)]
pub struct PredicationStats {
    /// blocks cloned to give merge points a single owning scope
    pub clones: usize,
    /// loops wrapped
    pub loops: usize,
    /// non-local exits rewritten into `unwind`
    pub unwinds: usize,
    /// `enter_scope` markers emitted
    pub scopes: usize,
}

impl fmt::Display for PredicationStats {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} scopes, {} loops, {} unwinds, {} clones",
            self.scopes, self.loops, self.unwinds, self.clones
        )
    }
}

/// per-function state shared by every phase of the pass
#[derive(Debug)]
pub(crate) struct PredicationContext<'a> {
    pub(crate) options: &'a PredicationOptions,
    /// register reserved for the hardware's scope-nesting accumulator
    pub(crate) nesting_counter: Value,
    pub(crate) stats: PredicationStats,
}

impl<'a> PredicationContext<'a> {
    pub(crate) fn new(options: &'a PredicationOptions, function: &mut Function) -> Self {
        Self {
            options,
            nesting_counter: function.new_value(),
            stats: PredicationStats::default(),
        }
    }
}
