// SPDX-License-Identifier: LGPL-2.1-or-later
// See Notices.txt for copyright information

/// when to add the `exit_scope` block guarding the function exit
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum ReturnGuardPolicy {
    /// only when the function contains an early `return`
    OnDemand,
    /// in every function
    Always,
}

impl Default for ReturnGuardPolicy {
    fn default() -> Self {
        ReturnGuardPolicy::OnDemand
    }
}

#[derive(Clone, Debug)]
pub struct PredicationOptions {
    pub return_guard: ReturnGuardPolicy,
    /// reject functions needing a deeper `unwind` than the target supports
    pub max_unwind_depth: Option<u32>,
    /// check bracket balance and unwind depths of the result
    pub verify: bool,
}

impl Default for PredicationOptions {
    fn default() -> Self {
        Self {
            return_guard: ReturnGuardPolicy::default(),
            max_unwind_depth: None,
            verify: cfg!(debug_assertions),
        }
    }
}
