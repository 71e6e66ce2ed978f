// SPDX-License-Identifier: LGPL-2.1-or-later
// See Notices.txt for copyright information

//! bracket checks on a linear program

use crate::errors::{PredicationResult, UnbalancedScopes};
use usc_ir::{BlockId, Function, Marker};

/// change in the open scope count caused by `marker`
fn scope_delta(marker: &Marker) -> i64 {
    match marker {
        Marker::EnterScope { .. } => 1,
        Marker::LoopEnter => 2,
        Marker::ExitScope | Marker::LoopExitGuard | Marker::LoopTest { .. } => -1,
        Marker::EnterAlternate | Marker::Unwind { .. } => 0,
    }
}

/// the open scope count after each marker of `order`, starting from `initial`
pub fn open_scope_counts(function: &Function, order: &[BlockId], initial: i64) -> Vec<i64> {
    let mut count = initial;
    order
        .iter()
        .flat_map(|&block| function[block].markers())
        .map(|marker| {
            count += scope_delta(marker);
            count
        })
        .collect()
}

/// check that the markers of `order` nest properly
///
/// With a return guard the count starts at one, for the bracket the guard closes.
/// It must never go negative, `enter_alternate` must have a scope to close, no
/// `unwind` may skip more brackets than are open, and the count must end at zero.
pub fn verify_brackets(
    function: &Function,
    order: &[BlockId],
    has_return_guard: bool,
) -> PredicationResult<()> {
    let mut count = i64::from(has_return_guard);
    let error = |block: BlockId, count: i64, reason: &'static str| UnbalancedScopes {
        block: function[block].name.clone(),
        depth: count,
        reason,
    };
    for &block in order {
        for marker in function[block].markers() {
            match *marker {
                Marker::EnterAlternate if count < 1 => {
                    return Err(error(block, count, "enter_alternate with no open scope").into())
                }
                Marker::Unwind { depth } if i64::from(depth) > count => {
                    return Err(error(block, count, "unwind deeper than the open scopes").into())
                }
                _ => {}
            }
            count += scope_delta(marker);
            if count < 0 {
                return Err(error(block, count, "scope closed that was never opened").into());
            }
        }
    }
    if count != 0 {
        let last = order.last().copied().unwrap_or_else(|| function.exit());
        return Err(error(last, count, "scopes left open at the function exit").into());
    }
    Ok(())
}
