// SPDX-License-Identifier: LGPL-2.1-or-later
// See Notices.txt for copyright information

use thiserror::Error;
use usc_ir::{InvalidFunction, NonLocalExit};

/// a block is still owned by more than one control-dependence region at layout time
#[derive(Clone, Debug, Error)]
#[error("block `{block}` is reached from more than one control-dependence region")]
pub struct UnresolvedMerge {
    /// name of the block
    pub block: String,
}

/// a loop header can't be reached from the function entry
#[derive(Clone, Debug, Error)]
#[error("loop header `{header}` is unreachable from the function entry")]
pub struct UnreachableLoop {
    /// name of the loop header
    pub header: String,
}

/// a loop that can't be isolated into a single-entry single-exit sub-graph
#[derive(Clone, Debug, Error)]
#[error("malformed loop at `{header}`: {reason}")]
pub struct MalformedLoop {
    /// name of the loop header
    pub header: String,
    /// what is wrong with it
    pub reason: String,
}

/// the post-dominator tree contradicts the control flow graph
#[derive(Clone, Debug, Error)]
#[error("internal compiler error: post-dominance is inconsistent at `{block}`: {reason}")]
pub struct OracleInconsistency {
    /// name of the block where the inconsistency was found
    pub block: String,
    /// what was inconsistent
    pub reason: &'static str,
}

/// a cycle that isn't a natural loop
#[derive(Clone, Debug, Error)]
#[error("irreducible control flow: cycle through `{block}` is not a natural loop")]
pub struct IrreducibleControlFlow {
    /// name of a block on the cycle
    pub block: String,
}

/// `break` or `continue` with no enclosing loop
#[derive(Clone, Debug, Error)]
#[error("`{exit}` in block `{block}` is not inside a loop")]
pub struct ExitOutsideLoop {
    /// name of the block holding the exit
    pub block: String,
    /// the offending exit
    pub exit: NonLocalExit,
}

/// the emitted scope markers don't form properly nested brackets
#[derive(Clone, Debug, Error)]
#[error("unbalanced scopes at `{block}` (open scope count {depth}): {reason}")]
pub struct UnbalancedScopes {
    /// name of the block where the imbalance was detected
    pub block: String,
    /// open scope count at that point
    pub depth: i64,
    /// what went wrong
    pub reason: &'static str,
}

/// an unwind depth over the configured limit
#[derive(Clone, Debug, Error)]
#[error("unwind depth {depth} in block `{block}` exceeds the limit of {limit}")]
pub struct NestingTooDeep {
    /// name of the block holding the exit
    pub block: String,
    /// the required depth
    pub depth: u32,
    /// the configured limit
    pub limit: u32,
}

/// any failure of the predication pass; the function being compiled is abandoned
#[derive(Clone, Debug, Error)]
pub enum PredicationError {
    #[error(transparent)]
    UnresolvedMerge(#[from] UnresolvedMerge),
    #[error(transparent)]
    UnreachableLoop(#[from] UnreachableLoop),
    #[error(transparent)]
    MalformedLoop(#[from] MalformedLoop),
    #[error(transparent)]
    OracleInconsistency(#[from] OracleInconsistency),
    #[error(transparent)]
    IrreducibleControlFlow(#[from] IrreducibleControlFlow),
    #[error(transparent)]
    ExitOutsideLoop(#[from] ExitOutsideLoop),
    #[error(transparent)]
    UnbalancedScopes(#[from] UnbalancedScopes),
    #[error(transparent)]
    NestingTooDeep(#[from] NestingTooDeep),
    #[error(transparent)]
    InvalidFunction(#[from] InvalidFunction),
}

impl PredicationError {
    /// true for errors caused by a bug in an analysis rather than by the input program
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            PredicationError::OracleInconsistency(_) | PredicationError::UnbalancedScopes(_)
        )
    }
}

pub type PredicationResult<T> = Result<T, PredicationError>;
