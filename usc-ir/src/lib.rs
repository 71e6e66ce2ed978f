// SPDX-License-Identifier: LGPL-2.1-or-later
// See Notices.txt for copyright information
#![deny(missing_docs)]

//! Register-based intermediate representation consumed by the predication pass
//!
//! A [`Function`] owns an arena of [`BasicBlock`]s addressed by [`BlockId`].
//! Blocks are linked through their [`Terminator`]s; there is no separate edge list.

mod block;
pub mod dominance;
mod from_text;
mod function;
mod instruction;
mod text;

pub use crate::block::{BasicBlock, BlockId, NestedProgram, Terminator};
pub use crate::from_text::{parse, parse_function, ParseError, TextPosition};
pub use crate::function::{Function, InvalidFunction, Predecessors};
pub use crate::instruction::{Instruction, LoopCondition, Marker, NonLocalExit, Value};
pub use crate::text::{BlockDisplay, FunctionDisplay};
pub use fixedbitset::FixedBitSet;
