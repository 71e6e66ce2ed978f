// SPDX-License-Identifier: LGPL-2.1-or-later
// See Notices.txt for copyright information

use std::fmt;

/// a virtual register
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct Value(usize);

impl Value {
    /// create a `Value` from its register number
    pub const fn new(index: usize) -> Self {
        Value(index)
    }
    /// the register number
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// structured exit out of the enclosing loop or function
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum NonLocalExit {
    /// leave the innermost enclosing loop
    Break,
    /// start the next iteration of the innermost enclosing loop
    Continue,
    /// leave the function
    Return,
}

impl NonLocalExit {
    /// the text-format keyword
    pub fn name(self) -> &'static str {
        match self {
            NonLocalExit::Break => "break",
            NonLocalExit::Continue => "continue",
            NonLocalExit::Return => "return",
        }
    }
}

impl fmt::Display for NonLocalExit {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.pad(self.name())
    }
}

/// predicate deciding whether a lane leaves a loop at its test
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum LoopCondition {
    /// lanes leave when the value (after optional inversion) is true
    Value(Value),
    /// always-false sentinel: the loop never exits through its test
    Never,
}

/// scope-marker instructions bracketing predicated code
///
/// The numeric lowering of these into per-lane mask arithmetic is left to the hardware backend.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub enum Marker {
    /// open a scope enabling lanes for which `condition` (inverted if `invert`) holds
    EnterScope {
        /// branch condition of the decision block
        condition: Value,
        /// whether the scope is entered on the false outcome
        invert: bool,
    },
    /// close the current scope and open its alternate
    EnterAlternate,
    /// close the current scope
    ExitScope,
    /// open a loop; counts as two nesting levels
    LoopEnter,
    /// evaluate the loop continuation, retiring lanes for which the condition holds
    LoopTest {
        /// fresh predicate: true while any lane is still running the loop
        result: Value,
        /// exit condition
        condition: LoopCondition,
        /// invert the sense of `condition`
        invert: bool,
    },
    /// re-enable lanes that skipped the rest of the current iteration
    LoopExitGuard,
    /// disable the current lanes until `depth` enclosing brackets have closed
    Unwind {
        /// number of enclosing scope brackets to skip; at least 1
        depth: u32,
    },
}

impl Marker {
    /// the text-format keyword
    pub fn name(&self) -> &'static str {
        match self {
            Marker::EnterScope { .. } => "enter_scope",
            Marker::EnterAlternate => "enter_alternate",
            Marker::ExitScope => "exit_scope",
            Marker::LoopEnter => "loop_enter",
            Marker::LoopTest { .. } => "loop_test",
            Marker::LoopExitGuard => "loop_exit_guard",
            Marker::Unwind { .. } => "unwind",
        }
    }
}

impl fmt::Display for Marker {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let not = |invert: bool| if invert { "not " } else { "" };
        match *self {
            Marker::EnterScope { condition, invert } => {
                write!(f, "{} {}{}", self.name(), not(invert), condition)
            }
            Marker::LoopTest {
                result,
                condition: LoopCondition::Value(condition),
                invert,
            } => write!(f, "{} = {} {}{}", result, self.name(), not(invert), condition),
            Marker::LoopTest {
                result,
                condition: LoopCondition::Never,
                ..
            } => write!(f, "{} = {} never", result, self.name()),
            Marker::Unwind { depth } => write!(f, "{} {}", self.name(), depth),
            Marker::EnterAlternate
            | Marker::ExitScope
            | Marker::LoopEnter
            | Marker::LoopExitGuard => f.write_str(self.name()),
        }
    }
}

/// an instruction inside a basic block
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub enum Instruction {
    /// ordinary computation, opaque to the predication pass
    Operation {
        /// the register written, if any
        result: Option<Value>,
        /// operation name
        opcode: String,
        /// registers read
        operands: Vec<Value>,
    },
    /// `break`, `continue` or early `return`
    Exit(NonLocalExit),
    /// scope marker
    Marker(Marker),
}

impl Instruction {
    /// the non-local exit, if `self` is one
    pub fn non_local_exit(&self) -> Option<NonLocalExit> {
        match *self {
            Instruction::Exit(exit) => Some(exit),
            _ => None,
        }
    }
    /// the marker, if `self` is one
    pub fn marker(&self) -> Option<&Marker> {
        match self {
            Instruction::Marker(marker) => Some(marker),
            _ => None,
        }
    }
}

impl From<Marker> for Instruction {
    fn from(marker: Marker) -> Self {
        Instruction::Marker(marker)
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Instruction::Operation {
                result,
                opcode,
                operands,
            } => {
                if let Some(result) = result {
                    write!(f, "{} = ", result)?;
                }
                f.write_str(opcode)?;
                for operand in operands {
                    write!(f, " {}", operand)?;
                }
                Ok(())
            }
            Instruction::Exit(exit) => fmt::Display::fmt(exit, f),
            Instruction::Marker(marker) => fmt::Display::fmt(marker, f),
        }
    }
}
