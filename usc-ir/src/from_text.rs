// SPDX-License-Identifier: LGPL-2.1-or-later
// See Notices.txt for copyright information

//! text-format parser

use crate::block::{BasicBlock, BlockId, Terminator};
use crate::function::Function;
use crate::instruction::{Instruction, LoopCondition, Marker, NonLocalExit, Value};
use hashbrown::HashMap;
use std::convert::TryFrom;
use std::fmt;

#[derive(Copy, Clone, Debug)]
struct ParserInput<'a> {
    input_str: &'a str,
    current_position: TextPosition,
}

/// a position in the parsed text
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct TextPosition {
    /// 1-based line number
    pub line_number: usize,
    /// byte offset from the start of the input
    pub byte_index: usize,
    /// byte offset of the start of the line
    pub line_start_byte_index: usize,
}

impl TextPosition {
    /// 1-based column
    pub fn column(self) -> usize {
        self.byte_index - self.line_start_byte_index + 1
    }
}

impl fmt::Display for TextPosition {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.line_number, self.column())
    }
}

impl<'a> ParserInput<'a> {
    fn new(input_str: &'a str) -> Self {
        Self {
            input_str,
            current_position: TextPosition {
                byte_index: 0,
                line_number: 1,
                line_start_byte_index: 0,
            },
        }
    }
    fn peek(mut self) -> Option<char> {
        self.get()
    }
    fn get(&mut self) -> Option<char> {
        let mut chars = self.input_str[self.current_position.byte_index..].chars();
        let retval = chars.next();
        self.current_position.byte_index = self.input_str.len() - chars.as_str().len();
        if (retval == Some('\r') && chars.next() != Some('\n')) || retval == Some('\n') {
            self.current_position.line_number += 1;
            self.current_position.line_start_byte_index = self.current_position.byte_index;
        }
        retval
    }
    fn text_from(self, start_position: TextPosition) -> &'a str {
        &self.input_str[start_position.byte_index..self.current_position.byte_index]
    }
}

#[derive(Copy, Clone, Hash, Eq, PartialEq, Debug)]
enum TokenKind {
    EndOfFile,
    Identifier,
    Integer,
    Colon,
    Percent,
    Equals,
    NewLine,
}

#[derive(Copy, Clone, Debug)]
struct Token<'a> {
    position: TextPosition,
    kind: TokenKind,
    text: &'a str,
    numeric_value: Option<u64>,
}

#[derive(Clone, Debug)]
struct Tokenizer<'a> {
    input: ParserInput<'a>,
    next_result: Option<Result<Token<'a>, ParseError>>,
}

fn is_identifier_continue(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '_' || ch == '.'
}

impl<'a> Tokenizer<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input: ParserInput::new(input),
            next_result: None,
        }
    }
    fn get(&mut self) -> Result<Token<'a>, ParseError> {
        if let Some(result) = self.next_result.take() {
            return result;
        }
        loop {
            let start_position = self.input.current_position;
            let ch = match self.input.peek() {
                Some(v) => v,
                None => {
                    return Ok(Token {
                        position: start_position,
                        kind: TokenKind::EndOfFile,
                        text: "",
                        numeric_value: None,
                    });
                }
            };
            if ch == '\r' || ch == '\n' {
                self.input.get();
                if ch == '\r' && self.input.peek() == Some('\n') {
                    self.input.get();
                }
                return Ok(Token {
                    position: start_position,
                    kind: TokenKind::NewLine,
                    text: "\n",
                    numeric_value: None,
                });
            } else if ch.is_ascii_whitespace() {
                self.input.get();
            } else if ch == '#' || ch == ';' {
                while let Some(ch) = self.input.peek() {
                    if ch == '\r' || ch == '\n' {
                        break;
                    }
                    self.input.get();
                }
            } else {
                break;
            }
        }
        let start_position = self.input.current_position;
        let token = |input: ParserInput<'a>, kind: TokenKind, numeric_value| {
            Ok(Token {
                position: start_position,
                kind,
                text: input.text_from(start_position),
                numeric_value,
            })
        };
        match self.input.get() {
            Some(':') => token(self.input, TokenKind::Colon, None),
            Some('%') => token(self.input, TokenKind::Percent, None),
            Some('=') => token(self.input, TokenKind::Equals, None),
            Some(ch) if ch.is_ascii_alphabetic() || ch == '_' => {
                while self.input.peek().map_or(false, is_identifier_continue) {
                    self.input.get();
                }
                token(self.input, TokenKind::Identifier, None)
            }
            Some(ch) if ch.is_ascii_digit() => {
                while self.input.peek().map_or(false, |v| v.is_ascii_digit()) {
                    self.input.get();
                }
                let numeric_value = match self.input.text_from(start_position).parse() {
                    Ok(numeric_value) => Some(numeric_value),
                    Err(_) => return parse_error(start_position, "number too big"),
                };
                token(self.input, TokenKind::Integer, numeric_value)
            }
            ch => parse_error(start_position, format!("invalid character: {:?}", ch)),
        }
    }
    fn peek(&mut self) -> Result<Token<'a>, ParseError> {
        let retval = self.get();
        self.next_result = Some(retval.clone());
        retval
    }
    fn skip_new_lines(&mut self) -> Result<(), ParseError> {
        while self.peek()?.kind == TokenKind::NewLine {
            self.get()?;
        }
        Ok(())
    }
    fn get_required_kind<S: ToString, F: FnOnce() -> S>(
        &mut self,
        required_kind: TokenKind,
        failure_message: F,
    ) -> Result<Token<'a>, ParseError> {
        let retval = self.get()?;
        if retval.kind != required_kind {
            parse_error(retval.position, failure_message())
        } else {
            Ok(retval)
        }
    }
    fn get_usize<S: ToString, F: FnOnce() -> S>(
        &mut self,
        failure_message: F,
    ) -> Result<(TextPosition, usize), ParseError> {
        let Token {
            position,
            numeric_value,
            ..
        } = self.get_required_kind(TokenKind::Integer, failure_message)?;
        match numeric_value.map(usize::try_from) {
            Some(Ok(numeric_value)) => Ok((position, numeric_value)),
            _ => parse_error(position, "number too big"),
        }
    }
}

/// error produced by `parse`
#[derive(Clone, Debug, thiserror::Error)]
#[error("{position}: error: {message}")]
pub struct ParseError {
    /// where the error was detected
    pub position: TextPosition,
    /// description of the error
    pub message: String,
}

fn parse_error<T: ToString, R>(position: TextPosition, message: T) -> Result<R, ParseError> {
    Err(ParseError {
        position,
        message: message.to_string(),
    })
}

#[derive(Debug)]
struct Label {
    index: usize,
    first_reference: TextPosition,
    defined: bool,
}

enum ParsedLine {
    Instruction(Instruction),
    Terminator(Terminator),
    LiveIn(Vec<Value>),
    LoopMerge(BlockId),
}

#[derive(Default)]
struct FunctionParser<'a> {
    labels: HashMap<&'a str, Label>,
    blocks: Vec<Option<BasicBlock>>,
}

impl<'a> FunctionParser<'a> {
    fn label_entry(&mut self, token: Token<'a>) -> &mut Label {
        let next_index = self.labels.len();
        let label = self.labels.entry(token.text).or_insert_with(|| Label {
            index: next_index,
            first_reference: token.position,
            defined: false,
        });
        if label.index == self.blocks.len() {
            self.blocks.push(None);
        }
        label
    }
    fn label(&mut self, token: Token<'a>) -> BlockId {
        BlockId::new(self.label_entry(token).index)
    }
    fn parse_label(&mut self, tokenizer: &mut Tokenizer<'a>) -> Result<BlockId, ParseError> {
        let name = tokenizer.get_required_kind(TokenKind::Identifier, || "missing label")?;
        Ok(self.label(name))
    }
    fn parse_value(&mut self, tokenizer: &mut Tokenizer<'a>) -> Result<Value, ParseError> {
        tokenizer.get_required_kind(TokenKind::Percent, || "expected register")?;
        Ok(Value::new(
            tokenizer.get_usize(|| "expected virtual register number")?.1,
        ))
    }
    fn parse_values(&mut self, tokenizer: &mut Tokenizer<'a>) -> Result<Vec<Value>, ParseError> {
        let mut retval = Vec::new();
        while tokenizer.peek()?.kind == TokenKind::Percent {
            retval.push(self.parse_value(tokenizer)?);
        }
        Ok(retval)
    }
    /// parses an optional `not` followed by a register
    fn parse_condition(
        &mut self,
        tokenizer: &mut Tokenizer<'a>,
    ) -> Result<(Value, bool), ParseError> {
        let token = tokenizer.peek()?;
        let invert = token.kind == TokenKind::Identifier && token.text == "not";
        if invert {
            tokenizer.get()?;
        }
        Ok((self.parse_value(tokenizer)?, invert))
    }
    fn parse_line(&mut self, tokenizer: &mut Tokenizer<'a>) -> Result<ParsedLine, ParseError> {
        let result = if tokenizer.peek()?.kind == TokenKind::Percent {
            let result = self.parse_value(tokenizer)?;
            tokenizer.get_required_kind(TokenKind::Equals, || "missing '=' after result")?;
            Some(result)
        } else {
            None
        };
        let opcode = tokenizer.get_required_kind(TokenKind::Identifier, || "expected opcode")?;
        let no_result = || {
            if result.is_some() {
                parse_error(
                    opcode.position,
                    format!("{} instruction has no result", opcode.text),
                )
            } else {
                Ok(())
            }
        };
        let marker = |marker: Marker| -> Result<ParsedLine, ParseError> {
            no_result()?;
            Ok(ParsedLine::Instruction(Instruction::Marker(marker)))
        };
        let retval = match opcode.text {
            "live" => {
                no_result()?;
                ParsedLine::LiveIn(self.parse_values(tokenizer)?)
            }
            "loop_merge" => {
                no_result()?;
                ParsedLine::LoopMerge(self.parse_label(tokenizer)?)
            }
            "break" | "continue" | "return" => {
                no_result()?;
                ParsedLine::Instruction(Instruction::Exit(match opcode.text {
                    "break" => NonLocalExit::Break,
                    "continue" => NonLocalExit::Continue,
                    _ => NonLocalExit::Return,
                }))
            }
            "enter_scope" => {
                let (condition, invert) = self.parse_condition(tokenizer)?;
                marker(Marker::EnterScope { condition, invert })?
            }
            "enter_alternate" => marker(Marker::EnterAlternate)?,
            "exit_scope" => marker(Marker::ExitScope)?,
            "loop_enter" => marker(Marker::LoopEnter)?,
            "loop_exit_guard" => marker(Marker::LoopExitGuard)?,
            "loop_test" => {
                let result = match result {
                    Some(result) => result,
                    None => return parse_error(opcode.position, "missing result register"),
                };
                let token = tokenizer.peek()?;
                let (condition, invert) =
                    if token.kind == TokenKind::Identifier && token.text == "never" {
                        tokenizer.get()?;
                        (LoopCondition::Never, false)
                    } else {
                        let (condition, invert) = self.parse_condition(tokenizer)?;
                        (LoopCondition::Value(condition), invert)
                    };
                ParsedLine::Instruction(Instruction::Marker(Marker::LoopTest {
                    result,
                    condition,
                    invert,
                }))
            }
            "unwind" => {
                let (position, depth) = tokenizer.get_usize(|| "missing unwind depth")?;
                let depth = match u32::try_from(depth) {
                    Ok(depth) if depth >= 1 => depth,
                    _ => return parse_error(position, "unwind depth must be at least 1"),
                };
                marker(Marker::Unwind { depth })?
            }
            "br" => {
                no_result()?;
                let target = self.parse_label(tokenizer)?;
                ParsedLine::Terminator(Terminator::Branch { target })
            }
            "br_cond" => {
                no_result()?;
                let condition = self.parse_value(tokenizer)?;
                let true_target = self.parse_label(tokenizer)?;
                let false_target = self.parse_label(tokenizer)?;
                ParsedLine::Terminator(Terminator::BranchConditional {
                    condition,
                    true_target,
                    false_target,
                })
            }
            "br_pred" => {
                no_result()?;
                let enter = self.parse_label(tokenizer)?;
                let skip = self.parse_label(tokenizer)?;
                ParsedLine::Terminator(Terminator::Predicated { enter, skip })
            }
            "loop_br" => {
                no_result()?;
                let predicate = self.parse_value(tokenizer)?;
                let body = self.parse_label(tokenizer)?;
                let exit = self.parse_label(tokenizer)?;
                ParsedLine::Terminator(Terminator::LoopBranch {
                    predicate,
                    body,
                    exit,
                })
            }
            "ret" => {
                no_result()?;
                ParsedLine::Terminator(Terminator::Return)
            }
            "open" => {
                no_result()?;
                ParsedLine::Terminator(Terminator::Open)
            }
            "not" | "never" | "function" => {
                return parse_error(opcode.position, format!("unexpected `{}`", opcode.text))
            }
            opcode_text => ParsedLine::Instruction(Instruction::Operation {
                result,
                opcode: opcode_text.into(),
                operands: self.parse_values(tokenizer)?,
            }),
        };
        let next = tokenizer.peek()?;
        match next.kind {
            TokenKind::EndOfFile | TokenKind::NewLine => Ok(retval),
            _ => parse_error(next.position, "extra tokens after instruction"),
        }
    }
    fn parse_basic_block(&mut self, tokenizer: &mut Tokenizer<'a>) -> Result<BlockId, ParseError> {
        tokenizer.skip_new_lines()?;
        let name = tokenizer.get_required_kind(TokenKind::Identifier, || "missing label")?;
        tokenizer.get_required_kind(TokenKind::Colon, || "missing ':' after label name")?;
        let label = self.label_entry(name);
        let block_id = BlockId::new(label.index);
        if label.defined {
            return parse_error(
                name.position,
                format!("label already defined: {}", name.text),
            );
        }
        label.defined = true;
        let mut block = BasicBlock::new(name.text);
        loop {
            tokenizer.skip_new_lines()?;
            if tokenizer.peek()?.kind == TokenKind::EndOfFile {
                return parse_error(
                    tokenizer.peek()?.position,
                    format!("block {} has no terminator", name.text),
                );
            }
            match self.parse_line(tokenizer)? {
                ParsedLine::Instruction(instruction) => block.instructions.push(instruction),
                ParsedLine::LiveIn(values) => {
                    for value in values {
                        block.live_in.grow(value.index() + 1);
                        block.live_in.insert(value.index());
                    }
                }
                ParsedLine::LoopMerge(merge) => block.loop_merge = Some(merge),
                ParsedLine::Terminator(terminator) => {
                    block.terminator = terminator;
                    break;
                }
            }
        }
        self.blocks[block_id.index()] = Some(block);
        Ok(block_id)
    }
    fn parse_function(
        mut self,
        tokenizer: &mut Tokenizer<'a>,
        name: &str,
        position: TextPosition,
    ) -> Result<Function, ParseError> {
        let mut entry = None;
        loop {
            tokenizer.skip_new_lines()?;
            let next = tokenizer.peek()?;
            if next.kind == TokenKind::EndOfFile
                || (next.kind == TokenKind::Identifier && next.text == "function")
            {
                break;
            }
            let block = self.parse_basic_block(tokenizer)?;
            entry.get_or_insert(block);
        }
        let entry = match entry {
            Some(entry) => entry,
            None => return parse_error(position, format!("function {} has no blocks", name)),
        };
        let mut labels: Vec<_> = self.labels.into_iter().collect();
        labels.sort_by_key(|(_, label)| label.index);
        let mut blocks = Vec::with_capacity(labels.len());
        let mut exit = None;
        for ((label_name, label), block) in labels.into_iter().zip(self.blocks) {
            let block = match block {
                Some(block) => block,
                None => {
                    return parse_error(
                        label.first_reference,
                        format!("undefined label: {}", label_name),
                    )
                }
            };
            if block.terminator == Terminator::Return {
                if exit.is_some() {
                    return parse_error(
                        label.first_reference,
                        format!("second `ret` block in function {}: {}", name, label_name),
                    );
                }
                exit = Some(BlockId::new(label.index));
            }
            blocks.push(block);
        }
        let exit = match exit {
            Some(exit) => exit,
            None => return parse_error(position, format!("function {} has no `ret` block", name)),
        };
        Function::new(name, blocks, entry, exit).or_else(|err| parse_error(position, err))
    }
}

/// parse every function in `input`
pub fn parse(input: &str) -> Result<Vec<Function>, ParseError> {
    let mut tokenizer = Tokenizer::new(input);
    let mut retval = Vec::new();
    loop {
        tokenizer.skip_new_lines()?;
        let token = tokenizer.peek()?;
        if token.kind == TokenKind::EndOfFile {
            break;
        }
        let name = if token.kind == TokenKind::Identifier && token.text == "function" {
            tokenizer.get()?;
            let name =
                tokenizer.get_required_kind(TokenKind::Identifier, || "missing function name")?;
            name.text
        } else if retval.is_empty() {
            "main"
        } else {
            return parse_error(token.position, "expected `function`");
        };
        retval.push(FunctionParser::default().parse_function(&mut tokenizer, name, token.position)?);
    }
    Ok(retval)
}

/// parse `input`, which must hold exactly one function
pub fn parse_function(input: &str) -> Result<Function, ParseError> {
    let mut functions = parse(input)?;
    if functions.len() != 1 {
        return parse_error(
            ParserInput::new(input).current_position,
            format!("expected one function, found {}", functions.len()),
        );
    }
    Ok(functions.remove(0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_blocks() {
        let function = parse_function(
            r"
# entry comes first
start:
    live %0
    %1 = fadd %0 %0
    br_cond %1 side end
end:
    ret
side:
    loop_merge end
    return
    br end
",
        )
        .unwrap();
        assert_eq!(function.name(), "main");
        let entry = &function[function.entry()];
        assert_eq!(entry.name, "start");
        assert!(entry.live_in.contains(0));
        assert_eq!(
            entry.instructions,
            [Instruction::Operation {
                result: Some(Value::new(1)),
                opcode: "fadd".into(),
                operands: vec![Value::new(0), Value::new(0)],
            }]
        );
        assert_eq!(function[function.exit()].name, "end");
        let side = function
            .iter()
            .find(|(_, block)| block.name == "side")
            .map(|(id, _)| id)
            .unwrap();
        assert_eq!(function[side].loop_merge, Some(function.exit()));
        assert_eq!(
            function[side].instructions,
            [Instruction::Exit(NonLocalExit::Return)]
        );
        assert_eq!(function.value_count(), 2);
    }

    #[test]
    fn test_parse_multiple_functions() {
        let functions = parse(
            "function a\nx:\n    ret\nfunction b\ny:\n    br z\nz:\n    ret\n",
        )
        .unwrap();
        assert_eq!(functions.len(), 2);
        assert_eq!(functions[1].name(), "b");
        assert_eq!(functions[1][functions[1].entry()].name, "y");
    }

    #[test]
    fn test_undefined_label() {
        let err = parse_function("a:\n    br nowhere\n").unwrap_err();
        assert_eq!(err.message, "undefined label: nowhere");
        assert_eq!(err.position.line_number, 2);
        assert_eq!(err.position.column(), 8);
    }

    #[test]
    fn test_duplicate_label() {
        let err = parse_function("a:\n    br a\na:\n    ret\n").unwrap_err();
        assert_eq!(err.message, "label already defined: a");
    }

    #[test]
    fn test_two_exits() {
        let err = parse_function("a:\n    br_cond %0 b c\nb:\n    ret\nc:\n    ret\n")
            .unwrap_err();
        assert!(err.message.starts_with("second `ret` block"));
    }

    #[test]
    fn test_bad_unwind_depth() {
        let err = parse_function("a:\n    unwind 0\n    ret\n").unwrap_err();
        assert_eq!(err.message, "unwind depth must be at least 1");
    }

    #[test]
    fn test_extra_tokens() {
        let err = parse_function("a:\n    ret a\n").unwrap_err();
        assert_eq!(err.message, "extra tokens after instruction");
    }
}
