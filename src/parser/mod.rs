//! Single-pass parser and bytecode emitter.
//!
//! There is no AST: `expr` and `stmt` drive a recursive-descent parser that
//! both produces and consumes [`node::Node`] operands, emitting bytecode
//! into the current function as soon as an operation's shape is known.

mod expr;
pub mod jumplist;
pub mod node;
mod scope;
mod stmt;

use crate::bytecode::{Instruction, Opcode};
use crate::error::{Error, Location, Result};
use crate::lexer::{Lexer, Token, TokenKind};
use crate::vm::{FuncId, PkgId, Vm};
use node::Node;
use scope::{FuncState, Local};

/// Parse `source` as the body of `pkg`'s `main` function.
///
/// This is the single long-jump-style "error guard" the design calls for,
/// realized as ordinary `?`-propagation: any failure below unwinds this
/// call stack and returns here without special-casing. The VM's function
/// and constant tables are **not** rolled back on failure — see the design
/// notes on that open question.
pub fn parse(vm: &mut Vm, pkg: PkgId, file: Option<String>, source: &[u8]) -> Result<()> {
    let main = vm.new_function(pkg, 0);
    vm.set_package_main(pkg, main);

    let mut parser = Parser::new(vm, file, source, main)?;
    let result = parser.block_statements_until_eof();
    if let Err(ref e) = result {
        vm.set_last_error(e.clone());
    }
    result?;
    parser.finish_function();
    Ok(())
}

struct Parser<'a> {
    lexer: Lexer<'a>,
    cur: Token,
    vm: &'a mut Vm,
    locals: Vec<Local>,
    scopes: Vec<FuncState>,
    file: Option<String>,
}

impl<'a> Parser<'a> {
    fn new(vm: &'a mut Vm, file: Option<String>, source: &'a [u8], main: FuncId) -> Result<Self> {
        let mut lexer = Lexer::new(source, file.clone());
        let cur = lexer.next_token()?;
        let max_locals = vm.config().max_locals_per_function;
        Ok(Self {
            lexer,
            cur,
            vm,
            locals: Vec::new(),
            scopes: vec![FuncState::new(main, 0, max_locals)],
            file,
        })
    }

    fn loc(&self) -> Location {
        let loc = Location::at_line(self.cur.line);
        match &self.file {
            Some(f) => loc.with_file(f.clone()),
            None => loc,
        }
    }

    fn advance(&mut self) -> Result<Token> {
        let prev = self.cur;
        self.cur = self.lexer.next_token()?;
        Ok(prev)
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.cur.kind == kind
    }

    fn eat(&mut self, kind: TokenKind) -> Result<bool> {
        if self.check(kind) {
            self.advance()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> Result<Token> {
        if self.check(kind) {
            self.advance()
        } else {
            Err(Error::parse(format!("expected {what}"), self.loc()))
        }
    }

    fn code(&mut self) -> &mut Vec<Instruction> {
        let func = self.scopes.last().unwrap().func;
        self.vm.function_mut(func).code_mut()
    }

    fn pc(&mut self) -> usize {
        self.code().len()
    }

    fn emit_abc(&mut self, op: Opcode, a: u8, b: u8, c: u8) -> usize {
        let pc = self.pc();
        self.code().push(Instruction::abc(op, a, b, c));
        pc
    }

    fn emit_ad(&mut self, op: Opcode, a: u8, d: u16) -> usize {
        let pc = self.pc();
        self.code().push(Instruction::ad(op, a, d));
        pc
    }

    fn emit_j(&mut self, op: Opcode, offset: i32) -> usize {
        let pc = self.pc();
        self.code().push(Instruction::j(op, offset));
        pc
    }

    fn alloc_slot(&mut self) -> Result<u8> {
        let at = self.loc();
        self.scopes.last_mut().unwrap().alloc_slot(at)
    }

    fn free_slot(&mut self, slot: u8) {
        self.scopes.last_mut().unwrap().free_slot(slot);
    }

    fn next_slot(&self) -> u8 {
        self.scopes.last().unwrap().next_slot()
    }

    fn intern_num(&mut self, n: f64) -> Result<u16> {
        let at = self.loc();
        self.vm.intern_constant(n, at)
    }

    /// Push a new function scope for a `fn` definition, nested under the
    /// current one.
    fn push_function_scope(&mut self) -> FuncId {
        let pkg = PkgId(self.vm.function(self.scopes.last().unwrap().func).package());
        let func = self.vm.new_function(pkg, 0);
        let max_locals = self.vm.config().max_locals_per_function;
        self.scopes.push(FuncState::new(func, self.locals.len(), max_locals));
        func
    }

    fn pop_function_scope(&mut self) {
        self.scopes.pop();
    }

    /// Every function's bytecode ends with an implicit `RET` carrying no
    /// value, covering the fall-off-the-end case (an explicit `RET` emitted
    /// for a `return`-less body still needs this terminator per §3: "a
    /// terminating RET last").
    fn finish_function(&mut self) {
        self.emit_abc(Opcode::RET, 0, 0, 0);
    }
}
