//! Statement compilation: `let`, assignment, control flow and function
//! definitions. Each block saves and restores the enclosing scope's locals
//! and `next_slot` mark so block-local bindings disappear on exit.

use crate::bytecode::Opcode;
use crate::error::{Error, Result};
use crate::lexer::{Payload, TokenKind};

use super::jumplist;
use super::node::Node;
use super::Parser;

impl Parser<'_> {
    /// Drive the top-level "main" block: statements until end of input.
    pub(super) fn block_statements_until_eof(&mut self) -> Result<()> {
        while !self.check(TokenKind::Eof) {
            self.statement()?;
        }
        Ok(())
    }

    /// `{ stmt* }`, saving/restoring the locals mark on entry/exit.
    fn block(&mut self) -> Result<()> {
        self.expect(TokenKind::LBrace, "'{'")?;
        let mark = self.enter_block();
        while !self.check(TokenKind::RBrace) {
            self.statement()?;
        }
        self.expect(TokenKind::RBrace, "'}'")?;
        self.exit_block(mark);
        Ok(())
    }

    fn statement(&mut self) -> Result<()> {
        match self.cur.kind {
            TokenKind::Let => self.let_statement(),
            TokenKind::If => self.if_statement(),
            TokenKind::While => self.while_statement(),
            TokenKind::Loop => self.loop_statement(),
            TokenKind::Fn => self.fn_statement(),
            TokenKind::Ident => self.ident_led_statement(),
            TokenKind::Semicolon => {
                self.advance()?;
                Ok(())
            }
            _ => {
                self.expr()?;
                self.eat(TokenKind::Semicolon)?;
                Ok(())
            }
        }
    }

    fn let_statement(&mut self) -> Result<()> {
        self.advance()?; // `let`
        let at = self.loc();
        let name_tok = self.expect(TokenKind::Ident, "an identifier")?;
        let Payload::Hash(hash) = name_tok.payload else {
            unreachable!("identifier token without a hash payload")
        };
        // Shadowing a name already bound in this function scope is allowed:
        // `let` always binds a fresh slot, so an older `Local` entry for the
        // same hash just stops being the innermost match.
        self.expect(TokenKind::Assign, "'='")?;
        let value = self.expr()?;
        let (slot, is_temp) = self.discharge_to_local(value, at)?;
        let final_slot = self.bind_to_named_slot(slot, is_temp, at)?;
        self.bind_local(hash, final_slot);
        self.eat(TokenKind::Semicolon)?;
        Ok(())
    }

    /// A `let`'s value is compiled to *some* slot; if that slot isn't
    /// already the next free one (e.g. it reused an existing local via a
    /// bare assignment expression), move it to the top so `declare_local`
    /// can claim it.
    fn bind_to_named_slot(&mut self, slot: u8, is_temp: bool, _at: crate::error::Location) -> Result<u8> {
        if is_temp && slot == self.next_slot().saturating_sub(1) {
            return Ok(slot);
        }
        let top = self.next_slot();
        if slot == top {
            return Ok(slot);
        }
        let dest = self.alloc_slot()?;
        self.emit_abc(Opcode::MOV, dest, slot, 0);
        Ok(dest)
    }

    /// Assignment (`name = expr`) or augmented assignment
    /// (`name (+=|-=|*=|/=|%=) expr`), disambiguated from an expression
    /// statement by one-token lookahead after the identifier.
    fn ident_led_statement(&mut self) -> Result<()> {
        let mark = self.lexer.save();
        let saved_cur = self.cur;
        let at = self.loc();
        let name_tok = self.advance()?;
        let Payload::Hash(hash) = name_tok.payload else {
            unreachable!("identifier token without a hash payload")
        };

        let augmented = match self.cur.kind {
            TokenKind::Assign => None,
            TokenKind::PlusEq => Some(TokenKind::Plus),
            TokenKind::MinusEq => Some(TokenKind::Minus),
            TokenKind::StarEq => Some(TokenKind::Star),
            TokenKind::SlashEq => Some(TokenKind::Slash),
            TokenKind::PercentEq => {
                return Err(Error::parse("'%=' has no corresponding binary operator in this language", at));
            }
            _ => {
                // Not an assignment: rewind and parse as an expression statement.
                self.lexer.restore(mark);
                self.cur = saved_cur;
                self.expr()?;
                self.eat(TokenKind::Semicolon)?;
                return Ok(());
            }
        };

        let Some(slot) = self.resolve_local(hash) else {
            return Err(Error::parse("assignment to unknown identifier", at));
        };
        self.advance()?; // the `=` or `op=` token

        let result = if let Some(op_tok) = augmented {
            let rhs = self.expr()?;
            self.compile_augmented(op_tok, slot, rhs, at)?
        } else {
            self.expr()?
        };
        self.force_into_slot(result, slot, at)?;
        self.eat(TokenKind::Semicolon)?;
        Ok(())
    }

    fn compile_augmented(&mut self, op_tok: TokenKind, slot: u8, rhs: Node, at: crate::error::Location) -> Result<Node> {
        let op = super::expr::Arith::from_token(op_tok);
        self.compile_arith(op, Node::Local(slot), rhs, at)
    }

    /// Force `node`'s value into `slot`, reusing the instruction that
    /// already produced it (for `Reloc`) instead of emitting an extra `MOV`
    /// when possible.
    fn force_into_slot(&mut self, node: Node, slot: u8, at: crate::error::Location) -> Result<()> {
        match node {
            Node::Reloc(pc) => {
                self.code()[pc].set_a(slot);
            }
            Node::Local(s) | Node::NonReloc(s) => {
                if s != slot {
                    self.emit_abc(Opcode::MOV, slot, s, 0);
                }
            }
            Node::Num(n) => {
                let idx = self.intern_num(n)?;
                self.emit_ad(Opcode::SET_N, slot, idx);
            }
            Node::Const(idx) => {
                self.emit_ad(Opcode::SET_N, slot, idx);
            }
            Node::Prim(p) => {
                self.emit_abc(Opcode::SET_P, slot, p.code(), 0);
            }
            Node::Jmp { .. } => {
                let produced = self.discharge_jmp_to_slot(node, at)?;
                if produced != slot {
                    self.emit_abc(Opcode::MOV, slot, produced, 0);
                }
            }
        }
        Ok(())
    }

    fn if_statement(&mut self) -> Result<()> {
        self.advance()?; // `if`
        let mut end_jumps: Option<usize> = None;
        loop {
            let cond = self.expr()?;
            let cond = self.goiftrue(cond)?;
            let Node::Jmp { true_list: _, false_list } = cond else {
                unreachable!()
            };
            self.block()?;

            let has_more = self.check(TokenKind::Elseif) || self.check(TokenKind::Else);
            if has_more {
                let jmp = self.emit_j(Opcode::JMP, crate::bytecode::NO_JUMP);
                end_jumps = Some(jumplist::append(self.code(), end_jumps, jmp).unwrap());
            }
            let here = self.pc();
            jumplist::patch(self.code(), false_list, here);

            if self.eat(TokenKind::Elseif)? {
                continue;
            }
            if self.eat(TokenKind::Else)? {
                self.block()?;
            }
            break;
        }
        let here = self.pc();
        jumplist::patch(self.code(), end_jumps, here);
        Ok(())
    }

    fn while_statement(&mut self) -> Result<()> {
        self.advance()?; // `while`
        let start = self.pc();
        let cond = self.expr()?;
        let cond = self.goiftrue(cond)?;
        let Node::Jmp { true_list: _, false_list } = cond else {
            unreachable!()
        };
        self.block()?;
        let loop_pc = self.pc();
        self.emit_j(Opcode::LOOP, start as i32 - (loop_pc as i32 + 1));
        let here = self.pc();
        jumplist::patch(self.code(), false_list, here);
        Ok(())
    }

    fn loop_statement(&mut self) -> Result<()> {
        self.advance()?; // `loop`
        let start = self.pc();
        self.block()?;
        let loop_pc = self.pc();
        self.emit_j(Opcode::LOOP, start as i32 - (loop_pc as i32 + 1));
        Ok(())
    }

    fn fn_statement(&mut self) -> Result<()> {
        self.advance()?; // `fn`
        let at = self.loc();
        let name_tok = self.expect(TokenKind::Ident, "a function name")?;
        let Payload::Hash(hash) = name_tok.payload else {
            unreachable!("identifier token without a hash payload")
        };
        let func = self.compile_function_body()?;
        let slot = self.alloc_slot()?;
        self.emit_ad(Opcode::SET_F, slot, func.0 as u16);
        self.bind_local(hash, slot);
        Ok(())
    }

    /// Shared by `fn name(...) { }` and the anonymous `fn(...) { }`
    /// expression form: parses the parameter list and body into a fresh
    /// function scope and returns its index. The caller is responsible for
    /// emitting the `SET_F` that turns it into a value.
    pub(super) fn compile_function_body(&mut self) -> Result<crate::vm::FuncId> {
        self.expect(TokenKind::LParen, "'('")?;
        let mut param_hashes = Vec::new();
        if !self.check(TokenKind::RParen) {
            loop {
                let tok = self.expect(TokenKind::Ident, "a parameter name")?;
                let Payload::Hash(hash) = tok.payload else {
                    unreachable!("identifier token without a hash payload")
                };
                param_hashes.push(hash);
                if !self.eat(TokenKind::Comma)? {
                    break;
                }
            }
        }
        self.expect(TokenKind::RParen, "')'")?;

        let func = self.push_function_scope();
        let at = self.loc();
        let arity = param_hashes.len() as u8;
        for hash in param_hashes {
            self.declare_param(hash, at)?;
        }
        self.block()?;
        self.finish_function();
        self.pop_function_scope();
        self.vm.function_mut(func).set_arity(arity);
        Ok(func)
    }

    pub(super) fn compile_function_literal(&mut self) -> Result<Node> {
        self.advance()?; // `fn`
        let func = self.compile_function_body()?;
        let pc = self.emit_ad(Opcode::SET_F, 0, func.0 as u16);
        Ok(Node::Reloc(pc))
    }
}
