//! Jump-list back-patching.
//!
//! A jump list is a chain of not-yet-patched `JMP` instructions threaded
//! through their own offset fields: the head is the most recently emitted
//! jump, and each link's offset field temporarily holds a relative pointer
//! to the previous element rather than a real target. On the Rust side a
//! list is just `Option<usize>` — the pc of its head, or `None` for the
//! empty list — which is exactly the public surface `crate::parser::expr`
//! and `crate::parser::stmt` operate on.

use crate::bytecode::{Instruction, NO_JUMP};

fn link_offset(from_pc: usize, to_pc: Option<usize>) -> i32 {
    match to_pc {
        Some(to) => to as i32 - (from_pc as i32 + 1),
        None => NO_JUMP,
    }
}

fn link_target(from_pc: usize, offset: i32) -> Option<usize> {
    if offset == NO_JUMP {
        None
    } else {
        Some((from_pc as i32 + 1 + offset) as usize)
    }
}

/// The next element threaded after `pc` in whatever list it belongs to.
pub fn get_next(code: &[Instruction], pc: usize) -> Option<usize> {
    link_target(pc, code[pc].jump_offset())
}

fn set_next(code: &mut [Instruction], pc: usize, next: Option<usize>) {
    code[pc].set_jump_offset(link_offset(pc, next));
}

/// Prepend `jmp_pc` to `head`, returning the new head.
pub fn append(code: &mut [Instruction], head: Option<usize>, jmp_pc: usize) -> Option<usize> {
    set_next(code, jmp_pc, head);
    Some(jmp_pc)
}

/// Walk `head`, writing each element's real jump offset to `target`. Reads
/// the next link before overwriting the current one, since patching
/// destroys the thread.
pub fn patch(code: &mut [Instruction], head: Option<usize>, target: usize) {
    let mut cur = head;
    while let Some(pc) = cur {
        let next = get_next(code, pc);
        code[pc].set_jump_offset(target as i32 - (pc as i32 + 1));
        cur = next;
    }
}

/// Flip the relational comparison feeding each jump in `list`, in place:
/// a jump that fired when its comparison held now fires when it doesn't.
/// Used to turn a freshly-compiled true-list into a false-list so the
/// condition's true case becomes a plain fallthrough (`Parser::goiftrue`,
/// design §4.2's inverted-condition convention).
pub fn negate_comparisons(code: &mut [Instruction], list: Option<usize>) {
    let mut cur = list;
    while let Some(pc) = cur {
        cur = get_next(code, pc);
        if let Some(cmp_pc) = pc.checked_sub(1) {
            if let Some(negated) = code[cmp_pc].opcode().negate_relational() {
                let (a, b, c) = code[cmp_pc].args_abc();
                code[cmp_pc] = Instruction::abc(negated, a, b, c);
            }
        }
    }
}

/// Concatenate two lists, returning the merged head. `a`'s elements stay
/// ahead of `b`'s; if `a` is empty, `b` becomes the whole list.
pub fn merge(code: &mut [Instruction], a: Option<usize>, b: Option<usize>) -> Option<usize> {
    match a {
        None => b,
        Some(head) => {
            if b.is_none() {
                return a;
            }
            let mut tail = head;
            while let Some(next) = get_next(code, tail) {
                tail = next;
            }
            set_next(code, tail, b);
            a
        }
    }
}
