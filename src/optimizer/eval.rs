//! The evaluation pass: one walk over the topological order, resolving
//! results and folding terminators whose selectors became constant.

use smallvec::SmallVec;

use crate::{
    spirv::{self, Opcode},
    Error, Result,
};

use super::{
    resolution::{solve_binary, solve_unary, Resolution},
    Optimizer, TOMBSTONE,
};

impl Optimizer<'_> {
    /// Walks every instruction once in dependency order. Produced results
    /// are resolved through the constant lattice; conditional terminators
    /// with constant selectors are folded on the spot, which may delete
    /// instructions later in the walk (they are skipped by their
    /// tombstone).
    pub(super) fn evaluate(&mut self) -> Result<()> {
        for position in 0..self.shader.order.len() {
            let index = self.shader.order[position];
            let offset = self.shader.offset(index);
            let leading = self.words[offset];
            if leading == TOMBSTONE {
                continue;
            }
            let (raw, _) = spirv::unpack(leading);
            let Some(op) = Opcode::from_u16(raw) else {
                continue;
            };
            match op {
                Opcode::BranchConditional | Opcode::Switch => self.fold_terminator(index, op)?,
                _ if op.has_result() => self.resolve(index, op)?,
                _ => {}
            }
        }
        Ok(())
    }

    /// An operand's resolution. A still-`Unknown` operand whose producer is
    /// alive indicates an ordering bug and aborts the run. When the
    /// producer was deleted before its turn came, the reference can only
    /// live in an orphaned region a loop back edge kept alive; it resolves
    /// variable.
    fn operand(&self, id: u32) -> Result<Resolution> {
        match self.resolutions[id as usize] {
            Resolution::Unknown => match self.shader.producer(id) {
                Some(producer) if self.words[self.shader.offset(producer)] != TOMBSTONE => {
                    Err(Error::ResolutionOrder(id))
                }
                _ => Ok(Resolution::Variable),
            },
            resolution => Ok(resolution),
        }
    }

    fn resolve(&mut self, index: u32, op: Opcode) -> Result<()> {
        if op == Opcode::Phi {
            return self.resolve_phi(index);
        }

        let offset = self.shader.offset(index);
        let (_, word_count) = spirv::unpack(self.words[offset]);
        let word_count = word_count as usize;
        let Some(result_word) = op.result_word() else {
            return Ok(());
        };
        let result_id = self.words[offset + result_word];

        // Instructions too short for their operand layout never fold.
        let arity_ok = |needed: usize| word_count >= needed;
        let resolution = if !op.is_foldable() {
            Resolution::Variable
        } else {
            match op {
                Opcode::Constant => self.fold_scalar_constant(offset),
                Opcode::ConstantTrue => Resolution::Bool(true),
                Opcode::ConstantFalse => Resolution::Bool(false),
                // A bitcast passes its 32-bit payload through untouched.
                Opcode::Bitcast if arity_ok(4) => self.operand(self.words[offset + 3])?,
                // The condition picks an arm; the chosen arm's resolution
                // passes through even when the other arm is variable.
                Opcode::Select if arity_ok(6) => {
                    let condition = self.operand(self.words[offset + 3])?;
                    if !condition.is_constant() {
                        Resolution::Variable
                    } else {
                        let chosen = if condition.truthy() {
                            self.words[offset + 4]
                        } else {
                            self.words[offset + 5]
                        };
                        self.operand(chosen)?
                    }
                }
                Opcode::LogicalNot | Opcode::Not if arity_ok(4) => {
                    let a = self.operand(self.words[offset + 3])?;
                    if !a.is_constant() {
                        Resolution::Variable
                    } else {
                        solve_unary(op, a)
                    }
                }
                _ if arity_ok(5) && !matches!(op, Opcode::Bitcast | Opcode::Select) => {
                    let a = self.operand(self.words[offset + 3])?;
                    let b = self.operand(self.words[offset + 4])?;
                    if !a.is_constant() || !b.is_constant() {
                        Resolution::Variable
                    } else {
                        solve_binary(op, a, b)
                    }
                }
                _ => Resolution::Variable,
            }
        };
        self.resolutions[result_id as usize] = resolution;
        Ok(())
    }

    /// Compacts the phi, then resolves it: a single surviving pair takes
    /// its value's resolution, anything else is variable. A sole operand
    /// that is still unresolved sits on a loop back edge, and loops are
    /// opaque here.
    fn resolve_phi(&mut self, index: u32) -> Result<()> {
        self.compact_phi(index);
        let offset = self.shader.offset(index);
        let (_, word_count) = spirv::unpack(self.words[offset]);
        let result_id = self.words[offset + 2];
        let resolution = if word_count == 5 {
            match self.resolutions[self.words[offset + 3] as usize] {
                Resolution::Unknown => Resolution::Variable,
                resolution => resolution,
            }
        } else {
            Resolution::Variable
        };
        self.resolutions[result_id as usize] = resolution;
        Ok(())
    }

    /// `OpConstant` resolves when its type is a 32-bit integer; any other
    /// constant type stays variable (floats are never folded).
    fn fold_scalar_constant(&self, offset: usize) -> Resolution {
        let (_, word_count) = spirv::unpack(self.words[offset]);
        if word_count != 4 {
            return Resolution::Variable;
        }
        let Some(type_instruction) = self.shader.producer(self.words[offset + 1]) else {
            return Resolution::Variable;
        };
        let type_offset = self.shader.offset(type_instruction);
        let (type_raw, type_words) = spirv::unpack(self.words[type_offset]);
        if type_raw != Opcode::TypeInt as u16 || type_words < 4 || self.words[type_offset + 2] != 32
        {
            return Resolution::Variable;
        }
        let payload = self.words[offset + 3];
        if self.words[type_offset + 3] != 0 {
            Resolution::Int(payload as i32)
        } else {
            Resolution::Uint(payload)
        }
    }

    /// Folds `OpBranchConditional`/`OpSwitch` once the selector is known.
    ///
    /// The terminator is rewritten *before* any edge is released so that
    /// the phi handling in the sweep observes the block's final targets.
    fn fold_terminator(&mut self, index: u32, op: Opcode) -> Result<()> {
        let offset = self.shader.offset(index);
        let (_, word_count) = spirv::unpack(self.words[offset]);
        let word_count = word_count as usize;
        let minimum = if op == Opcode::BranchConditional { 4 } else { 3 };
        if word_count < minimum {
            return Ok(());
        }
        let selector = self.words[offset + 1];
        let resolution = self.operand(selector)?;
        if !resolution.is_constant() {
            return Ok(());
        }
        let Some(from_id) = self.enclosing_label_id(index) else {
            return Ok(());
        };

        match op {
            Opcode::BranchConditional => {
                let true_label = self.words[offset + 2];
                let false_label = self.words[offset + 3];
                let (winner, loser) = if resolution.truthy() {
                    (true_label, false_label)
                } else {
                    (false_label, true_label)
                };

                // A preceding selection merge is erased: its slot becomes
                // the unconditional branch and the merge edge is released.
                let mut merge_label = None;
                let mut rewrite_at = offset;
                let mut rewrite_len = word_count;
                if index > 0 {
                    let previous = self.shader.offset(index - 1);
                    let leading = self.words[previous];
                    if leading != TOMBSTONE
                        && spirv::unpack(leading).0 == Opcode::SelectionMerge as u16
                    {
                        merge_label = Some(self.words[previous + 1]);
                        rewrite_at = previous;
                        rewrite_len = spirv::unpack(leading).1 as usize;
                    }
                }

                self.words[rewrite_at] = spirv::pack(Opcode::Branch, 2);
                self.words[rewrite_at + 1] = winner;
                for word in rewrite_at + 2..rewrite_at + rewrite_len {
                    self.words[word] = TOMBSTONE;
                }
                if rewrite_at != offset {
                    for word in offset..offset + word_count {
                        self.words[word] = TOMBSTONE;
                    }
                }

                self.reduce_in(loser, from_id);
                if let Some(merge) = merge_label {
                    self.reduce_in(merge, from_id);
                }
            }
            Opcode::Switch => {
                // The rewritten form keeps its structural role as a
                // switch, so a 32-bit integer constant must exist to act
                // as the dummy selector.
                let Some(dummy) = self.shader.default_int else {
                    return Err(Error::SwitchRewriteImpossible);
                };
                let default_label = self.words[offset + 2];
                let value = resolution.bits();
                let mut winner = None;
                let mut losers: SmallVec<[u32; 8]> = SmallVec::new();
                let mut pair = 3;
                while pair + 1 < word_count {
                    let label = self.words[offset + pair + 1];
                    if winner.is_none() && self.words[offset + pair] == value {
                        winner = Some(label);
                    } else {
                        losers.push(label);
                    }
                    pair += 2;
                }
                let winner = match winner {
                    Some(label) => {
                        losers.push(default_label);
                        label
                    }
                    None => default_label,
                };

                self.words[offset] = spirv::pack(Opcode::Switch, 3);
                self.words[offset + 1] = dummy.result_id;
                self.words[offset + 2] = winner;
                for word in offset + 3..offset + word_count {
                    self.words[word] = TOMBSTONE;
                }
                // The rewrite adds a reference to the dummy constant;
                // account for it before anything else can sweep it.
                self.out_degree[dummy.instruction as usize] += 1;

                for position in 0..losers.len() {
                    self.reduce_in(losers[position], from_id);
                }
            }
            _ => return Ok(()),
        }

        // The folded terminator no longer reads its selector.
        if let Some(producer) = self.shader.producer(selector) {
            self.reduce_out(producer);
        }
        Ok(())
    }
}
