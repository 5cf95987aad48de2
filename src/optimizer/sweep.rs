//! Degree reduction and dead-code sweeping.
//!
//! Two reducers drive all deletion, both running explicit stacks so deep
//! control-flow graphs and long value chains cannot overflow the call
//! stack, and both idempotent once a degree has reached zero.
//!
//! - [`Optimizer::reduce_out`] propagates value death backward through the
//!   data-flow graph: an instruction whose last consumer disappears is
//!   deleted, releasing its own operands in turn.
//! - [`Optimizer::reduce_in`] propagates unreachability forward through the
//!   control-flow graph: a label losing its last incoming edge takes its
//!   whole block down, releasing the block's data operands and recursing
//!   into its successors.

use smallvec::SmallVec;

use crate::spirv::{self, Opcode, OperandBuf};

use super::{Optimizer, TOMBSTONE};

impl Optimizer<'_> {
    /// Releases one consumer of `instruction`'s result. At zero consumers
    /// the instruction is deleted and every id it references is released,
    /// cascading through the stack.
    ///
    /// Function headers, parameters, and labels are never deleted here:
    /// labels die only through [`Optimizer::reduce_in`], and function
    /// scaffolding outlives its callers so the surviving structure stays
    /// well formed.
    pub(super) fn reduce_out(&mut self, instruction: u32) {
        self.out_stack.push(instruction);
        while let Some(index) = self.out_stack.pop() {
            let slot = index as usize;
            if self.out_degree[slot] == 0 {
                continue;
            }
            self.out_degree[slot] -= 1;
            if self.out_degree[slot] > 0 {
                continue;
            }

            let offset = self.shader.offset(index);
            let leading = self.words[offset];
            if leading == TOMBSTONE {
                continue;
            }
            let (raw, word_count) = spirv::unpack(leading);
            let Some(op) = Opcode::from_u16(raw) else {
                continue;
            };
            if matches!(
                op,
                Opcode::Function | Opcode::FunctionParameter | Opcode::Label
            ) {
                continue;
            }

            self.words[offset] = TOMBSTONE;

            if op.has_result_type() {
                if let Some(producer) = self.shader.producer(self.words[offset + 1]) {
                    self.out_stack.push(producer);
                }
            }
            let mut operands = OperandBuf::new();
            spirv::collect_id_operands(
                op,
                &self.words[offset..offset + word_count as usize],
                &mut operands,
            );
            for &id in &operands {
                if id == TOMBSTONE {
                    continue;
                }
                if let Some(producer) = self.shader.producer(id) {
                    self.out_stack.push(producer);
                }
            }
        }
    }

    /// Releases one incoming control edge of the block labeled `label_id`,
    /// where the edge originates in the block labeled `from_id`.
    ///
    /// While the block stays reachable, phi pairs naming the vanished
    /// predecessor are nulled in place (compaction repacks them later).
    /// When the last edge goes, the whole block is swept: every
    /// instruction is deleted, data operands are released through
    /// [`Optimizer::reduce_out`], and the terminator's and merges' label
    /// operands recurse into their successors.
    pub(super) fn reduce_in(&mut self, label_id: u32, from_id: u32) {
        self.in_stack.push((label_id, from_id));
        while let Some((label_id, from_id)) = self.in_stack.pop() {
            let Some(label) = self.shader.producer(label_id) else {
                continue;
            };
            let slot = label as usize;
            if self.in_degree[slot] == 0 {
                continue;
            }
            self.in_degree[slot] -= 1;
            if self.in_degree[slot] > 0 {
                // A block that still branches here after one of its edges
                // was released remains a predecessor and keeps its phi
                // operands: a folded conditional whose two targets were
                // the same label, or a released merge hint whose block
                // reconverges here anyway.
                let still_branching = self.shader.producer(from_id).is_some_and(|from| {
                    self.words[self.shader.offset(from)] != TOMBSTONE
                        && self.branches_to(from, label_id)
                });
                if !still_branching {
                    self.null_phi_pairs(label, from_id);
                }
            } else {
                self.sweep_block(label);
            }
        }
    }

    /// Nulls the `(value, label)` pairs naming `from_id` in every phi at
    /// the head of the block starting at `label`, releasing the dropped
    /// values immediately. The pair words become tombstones; compaction
    /// drops them later without touching degrees again.
    fn null_phi_pairs(&mut self, label: u32, from_id: u32) {
        let count = self.shader.instruction_count() as u32;
        let mut index = label + 1;
        while index < count {
            let offset = self.shader.offset(index);
            let leading = self.words[offset];
            index += 1;
            if leading == TOMBSTONE {
                continue;
            }
            let (raw, word_count) = spirv::unpack(leading);
            if raw == Opcode::Line as u16 || raw == Opcode::NoLine as u16 {
                continue;
            }
            if raw != Opcode::Phi as u16 {
                break;
            }
            let mut pair = 3;
            while pair + 1 < word_count as usize {
                if self.words[offset + pair + 1] == from_id
                    && self.words[offset + pair] != TOMBSTONE
                {
                    let value = self.words[offset + pair];
                    self.words[offset + pair] = TOMBSTONE;
                    self.words[offset + pair + 1] = TOMBSTONE;
                    if let Some(producer) = self.shader.producer(value) {
                        self.reduce_out(producer);
                    }
                }
                pair += 2;
            }
        }
    }

    /// Deletes every instruction of an unreachable block and releases what
    /// it referenced. Successor edges are pushed, not recursed.
    fn sweep_block(&mut self, label: u32) {
        let label_offset = self.shader.offset(label);
        if self.words[label_offset] == TOMBSTONE {
            return;
        }
        let dying_id = self.words[label_offset + 1];
        let count = self.shader.instruction_count() as u32;
        let mut operands = OperandBuf::new();
        let mut index = label;
        while index < count {
            let offset = self.shader.offset(index);
            let leading = self.words[offset];
            index += 1;
            if leading == TOMBSTONE {
                continue;
            }
            let (raw, word_count) = spirv::unpack(leading);
            let Some(op) = Opcode::from_u16(raw) else {
                continue;
            };
            self.words[offset] = TOMBSTONE;

            let type_producer = if op.has_result_type() {
                self.shader.producer(self.words[offset + 1])
            } else {
                None
            };
            if let Some(producer) = type_producer {
                self.reduce_out(producer);
            }

            if !op.is_metadata() {
                operands.clear();
                spirv::collect_id_operands(
                    op,
                    &self.words[offset..offset + word_count as usize],
                    &mut operands,
                );
                for position in 0..operands.len() {
                    let id = operands[position];
                    if id == TOMBSTONE {
                        continue;
                    }
                    if let Some(producer) = self.shader.producer(id) {
                        self.reduce_out(producer);
                    }
                }
            }

            // Control edges out of the dying block: the terminator's
            // targets and any merge hints. Each recorded edge is released
            // exactly once.
            operands.clear();
            spirv::collect_label_operands(
                op,
                &self.words[offset..offset + word_count as usize],
                &mut operands,
            );
            for position in 0..operands.len() {
                self.in_stack.push((operands[position], dying_id));
            }

            if op.is_terminator() {
                break;
            }
        }
    }

    /// Repacks a phi in place: pairs whose predecessor was deleted, whose
    /// predecessor no longer branches here, or which were nulled earlier
    /// are removed, the survivors are packed, and the word count is
    /// updated. Values dropped *here* are released; nulled pairs were
    /// already settled by [`Optimizer::reduce_in`].
    pub(super) fn compact_phi(&mut self, index: u32) {
        let offset = self.shader.offset(index);
        let leading = self.words[offset];
        if leading == TOMBSTONE {
            return;
        }
        let (_, word_count) = spirv::unpack(leading);
        let word_count = word_count as usize;
        let Some(enclosing) = self.enclosing_label_id(index) else {
            return;
        };

        let mut kept: SmallVec<[(u32, u32); 8]> = SmallVec::new();
        let mut dropped: SmallVec<[u32; 4]> = SmallVec::new();
        let mut pair = 3;
        while pair + 1 < word_count {
            let value = self.words[offset + pair];
            let label_id = self.words[offset + pair + 1];
            pair += 2;
            if value == TOMBSTONE {
                continue;
            }
            let Some(label) = self.shader.producer(label_id) else {
                dropped.push(value);
                continue;
            };
            if self.words[self.shader.offset(label)] == TOMBSTONE
                || !self.branches_to(label, enclosing)
            {
                dropped.push(value);
                continue;
            }
            kept.push((value, label_id));
        }

        let new_count = 3 + 2 * kept.len();
        if new_count == word_count {
            return;
        }
        for (position, &(value, label_id)) in kept.iter().enumerate() {
            self.words[offset + 3 + 2 * position] = value;
            self.words[offset + 4 + 2 * position] = label_id;
        }
        for word in offset + new_count..offset + word_count {
            self.words[word] = TOMBSTONE;
        }
        self.words[offset] = ((new_count as u32) << 16) | (leading & 0xFFFF);
        for &value in &dropped {
            if let Some(producer) = self.shader.producer(value) {
                self.reduce_out(producer);
            }
        }
    }

    /// The result id of the label of the block containing `index`, found
    /// by scanning backward over the working copy.
    pub(super) fn enclosing_label_id(&self, index: u32) -> Option<u32> {
        let mut current = index;
        while current > 0 {
            current -= 1;
            let offset = self.shader.offset(current);
            let leading = self.words[offset];
            if leading == TOMBSTONE {
                continue;
            }
            let (raw, _) = spirv::unpack(leading);
            if raw == Opcode::Label as u16 {
                return Some(self.words[offset + 1]);
            }
        }
        None
    }

    /// Whether the (live) terminator of the block starting at `label`
    /// still targets `enclosing`. A folded predecessor keeps only its
    /// winning edge, which is exactly what this observes.
    fn branches_to(&self, label: u32, enclosing: u32) -> bool {
        let count = self.shader.instruction_count() as u32;
        let mut index = label;
        while index < count {
            let offset = self.shader.offset(index);
            let leading = self.words[offset];
            index += 1;
            if leading == TOMBSTONE {
                continue;
            }
            let (raw, word_count) = spirv::unpack(leading);
            let Some(op) = Opcode::from_u16(raw) else {
                continue;
            };
            if !op.is_terminator() {
                continue;
            }
            let mut labels = OperandBuf::new();
            spirv::collect_label_operands(
                op,
                &self.words[offset..offset + word_count as usize],
                &mut labels,
            );
            return labels.contains(&enclosing);
        }
        false
    }
}
