//! First pass: frame instructions, register results, validate block
//! structure, and classify the instructions later passes revisit.

use crate::{
    spirv::{self, Opcode},
    Error, Result,
};

use super::{Instruction, IntConstant, Shader, SpecConstant, SpecSlot, NIL};

/// Ceiling on how far the header's id bound may exceed the module size.
/// Every produced id needs at least two words of instruction, so a bound
/// far beyond the word count is garbage; refusing it keeps the result
/// table allocation proportional to the input.
const ID_BOUND_SLACK: u64 = 64;

impl Shader {
    pub(super) fn decode(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.len() < spirv::HEADER_WORDS * 4 {
            return Err(Error::TooSmall);
        }
        if bytes.len() % 4 != 0 {
            return Err(Error::MalformedWordCount(0));
        }

        let words: Vec<u32> = bytes
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();

        if words[0] != spirv::MAGIC {
            return Err(Error::BadMagic(words[0]));
        }
        if words[1] > spirv::MAX_VERSION {
            return Err(Error::UnsupportedVersion(words[1]));
        }

        let id_bound = words[spirv::ID_BOUND_WORD];
        if u64::from(id_bound) > words.len() as u64 * 4 + ID_BOUND_SLACK {
            return Err(Error::MalformedWordCount(spirv::ID_BOUND_WORD as u32));
        }
        self.results = vec![NIL; id_bound as usize];

        let mut offset = spirv::HEADER_WORDS;
        let mut in_block = false;
        while offset < words.len() {
            let (raw, word_count) = spirv::unpack(words[offset]);
            if word_count == 0 {
                return Err(Error::MalformedWordCount(offset as u32));
            }
            let end = offset + word_count as usize;
            if end > words.len() {
                return Err(Error::MalformedWordCount(offset as u32));
            }
            let op = Opcode::from_u16(raw).ok_or(Error::UnsupportedOpcode(raw))?;
            let index = self.instructions.len() as u32;

            if let Some(result_word) = op.result_word() {
                if word_count as usize <= result_word {
                    return Err(Error::MalformedWordCount(offset as u32));
                }
                let id = words[offset + result_word];
                if id >= id_bound {
                    return Err(Error::UndefinedId(id));
                }
                if self.results[id as usize] != NIL {
                    return Err(Error::DuplicateResultId(id));
                }
                self.results[id as usize] = index;
            }

            match op {
                Opcode::Label => {
                    if in_block {
                        return Err(Error::MalformedBlock(raw));
                    }
                    in_block = true;
                }
                Opcode::Phi => {
                    if !in_block {
                        return Err(Error::MalformedBlock(raw));
                    }
                    self.phis.push(index);
                }
                Opcode::Function | Opcode::FunctionEnd => {
                    if in_block {
                        return Err(Error::MalformedBlock(raw));
                    }
                }
                Opcode::Decorate | Opcode::MemberDecorate => self.decorations.push(index),
                Opcode::Name | Opcode::MemberName => self.debug_names.push(index),
                Opcode::Constant => {
                    self.note_default_int(&words, offset, word_count, index);
                }
                terminator if terminator.is_terminator() => {
                    if !in_block {
                        return Err(Error::MalformedBlock(raw));
                    }
                    in_block = false;
                }
                _ => {}
            }

            self.instructions.push(Instruction {
                word_index: offset as u32,
                edges: NIL,
            });
            offset = end;
        }

        if in_block {
            return Err(Error::MalformedBlock(Opcode::Label as u16));
        }

        self.words = words;
        Ok(())
    }

    /// Remembers the first `OpConstant` whose type is a 32-bit `OpTypeInt`;
    /// a folded switch reuses it as the dummy selector of its rewritten
    /// form.
    fn note_default_int(&mut self, words: &[u32], offset: usize, word_count: u32, index: u32) {
        if self.default_int.is_some() || word_count != 4 {
            return;
        }
        let Some(type_instruction) = self.producer(words[offset + 1]) else {
            // An undefined type id is reported by the graph pass.
            return;
        };
        let type_offset = self.instructions[type_instruction as usize].word_index as usize;
        let (type_raw, type_words) = spirv::unpack(words[type_offset]);
        if type_raw == Opcode::TypeInt as u16 && type_words >= 4 && words[type_offset + 2] == 32 {
            self.default_int = Some(IntConstant {
                instruction: index,
                result_id: words[offset + 2],
            });
        }
    }

    /// Second half of decoding: walk the recorded decorations and build the
    /// specialization table. Runs after all results are registered because
    /// annotations precede the constants they target in module layout.
    pub(super) fn process_decorations(&mut self) -> Result<()> {
        for position in 0..self.decorations.len() {
            let decoration = self.decorations[position];
            let (spec_id, constant, values) = {
                let words = &self.words;
                let offset = self.offset(decoration);
                let (raw, word_count) = spirv::unpack(words[offset]);
                if raw != Opcode::Decorate as u16
                    || word_count < 4
                    || words[offset + 2] != spirv::DECORATION_SPEC_ID
                {
                    continue;
                }

                let target = words[offset + 1];
                let spec_id = words[offset + 3];
                let constant = self.producer_or_err(target)?;
                let constant_offset = self.offset(constant);
                let (constant_raw, constant_words) = spirv::unpack(words[constant_offset]);
                let values = match Opcode::from_u16(constant_raw) {
                    Some(Opcode::SpecConstantTrue) => vec![1],
                    Some(Opcode::SpecConstantFalse) => vec![0],
                    Some(Opcode::SpecConstant) if constant_words >= 4 => {
                        words[constant_offset + 3..constant_offset + constant_words as usize]
                            .to_vec()
                    }
                    _ => {
                        return Err(Error::InvalidSpecTarget {
                            spec_id,
                            opcode: constant_raw,
                        })
                    }
                };
                (spec_id, constant, values)
            };

            // A repeated SpecId keeps the last decoration, matching the
            // module's own override order.
            match self.spec_slots.entry(spec_id) {
                std::collections::hash_map::Entry::Occupied(mut entry) => {
                    let slot = entry.get_mut();
                    slot.constant = constant;
                    slot.decoration = decoration;
                    self.spec_constants[slot.index as usize].values = values;
                }
                std::collections::hash_map::Entry::Vacant(entry) => {
                    entry.insert(SpecSlot {
                        constant,
                        decoration,
                        index: self.spec_constants.len() as u32,
                    });
                    self.spec_constants.push(SpecConstant::new(spec_id, values));
                }
            }
        }
        Ok(())
    }
}
