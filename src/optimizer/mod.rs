//! The per-specialization half of the library.
//!
//! An [`Optimizer`] borrows a parsed [`Shader`] and can run any number of
//! times against it, each run with different constant values. A run clones
//! the word buffer and the degree vectors, patches the requested
//! specialization constants in place, evaluates the module once in
//! topological order, and serializes what survived. All deletion is
//! logical (a deleted instruction's leading word becomes [`TOMBSTONE`] in
//! the working copy), so the analysis structures never need rebuilding.
//!
//! Scratch buffers live on the `Optimizer` and are cleared at the start of
//! every run, which keeps repeated specialization of the same shader free
//! of allocation churn.

mod eval;
mod resolution;
mod sweep;

use bitflags::bitflags;

use crate::{
    analyzer::{Shader, SpecConstant},
    spirv::{self, Opcode},
    Error, Result,
};

use resolution::Resolution;

/// Leading word of a logically deleted instruction in the working copy.
///
/// No valid instruction can carry this value: its opcode half does not
/// decode to a supported opcode, so parsing would have rejected it.
pub(crate) const TOMBSTONE: u32 = u32::MAX;

bitflags! {
    /// Options for a single optimization run.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct OptimizerFlags: u32 {
        /// Strip `OpSource`, `OpName`, and `OpMemberName` from the output.
        const STRIP_DEBUG = 1;
    }
}

/// Specializes a [`Shader`], producing optimized SPIR-V modules.
///
/// Create one per thread with [`Optimizer::new`] and call
/// [`Optimizer::run`] for each set of constant values. The borrowed shader
/// is never modified, so several optimizers can share it concurrently.
#[derive(Debug)]
pub struct Optimizer<'a> {
    shader: &'a Shader,
    /// Working copy of the module words, rewritten and tombstoned in place.
    words: Vec<u32>,
    /// Working copy of the per-instruction incoming-edge counts.
    in_degree: Vec<u32>,
    /// Working copy of the per-instruction outgoing-edge counts.
    out_degree: Vec<u32>,
    /// Per-result lattice state, indexed by result id.
    resolutions: Vec<Resolution>,
    /// Worklist for backward value-death propagation.
    out_stack: Vec<u32>,
    /// Worklist for forward unreachability propagation:
    /// `(target label id, origin label id)`.
    in_stack: Vec<(u32, u32)>,
}

impl<'a> Optimizer<'a> {
    /// Creates an optimizer over a parsed shader.
    #[must_use]
    pub fn new(shader: &'a Shader) -> Self {
        Self {
            shader,
            words: Vec::new(),
            in_degree: Vec::new(),
            out_degree: Vec::new(),
            resolutions: Vec::new(),
            out_stack: Vec::new(),
            in_stack: Vec::new(),
        }
    }

    /// Runs one specialization and returns the optimized module bytes.
    ///
    /// `spec_constants` entries whose id does not appear in the module are
    /// ignored, so a caller may pass a superset. With an empty slice and
    /// stripping disabled, the output is the input module unchanged except
    /// for folds that were already possible.
    ///
    /// # Errors
    ///
    /// [`Error::SpecValueArity`] when a value count does not match the
    /// target constant, [`Error::SwitchRewriteImpossible`] when a switch
    /// must fold but no integer constant exists to anchor the rewrite, and
    /// [`Error::ResolutionOrder`] on internal ordering bugs.
    pub fn run(
        &mut self,
        spec_constants: &[SpecConstant],
        flags: OptimizerFlags,
    ) -> Result<Vec<u8>> {
        self.reset();
        self.patch(spec_constants)?;
        self.evaluate()?;
        self.recompact_phis();
        self.clean_annotations();
        Ok(self.serialize(flags))
    }

    fn reset(&mut self) {
        self.words.clear();
        self.words.extend_from_slice(&self.shader.words);
        self.in_degree.clear();
        self.in_degree.extend_from_slice(&self.shader.in_degree);
        self.out_degree.clear();
        self.out_degree.extend_from_slice(&self.shader.out_degree);
        self.resolutions.clear();
        self.resolutions
            .resize(self.shader.results.len(), Resolution::Unknown);
        self.out_stack.clear();
        self.in_stack.clear();
    }

    /// Rewrites the requested specialization constants into plain
    /// constants and deletes their `SpecId` decorations. The word-count
    /// half of the leading word is preserved by the rewrite.
    fn patch(&mut self, spec_constants: &[SpecConstant]) -> Result<()> {
        for request in spec_constants {
            let Some(slot) = self.shader.spec_slots.get(&request.spec_id) else {
                continue;
            };
            let expected = self.shader.spec_constants[slot.index as usize].values.len();
            if request.values.len() != expected {
                return Err(Error::SpecValueArity {
                    spec_id: request.spec_id,
                    expected,
                    got: request.values.len(),
                });
            }

            let offset = self.shader.offset(slot.constant);
            let (raw, _) = spirv::unpack(self.words[offset]);
            match Opcode::from_u16(raw) {
                Some(Opcode::SpecConstantTrue | Opcode::SpecConstantFalse) => {
                    let opcode = if request.values[0] != 0 {
                        Opcode::ConstantTrue
                    } else {
                        Opcode::ConstantFalse
                    };
                    self.words[offset] = (self.words[offset] & 0xFFFF_0000) | opcode as u32;
                }
                Some(Opcode::SpecConstant) => {
                    self.words[offset] =
                        (self.words[offset] & 0xFFFF_0000) | Opcode::Constant as u32;
                    self.words[offset + 3..offset + 3 + expected]
                        .copy_from_slice(&request.values);
                }
                _ => {
                    return Err(Error::InvalidSpecTarget {
                        spec_id: request.spec_id,
                        opcode: raw,
                    })
                }
            }

            self.words[self.shader.offset(slot.decoration)] = TOMBSTONE;
        }
        Ok(())
    }

    /// Re-runs phi compaction over the whole phi list: evaluation order can
    /// leave stale pairs when a predecessor died after its phi was first
    /// compacted.
    fn recompact_phis(&mut self) {
        for position in 0..self.shader.phis.len() {
            self.compact_phi(self.shader.phis[position]);
        }
    }

    /// Deletes decorations and debug names whose target no longer exists,
    /// so the output stays closed under id references. Patched `SpecId`
    /// decorations are already tombstoned by this point.
    fn clean_annotations(&mut self) {
        let shader = self.shader;
        for list in [&shader.decorations, &shader.debug_names] {
            for &annotation in list {
                let offset = self.shader.offset(annotation);
                if self.words[offset] == TOMBSTONE {
                    continue;
                }
                let target = self.words[offset + 1];
                let alive = self
                    .shader
                    .producer(target)
                    .is_some_and(|producer| self.words[self.shader.offset(producer)] != TOMBSTONE);
                if !alive {
                    self.words[offset] = TOMBSTONE;
                }
            }
        }
    }

    /// Compacts the working copy into output bytes: header verbatim, then
    /// every surviving instruction in decode order.
    fn serialize(&self, flags: OptimizerFlags) -> Vec<u8> {
        let mut output: Vec<u32> = Vec::with_capacity(self.words.len());
        output.extend_from_slice(&self.words[..spirv::HEADER_WORDS]);
        let strip = flags.contains(OptimizerFlags::STRIP_DEBUG);
        for instruction in &self.shader.instructions {
            let offset = instruction.word_index as usize;
            let leading = self.words[offset];
            if leading == TOMBSTONE {
                continue;
            }
            let (raw, word_count) = spirv::unpack(leading);
            if strip {
                if let Some(op) = Opcode::from_u16(raw) {
                    if op.is_debug_strip() {
                        continue;
                    }
                }
            }
            output.extend_from_slice(&self.words[offset..offset + word_count as usize]);
        }
        output
            .into_iter()
            .flat_map(u32::to_le_bytes)
            .collect()
    }
}

/// One-shot convenience: parse and specialize in a single call.
///
/// Prefer [`Shader::parse`] plus a reused [`Optimizer`] when producing many
/// variants of the same module; this helper re-parses every time.
///
/// # Errors
///
/// Everything [`Shader::parse`] and [`Optimizer::run`] can report.
pub fn specialize(
    bytes: &[u8],
    spec_constants: &[SpecConstant],
    flags: OptimizerFlags,
) -> Result<Vec<u8>> {
    let shader = Shader::parse(bytes)?;
    Optimizer::new(&shader).run(spec_constants, flags)
}
