//! The reusable analysis half of the library.
//!
//! [`Shader::parse`] runs the whole front half of the pipeline once: decode
//! the word stream, classify decorations and specialization constants,
//! build the forward dependency graph, fill the degree vectors, and fix the
//! topological evaluation order. The resulting [`Shader`] is immutable and
//! can back any number of concurrent [`Optimizer`](crate::Optimizer) runs.
//!
//! # Graph representation
//!
//! Edges live in one append-only arena of singly linked nodes; every
//! instruction heads its own list of outgoing edges. Data edges point from
//! a producer to each consumer of its result. Control edges point from a
//! terminator or merge instruction to each label it references, and from a
//! predecessor label to each phi that names it, which is the direction the
//! optimizer needs when it tears a predecessor down. Indices are plain
//! `u32` with `NIL` as the null value; nothing in the graph is ever
//! unlinked, deletion elsewhere is sentinel-marking.

mod decode;
mod graph;

use rustc_hash::FxHashMap;

use crate::{spirv, Result};

/// Null value for instruction, result, and list indices.
pub(crate) const NIL: u32 = u32::MAX;

/// A specialization constant: its `SpecId` and its value words.
///
/// Returned by [`Shader::spec_constants`] with the default values found in
/// the module, and passed to [`Optimizer::run`](crate::Optimizer::run) with
/// the values to bake in. Boolean constants carry a single word (zero or
/// nonzero); scalar `OpSpecConstant`s carry their literal payload words.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecConstant {
    /// The id from the `SpecId` decoration.
    pub spec_id: u32,
    /// The value words.
    pub values: Vec<u32>,
}

impl SpecConstant {
    /// Convenience constructor.
    #[must_use]
    pub fn new(spec_id: u32, values: Vec<u32>) -> Self {
        Self { spec_id, values }
    }
}

/// One decoded instruction: the word index of its leading word and the
/// head of its adjacency list.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Instruction {
    pub word_index: u32,
    pub edges: u32,
}

/// Discriminates the two edge flavors sharing the adjacency pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    /// Producer → consumer of its result value.
    Data,
    /// Terminator/merge → label, or predecessor label → phi.
    Control,
}

/// One cell of the adjacency arena.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ListNode {
    pub target: u32,
    pub kind: EdgeKind,
    pub next: u32,
}

/// Where a specialization constant lives: the instruction indices of the
/// `OpSpecConstant*` itself, of its `SpecId` decoration, and the position
/// of its entry in the enumeration vector.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SpecSlot {
    pub constant: u32,
    pub decoration: u32,
    pub index: u32,
}

/// The first 32-bit integer `OpConstant` in the module, kept for reuse as
/// the dummy selector of rewritten switches.
#[derive(Debug, Clone, Copy)]
pub(crate) struct IntConstant {
    pub instruction: u32,
    pub result_id: u32,
}

/// A parsed, analyzed SPIR-V module, ready to be specialized any number of
/// times.
///
/// Parsing performs all the work that does not depend on the constant
/// values being baked in: everything here is read-only afterwards, so a
/// `Shader` can be shared across threads while each thread drives its own
/// [`Optimizer`](crate::Optimizer).
#[derive(Debug, Default)]
pub struct Shader {
    /// The module's words, decoded little-endian from the input bytes.
    pub(crate) words: Vec<u32>,
    /// Dense instruction records in decode order.
    pub(crate) instructions: Vec<Instruction>,
    /// Result id → producing instruction index (`NIL` when unwritten),
    /// sized by the header's id bound.
    pub(crate) results: Vec<u32>,
    /// The shared adjacency arena.
    pub(crate) pool: Vec<ListNode>,
    /// Per-instruction count of incoming edges.
    pub(crate) in_degree: Vec<u32>,
    /// Per-instruction count of outgoing edges.
    pub(crate) out_degree: Vec<u32>,
    /// Instruction indices in dependency-respecting evaluation order.
    pub(crate) order: Vec<u32>,
    /// Instruction indices of `OpDecorate`/`OpMemberDecorate`.
    pub(crate) decorations: Vec<u32>,
    /// Instruction indices of `OpName`/`OpMemberName`.
    pub(crate) debug_names: Vec<u32>,
    /// Instruction indices of `OpPhi`, for the compaction re-pass.
    pub(crate) phis: Vec<u32>,
    /// Specialization constants in decoration order, default values.
    pub(crate) spec_constants: Vec<SpecConstant>,
    /// SpecId → location of the constant and its decoration.
    pub(crate) spec_slots: FxHashMap<u32, SpecSlot>,
    /// First 32-bit integer constant, if any.
    pub(crate) default_int: Option<IntConstant>,
}

impl Shader {
    /// Parses and analyzes a SPIR-V module.
    ///
    /// The input is copied into an owned, endian-normalized word buffer;
    /// the returned value borrows nothing from `bytes`.
    ///
    /// # Errors
    ///
    /// Any header, framing, opcode-support, id, block-structure, or
    /// specialization-decoration problem described by [`Error`](crate::Error).
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let mut shader = Self::default();
        shader.decode(bytes)?;
        shader.process_decorations()?;
        shader.build_graph()?;
        shader.compute_degrees();
        shader.compute_order();
        Ok(shader)
    }

    /// The specialization constants declared by the module, with their
    /// default values, in decoration order.
    #[must_use]
    pub fn spec_constants(&self) -> &[SpecConstant] {
        &self.spec_constants
    }

    /// The id bound from the module header.
    #[must_use]
    pub fn id_bound(&self) -> u32 {
        self.words[spirv::ID_BOUND_WORD]
    }

    /// Total number of words in the module, header included.
    #[must_use]
    pub fn word_count(&self) -> usize {
        self.words.len()
    }

    /// Number of decoded instructions.
    #[must_use]
    pub fn instruction_count(&self) -> usize {
        self.instructions.len()
    }

    /// Word index of an instruction's leading word.
    #[inline]
    pub(crate) fn offset(&self, instruction: u32) -> usize {
        self.instructions[instruction as usize].word_index as usize
    }

    /// Producing instruction of a result id, if any.
    #[inline]
    pub(crate) fn producer(&self, id: u32) -> Option<u32> {
        self.results
            .get(id as usize)
            .copied()
            .filter(|&index| index != NIL)
    }

    /// Producing instruction of a result id, or [`Error::UndefinedId`].
    #[inline]
    pub(crate) fn producer_or_err(&self, id: u32) -> Result<u32> {
        self.producer(id).ok_or(crate::Error::UndefinedId(id))
    }

    /// The instruction index producing a result id, if the module defines
    /// it.
    #[must_use]
    pub fn producer_instruction(&self, id: u32) -> Option<u32> {
        self.producer(id)
    }

    /// The raw opcode of an instruction, if the index is valid.
    #[must_use]
    pub fn instruction_opcode(&self, instruction: u32) -> Option<u16> {
        let record = self.instructions.get(instruction as usize)?;
        Some(spirv::unpack(self.words[record.word_index as usize]).0)
    }

    /// The result id an instruction writes, if any.
    #[must_use]
    pub fn instruction_result(&self, instruction: u32) -> Option<u32> {
        let record = self.instructions.get(instruction as usize)?;
        let offset = record.word_index as usize;
        let (raw, _) = spirv::unpack(self.words[offset]);
        let word = spirv::Opcode::from_u16(raw)?.result_word()?;
        Some(self.words[offset + word])
    }

    /// The consumers recorded for a result id: each dependent instruction
    /// and the kind of edge reaching it. An id the module never defines
    /// yields nothing.
    ///
    /// This is the graph a traversal tool walks to show what a
    /// specialization constant feeds; the optimizer itself reads the same
    /// pool through its degree vectors.
    #[must_use]
    pub fn dependents(&self, id: u32) -> Dependents<'_> {
        let edge = self
            .producer(id)
            .map_or(NIL, |producer| self.instructions[producer as usize].edges);
        Dependents {
            shader: self,
            edge,
        }
    }
}

/// Iterator over the recorded consumers of a result id.
///
/// Created by [`Shader::dependents`].
#[derive(Debug)]
pub struct Dependents<'a> {
    shader: &'a Shader,
    edge: u32,
}

impl Iterator for Dependents<'_> {
    type Item = (u32, EdgeKind);

    fn next(&mut self) -> Option<Self::Item> {
        if self.edge == NIL {
            return None;
        }
        let node = self.shader.pool[self.edge as usize];
        self.edge = node.next;
        Some((node.target, node.kind))
    }
}
