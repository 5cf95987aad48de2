//! Shared test helpers: a word-level SPIR-V module builder and a
//! structural verifier for optimizer output.

#![allow(dead_code)]

use spirv_bake::spirv::{self, Opcode};

pub const STORAGE_FUNCTION: u32 = 7;

/// Builds SPIR-V modules word by word for tests. Ids are handed out
/// sequentially; the header's id bound is patched in by [`Self::finish`].
pub struct ModuleBuilder {
    words: Vec<u32>,
    next_id: u32,
}

impl ModuleBuilder {
    /// An empty module: header only.
    pub fn new() -> Self {
        Self {
            words: vec![spirv::MAGIC, 0x0001_0300, 0, 0, 0],
            next_id: 1,
        }
    }

    /// A module opened with the usual `OpCapability Shader` and
    /// `OpMemoryModel Logical GLSL450` preamble.
    pub fn shader() -> Self {
        let mut builder = Self::new();
        builder.op(Opcode::Capability, &[1]);
        builder.op(Opcode::MemoryModel, &[0, 1]);
        builder
    }

    pub fn id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    pub fn op(&mut self, opcode: Opcode, operands: &[u32]) {
        self.op_raw(opcode as u16, operands);
    }

    /// Emits an arbitrary opcode number; used to test rejection paths.
    pub fn op_raw(&mut self, opcode: u16, operands: &[u32]) {
        self.words
            .push(((operands.len() as u32 + 1) << 16) | u32::from(opcode));
        self.words.extend_from_slice(operands);
    }

    /// Emits a string operand: packed UTF-8, null-terminated.
    pub fn string(&self, text: &str) -> Vec<u32> {
        let mut bytes = text.as_bytes().to_vec();
        bytes.push(0);
        while bytes.len() % 4 != 0 {
            bytes.push(0);
        }
        bytes
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }

    // Types and constants.

    pub fn type_void(&mut self) -> u32 {
        let id = self.id();
        self.op(Opcode::TypeVoid, &[id]);
        id
    }

    pub fn type_bool(&mut self) -> u32 {
        let id = self.id();
        self.op(Opcode::TypeBool, &[id]);
        id
    }

    pub fn type_int(&mut self, width: u32, signed: u32) -> u32 {
        let id = self.id();
        self.op(Opcode::TypeInt, &[id, width, signed]);
        id
    }

    pub fn type_function(&mut self, return_type: u32) -> u32 {
        let id = self.id();
        self.op(Opcode::TypeFunction, &[id, return_type]);
        id
    }

    pub fn type_pointer(&mut self, storage: u32, pointee: u32) -> u32 {
        let id = self.id();
        self.op(Opcode::TypePointer, &[id, storage, pointee]);
        id
    }

    pub fn constant(&mut self, result_type: u32, value: u32) -> u32 {
        let id = self.id();
        self.op(Opcode::Constant, &[result_type, id, value]);
        id
    }

    pub fn spec_constant(&mut self, result_type: u32, default: u32) -> u32 {
        let id = self.id();
        self.op(Opcode::SpecConstant, &[result_type, id, default]);
        id
    }

    pub fn spec_constant_true(&mut self, result_type: u32) -> u32 {
        let id = self.id();
        self.op(Opcode::SpecConstantTrue, &[result_type, id]);
        id
    }

    pub fn spec_constant_false(&mut self, result_type: u32) -> u32 {
        let id = self.id();
        self.op(Opcode::SpecConstantFalse, &[result_type, id]);
        id
    }

    pub fn decorate_spec_id(&mut self, target: u32, spec_id: u32) {
        self.op(Opcode::Decorate, &[target, spirv::DECORATION_SPEC_ID, spec_id]);
    }

    // Function scaffolding and control flow.

    pub fn function(&mut self, return_type: u32, function_type: u32) -> u32 {
        let id = self.id();
        self.op(Opcode::Function, &[return_type, id, 0, function_type]);
        id
    }

    pub fn label(&mut self, id: u32) {
        self.op(Opcode::Label, &[id]);
    }

    pub fn variable(&mut self, pointer_type: u32, storage: u32) -> u32 {
        let id = self.id();
        self.op(Opcode::Variable, &[pointer_type, id, storage]);
        id
    }

    pub fn binary(&mut self, opcode: Opcode, result_type: u32, a: u32, b: u32) -> u32 {
        let id = self.id();
        self.op(opcode, &[result_type, id, a, b]);
        id
    }

    pub fn phi(&mut self, result_type: u32, pairs: &[(u32, u32)]) -> u32 {
        let id = self.id();
        let mut operands = vec![result_type, id];
        for &(value, parent) in pairs {
            operands.push(value);
            operands.push(parent);
        }
        self.op(Opcode::Phi, &operands);
        id
    }

    pub fn selection_merge(&mut self, merge: u32) {
        self.op(Opcode::SelectionMerge, &[merge, 0]);
    }

    pub fn branch(&mut self, target: u32) {
        self.op(Opcode::Branch, &[target]);
    }

    pub fn branch_conditional(&mut self, condition: u32, on_true: u32, on_false: u32) {
        self.op(Opcode::BranchConditional, &[condition, on_true, on_false]);
    }

    pub fn switch(&mut self, selector: u32, default: u32, cases: &[(u32, u32)]) {
        let mut operands = vec![selector, default];
        for &(literal, target) in cases {
            operands.push(literal);
            operands.push(target);
        }
        self.op(Opcode::Switch, &operands);
    }

    pub fn ret(&mut self) {
        self.op(Opcode::Return, &[]);
    }

    pub fn function_end(&mut self) {
        self.op(Opcode::FunctionEnd, &[]);
    }

    pub fn name(&mut self, target: u32, text: &str) {
        let mut operands = vec![target];
        operands.extend(self.string(text));
        self.op(Opcode::Name, &operands);
    }

    pub fn finish(mut self) -> Vec<u8> {
        self.words[spirv::ID_BOUND_WORD] = self.next_id;
        self.words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }
}

/// A decoded instruction of an output module.
#[derive(Debug, Clone)]
pub struct Inst {
    pub opcode: u16,
    /// Operand words, leading word excluded.
    pub operands: Vec<u32>,
}

impl Inst {
    pub fn op(&self) -> Option<Opcode> {
        Opcode::from_u16(self.opcode)
    }
}

/// Decodes output bytes back into instructions (header skipped).
pub fn decode(bytes: &[u8]) -> Vec<Inst> {
    let words: Vec<u32> = bytes
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    let mut instructions = Vec::new();
    let mut offset = spirv::HEADER_WORDS;
    while offset < words.len() {
        let (opcode, count) = spirv::unpack(words[offset]);
        assert!(count > 0, "zero word count in output at word {offset}");
        assert!(
            offset + count as usize <= words.len(),
            "instruction overruns output at word {offset}"
        );
        instructions.push(Inst {
            opcode,
            operands: words[offset + 1..offset + count as usize].to_vec(),
        });
        offset += count as usize;
    }
    instructions
}

pub fn count_op(bytes: &[u8], opcode: Opcode) -> usize {
    decode(bytes)
        .iter()
        .filter(|inst| inst.opcode == opcode as u16)
        .count()
}

pub fn find_op(bytes: &[u8], opcode: Opcode) -> Option<Inst> {
    decode(bytes)
        .into_iter()
        .find(|inst| inst.opcode == opcode as u16)
}

/// Whether the output still produces the given result id.
pub fn defines(bytes: &[u8], id: u32) -> bool {
    decode(bytes).iter().any(|inst| {
        inst.op()
            .and_then(Opcode::result_word)
            .is_some_and(|word| inst.operands.get(word - 1) == Some(&id))
    })
}

/// Structural checks every optimized module must pass: reference closure,
/// surviving branch targets, and phi/predecessor consistency.
pub fn verify(bytes: &[u8]) {
    let instructions = decode(bytes);

    let mut defined = std::collections::HashSet::new();
    let mut labels = std::collections::HashSet::new();
    for inst in &instructions {
        let op = inst.op().expect("unsupported opcode in output");
        if let Some(word) = op.result_word() {
            let id = inst.operands[word - 1];
            assert!(defined.insert(id), "result %{id} defined twice in output");
            if op == Opcode::Label {
                labels.insert(id);
            }
        }
    }

    // Data operands must reference surviving producers; labels must
    // reference surviving labels.
    let mut seen = std::collections::HashSet::new();
    for inst in &instructions {
        let op = inst.op().unwrap();
        let mut full = vec![(inst.operands.len() as u32 + 1) << 16 | u32::from(inst.opcode)];
        full.extend_from_slice(&inst.operands);

        if op.has_result_type() {
            let ty = inst.operands[0];
            assert!(seen.contains(&ty), "type %{ty} used before definition");
        }
        if !op.is_metadata() {
            let mut ids = spirv::OperandBuf::new();
            spirv::collect_id_operands(op, &full, &mut ids);
            for id in ids {
                if op == Opcode::Phi {
                    // Phi values may come from later blocks.
                    assert!(defined.contains(&id), "phi value %{id} undefined");
                } else {
                    assert!(seen.contains(&id), "operand %{id} used before definition");
                }
            }
        }
        let mut targets = spirv::OperandBuf::new();
        spirv::collect_label_operands(op, &full, &mut targets);
        for target in targets {
            assert!(labels.contains(&target), "branch target %{target} is gone");
        }
        if let Some(word) = op.result_word() {
            seen.insert(inst.operands[word - 1]);
        }
    }

    verify_phis(&instructions, &labels);
}

/// Every surviving phi pair must name a surviving predecessor whose
/// terminator still targets the phi's block.
fn verify_phis(instructions: &[Inst], labels: &std::collections::HashSet<u32>) {
    for (position, inst) in instructions.iter().enumerate() {
        if inst.opcode != Opcode::Phi as u16 {
            continue;
        }
        let enclosing = instructions[..position]
            .iter()
            .rev()
            .find(|prior| prior.opcode == Opcode::Label as u16)
            .map(|label| label.operands[0])
            .expect("phi without an enclosing label");

        let mut pair = 2;
        while pair + 1 < inst.operands.len() {
            let parent = inst.operands[pair + 1];
            assert!(labels.contains(&parent), "phi predecessor %{parent} is gone");
            assert!(
                terminator_targets(instructions, parent, enclosing),
                "phi predecessor %{parent} no longer branches to %{enclosing}"
            );
            pair += 2;
        }
    }
}

fn terminator_targets(instructions: &[Inst], block: u32, target: u32) -> bool {
    let start = instructions
        .iter()
        .position(|inst| inst.opcode == Opcode::Label as u16 && inst.operands[0] == block)
        .expect("predecessor label missing");
    for inst in &instructions[start..] {
        let op = inst.op().unwrap();
        if !op.is_terminator() {
            continue;
        }
        let mut full = vec![(inst.operands.len() as u32 + 1) << 16 | u32::from(inst.opcode)];
        full.extend_from_slice(&inst.operands);
        let mut targets = spirv::OperandBuf::new();
        spirv::collect_label_operands(op, &full, &mut targets);
        return targets.contains(&target);
    }
    false
}
