//! Benchmarks for the analyze-once / specialize-many workload.
//!
//! The synthetic ubershader is a chain of selection constructs, each gated
//! by its own boolean specialization constant with a little arithmetic on
//! the guarded path, the shape variant generation actually sees.

use criterion::{criterion_group, criterion_main, Criterion};
use spirv_bake::{Optimizer, OptimizerFlags, Shader, SpecConstant};
use std::hint::black_box;

const OP_CAPABILITY: u32 = 17;
const OP_MEMORY_MODEL: u32 = 14;
const OP_DECORATE: u32 = 71;
const OP_TYPE_BOOL: u32 = 20;
const OP_TYPE_INT: u32 = 21;
const OP_TYPE_VOID: u32 = 19;
const OP_TYPE_FUNCTION: u32 = 33;
const OP_CONSTANT: u32 = 43;
const OP_SPEC_CONSTANT_TRUE: u32 = 48;
const OP_FUNCTION: u32 = 54;
const OP_LABEL: u32 = 248;
const OP_IADD: u32 = 128;
const OP_PHI: u32 = 245;
const OP_SELECTION_MERGE: u32 = 247;
const OP_BRANCH: u32 = 249;
const OP_BRANCH_CONDITIONAL: u32 = 250;
const OP_RETURN: u32 = 253;
const OP_FUNCTION_END: u32 = 56;

struct Emitter {
    words: Vec<u32>,
    next_id: u32,
}

impl Emitter {
    fn new() -> Self {
        Self {
            words: vec![0x0723_0203, 0x0001_0300, 0, 0, 0],
            next_id: 1,
        }
    }

    fn id(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id - 1
    }

    fn op(&mut self, opcode: u32, operands: &[u32]) {
        self.words.push(((operands.len() as u32 + 1) << 16) | opcode);
        self.words.extend_from_slice(operands);
    }

    fn finish(mut self) -> Vec<u8> {
        self.words[3] = self.next_id;
        self.words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }
}

/// A module with `features` conditionally-compiled sections.
fn ubershader(features: u32) -> Vec<u8> {
    let mut e = Emitter::new();
    let gates: Vec<u32> = (0..features).map(|_| e.id()).collect();
    e.op(OP_CAPABILITY, &[1]);
    e.op(OP_MEMORY_MODEL, &[0, 1]);
    for (index, &gate) in gates.iter().enumerate() {
        e.op(OP_DECORATE, &[gate, 1, index as u32]);
    }
    let bool_type = e.id();
    e.op(OP_TYPE_BOOL, &[bool_type]);
    let uint_type = e.id();
    e.op(OP_TYPE_INT, &[uint_type, 32, 0]);
    let base = e.id();
    e.op(OP_CONSTANT, &[uint_type, base, 41]);
    let step = e.id();
    e.op(OP_CONSTANT, &[uint_type, step, 1]);
    for &gate in &gates {
        e.op(OP_SPEC_CONSTANT_TRUE, &[bool_type, gate]);
    }
    let void_type = e.id();
    e.op(OP_TYPE_VOID, &[void_type]);
    let fn_type = e.id();
    e.op(OP_TYPE_FUNCTION, &[fn_type, void_type]);
    let function = e.id();
    e.op(OP_FUNCTION, &[void_type, function, 0, fn_type]);

    let entry = e.id();
    e.op(OP_LABEL, &[entry]);
    let mut value = base;
    let mut current = entry;
    for &gate in &gates {
        let work = e.id();
        let next = e.id();
        e.op(OP_SELECTION_MERGE, &[next, 0]);
        e.op(OP_BRANCH_CONDITIONAL, &[gate, work, next]);
        e.op(OP_LABEL, &[work]);
        let sum = e.id();
        e.op(OP_IADD, &[uint_type, sum, value, step]);
        e.op(OP_BRANCH, &[next]);
        e.op(OP_LABEL, &[next]);
        let merged = e.id();
        e.op(OP_PHI, &[uint_type, merged, sum, work, value, current]);
        value = merged;
        current = next;
    }
    e.op(OP_RETURN, &[]);
    e.op(OP_FUNCTION_END, &[]);
    e.finish()
}

fn bench_parse(c: &mut Criterion) {
    let bytes = ubershader(64);
    c.bench_function("parse_64_features", |b| {
        b.iter(|| Shader::parse(black_box(&bytes)).unwrap());
    });
}

fn bench_specialize_reused(c: &mut Criterion) {
    let bytes = ubershader(64);
    let shader = Shader::parse(&bytes).unwrap();
    let mut optimizer = Optimizer::new(&shader);
    let all_off: Vec<SpecConstant> = (0..64).map(|i| SpecConstant::new(i, vec![0])).collect();
    c.bench_function("specialize_64_features_reused", |b| {
        b.iter(|| {
            optimizer
                .run(black_box(&all_off), OptimizerFlags::STRIP_DEBUG)
                .unwrap()
        });
    });
}

fn bench_specialize_one_shot(c: &mut Criterion) {
    let bytes = ubershader(64);
    let all_on: Vec<SpecConstant> = (0..64).map(|i| SpecConstant::new(i, vec![1])).collect();
    c.bench_function("specialize_64_features_one_shot", |b| {
        b.iter(|| {
            spirv_bake::specialize(
                black_box(&bytes),
                black_box(&all_on),
                OptimizerFlags::empty(),
            )
            .unwrap()
        });
    });
}

criterion_group!(
    benches,
    bench_parse,
    bench_specialize_reused,
    bench_specialize_one_shot
);
criterion_main!(benches);
