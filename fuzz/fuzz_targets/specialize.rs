#![no_main]

use libfuzzer_sys::fuzz_target;
use spirv_bake::{Optimizer, OptimizerFlags, Shader};

fuzz_target!(|data: &[u8]| {
    let Ok(shader) = Shader::parse(data) else {
        return;
    };
    let mut optimizer = Optimizer::new(&shader);
    let _ = optimizer.run(&[], OptimizerFlags::empty());
    let defaults = shader.spec_constants().to_vec();
    let _ = optimizer.run(&defaults, OptimizerFlags::STRIP_DEBUG);
    // Saturate every declared constant to drive the fold guards (shift
    // amounts past the bit width, division by zero patterns).
    let mut saturating = defaults;
    for constant in &mut saturating {
        constant.values.fill(u32::MAX);
    }
    let _ = optimizer.run(&saturating, OptimizerFlags::empty());
});
