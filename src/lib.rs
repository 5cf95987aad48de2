// Copyright 2025-2026 the spirv-bake developers
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![deny(missing_docs)]

//! # spirv-bake
//!
//! A low-latency optimizer for SPIR-V shader modules built around one idea:
//! parse and analyze a module **once**, then bake values into its
//! specialization constants **many times**, each run folding constants,
//! collapsing conditional branches and switches whose selectors became
//! constant, and sweeping the code that died as a result.
//!
//! The target workload is ubershader variant generation: a caller holding a
//! large shader with dozens of specialization constants wants hundreds of
//! specialized variants, and wants each one in well under the time a driver
//! or a general-purpose optimizer would take.
//!
//! # Architecture
//!
//! - [`Shader`] is the reusable analysis. Parsing decodes the word stream,
//!   builds a forward dependency graph over instructions (data edges and
//!   control edges share one adjacency arena), computes per-instruction
//!   in/out degrees, and fixes a topological evaluation order.
//! - [`Optimizer`] is the per-specialization pass. Each run clones the word
//!   buffer and degree vectors, patches the requested constants in place,
//!   walks the topological order once propagating a small
//!   constant-resolution lattice, folds terminators, drives dead-code
//!   elimination by degree reduction, compacts phis, and serializes the
//!   surviving instructions.
//! - [`spirv`] holds the SPIR-V binary tables: the supported opcode set and
//!   the per-opcode operand layouts both passes share.
//!
//! The library performs no I/O and emits no logs; all failures are reported
//! through [`Error`]. The `spirv-bake` command-line tool in this workspace
//! wraps the library with file handling and a timing harness.
//!
//! # Example
//!
//! ```rust,no_run
//! use spirv_bake::{Optimizer, OptimizerFlags, Shader, SpecConstant};
//!
//! let bytes = std::fs::read("ubershader.spv")?;
//! let shader = Shader::parse(&bytes)?;
//!
//! // Inspect the specialization constants and their default values.
//! for sc in shader.spec_constants() {
//!     println!("SpecId {} = {:?}", sc.spec_id, sc.values);
//! }
//!
//! // Reuse one optimizer (and its scratch buffers) for many variants.
//! let mut optimizer = Optimizer::new(&shader);
//! let variant_a = optimizer.run(
//!     &[SpecConstant::new(0, vec![1])],
//!     OptimizerFlags::STRIP_DEBUG,
//! )?;
//! let variant_b = optimizer.run(
//!     &[SpecConstant::new(0, vec![0])],
//!     OptimizerFlags::STRIP_DEBUG,
//! )?;
//! # let _ = (variant_a, variant_b);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # Limitations
//!
//! Loops are parsed but treated as opaque regions: `OpLoopMerge` is
//! accepted, no loop-level folding is performed, and a loop body only
//! disappears when both its forward and backward edges become unreachable
//! through independent folds. Only 32-bit integer and boolean lanes are
//! folded; floating-point expressions are never evaluated. The input must
//! consist entirely of the supported opcode subset; anything else is
//! rejected at parse time rather than passed through unanalyzed.

mod analyzer;
mod error;
mod optimizer;
pub mod spirv;

pub use analyzer::{Dependents, EdgeKind, Shader, SpecConstant};
pub use error::Error;
pub use optimizer::{specialize, Optimizer, OptimizerFlags};

/// Crate-wide result alias.
pub type Result<T> = core::result::Result<T, Error>;
