// Copyright 2025 STARGA Inc.
// Licensed under the Apache License, Version 2.0 (the “License”);
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at:
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an “AS IS” BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

// Part of the MIND project (Machine Intelligence Native Design).

//! Reverse-mode automatic differentiation over the graph IR.
//!
//! [`differentiate`] grows the backward graph of a scalar loss in place. Each
//! operator describes its own gradient ops through
//! [`OpKind::grad_ops`](crate::ir::OpKind::grad_ops); the engine wires them,
//! names their outputs and sums partial gradients once every contribution
//! to a tensor has arrived.

mod engine;
mod registry;

pub use engine::{differentiate, AutodiffError, GradientOptions, GradientResult};
pub use registry::{OpGradRegistry, TensorGradRegistry};
