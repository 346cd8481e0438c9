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

//! Builtin operators and the open registry that creates them by type name.
//!
//! Every forward operator knows how to describe its gradient operators; the
//! gradient operators themselves only implement inference.

mod elementwise;
mod grad;
mod loss;
mod matmul;
mod registry;

pub use elementwise::{AccumulateInplace, Add, Identity, Mul, Print, Relu, Scale, Sub, Sum};
pub use grad::{
    IdentityGrad, L1Grad, MatMulLhsGrad, MatMulRhsGrad, MulArgGrad, NllGrad, ReduceSumGrad,
    ReluGrad, ScaleGrad,
};
pub use loss::{Nll, L1};
pub use matmul::{MatMul, ReduceSum};
pub use registry::{Arity, OpFactory, OpRegistry, OpSignature, RegistryError};

use crate::ir::{GradInOutMapper, GradInOutType, GraphError};
use crate::types::TensorInfo;

/// Input `index`, or an inference error naming `op` when it is unwired.
fn input<'a>(
    op: &str,
    inputs: &'a [Option<TensorInfo>],
    index: usize,
) -> Result<&'a TensorInfo, GraphError> {
    inputs
        .get(index)
        .and_then(Option::as_ref)
        .ok_or_else(|| GraphError::inference(op, format!("input {index} is not connected")))
}

/// Reject wired inputs at or beyond `arity`.
fn check_arity(op: &str, inputs: &[Option<TensorInfo>], arity: usize) -> Result<(), GraphError> {
    match inputs.iter().skip(arity).position(Option::is_some) {
        Some(extra) => Err(GraphError::inference(
            op,
            format!("takes {arity} inputs, found one at index {}", arity + extra),
        )),
        None => Ok(()),
    }
}

fn same_info(op: &str, a: &TensorInfo, b: &TensorInfo) -> Result<(), GraphError> {
    if a == b {
        Ok(())
    } else {
        Err(GraphError::inference(
            op,
            format!("operands must match exactly, got {a} and {b}"),
        ))
    }
}

fn require_float(op: &str, info: &TensorInfo) -> Result<(), GraphError> {
    if info.dtype.is_float() {
        Ok(())
    } else {
        Err(GraphError::inference(
            op,
            format!("expected a floating point tensor, got {info}"),
        ))
    }
}

fn grad_out(grad_in: usize, out: usize) -> GradInOutMapper {
    GradInOutMapper::new(grad_in, out, GradInOutType::GradOut)
}

fn fwd_in(grad_in: usize, index: usize) -> GradInOutMapper {
    GradInOutMapper::new(grad_in, index, GradInOutType::In)
}

fn fwd_out(grad_in: usize, index: usize) -> GradInOutMapper {
    GradInOutMapper::new(grad_in, index, GradInOutType::Out)
}
