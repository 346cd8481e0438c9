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

use crate::ir::{GradOpSpec, Graph, GraphError, Op, OpKind};
use crate::types::TensorInfo;

use super::grad::{IdentityGrad, MulArgGrad, ReluGrad, ScaleGrad};
use super::{check_arity, fwd_in, fwd_out, grad_out, input, require_float, same_info};

/// Passes its input through unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct Identity;

impl OpKind for Identity {
    fn op_type(&self) -> &str {
        "Identity"
    }

    fn infer(&self, inputs: &[Option<TensorInfo>]) -> Result<Vec<TensorInfo>, GraphError> {
        check_arity(self.op_type(), inputs, 1)?;
        Ok(vec![input(self.op_type(), inputs, 0)?.clone()])
    }

    fn grad_ops(&self, _op: &Op, _graph: &Graph) -> Result<Vec<GradOpSpec>, GraphError> {
        Ok(vec![pass_through(0)])
    }
}

/// Gradient of forward input `index` is the incoming gradient itself.
fn pass_through(index: usize) -> GradOpSpec {
    GradOpSpec::new(Box::new(IdentityGrad), vec![grad_out(0, 0)], [(0, index)])
}

fn binary(op: &str, inputs: &[Option<TensorInfo>]) -> Result<Vec<TensorInfo>, GraphError> {
    check_arity(op, inputs, 2)?;
    let lhs = input(op, inputs, 0)?;
    let rhs = input(op, inputs, 1)?;
    same_info(op, lhs, rhs)?;
    Ok(vec![lhs.clone()])
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Add;

impl OpKind for Add {
    fn op_type(&self) -> &str {
        "Add"
    }

    fn infer(&self, inputs: &[Option<TensorInfo>]) -> Result<Vec<TensorInfo>, GraphError> {
        binary(self.op_type(), inputs)
    }

    fn grad_ops(&self, _op: &Op, _graph: &Graph) -> Result<Vec<GradOpSpec>, GraphError> {
        Ok(vec![pass_through(0), pass_through(1)])
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Sub;

impl OpKind for Sub {
    fn op_type(&self) -> &str {
        "Sub"
    }

    fn infer(&self, inputs: &[Option<TensorInfo>]) -> Result<Vec<TensorInfo>, GraphError> {
        binary(self.op_type(), inputs)
    }

    fn grad_ops(&self, _op: &Op, _graph: &Graph) -> Result<Vec<GradOpSpec>, GraphError> {
        Ok(vec![
            pass_through(0),
            GradOpSpec::new(
                Box::new(ScaleGrad { factor: -1.0 }),
                vec![grad_out(0, 0)],
                [(0, 1)],
            ),
        ])
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Mul;

impl OpKind for Mul {
    fn op_type(&self) -> &str {
        "Mul"
    }

    fn infer(&self, inputs: &[Option<TensorInfo>]) -> Result<Vec<TensorInfo>, GraphError> {
        binary(self.op_type(), inputs)
    }

    // d(a*b)/da = g*b and d(a*b)/db = g*a.
    fn grad_ops(&self, _op: &Op, _graph: &Graph) -> Result<Vec<GradOpSpec>, GraphError> {
        Ok(vec![
            GradOpSpec::new(
                Box::new(MulArgGrad),
                vec![grad_out(0, 0), fwd_in(1, 1)],
                [(0, 0)],
            ),
            GradOpSpec::new(
                Box::new(MulArgGrad),
                vec![grad_out(0, 0), fwd_in(1, 0)],
                [(0, 1)],
            ),
        ])
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Relu;

impl OpKind for Relu {
    fn op_type(&self) -> &str {
        "Relu"
    }

    fn infer(&self, inputs: &[Option<TensorInfo>]) -> Result<Vec<TensorInfo>, GraphError> {
        check_arity(self.op_type(), inputs, 1)?;
        let x = input(self.op_type(), inputs, 0)?;
        require_float(self.op_type(), x)?;
        Ok(vec![x.clone()])
    }

    fn grad_ops(&self, _op: &Op, _graph: &Graph) -> Result<Vec<GradOpSpec>, GraphError> {
        Ok(vec![GradOpSpec::new(
            Box::new(ReluGrad),
            vec![grad_out(0, 0), fwd_out(1, 0)],
            [(0, 0)],
        )])
    }
}

/// Multiplies its input by a compile-time constant.
#[derive(Debug, Clone, Copy)]
pub struct Scale {
    pub factor: f64,
}

impl OpKind for Scale {
    fn op_type(&self) -> &str {
        "Scale"
    }

    fn infer(&self, inputs: &[Option<TensorInfo>]) -> Result<Vec<TensorInfo>, GraphError> {
        check_arity(self.op_type(), inputs, 1)?;
        let x = input(self.op_type(), inputs, 0)?;
        require_float(self.op_type(), x)?;
        Ok(vec![x.clone()])
    }

    fn grad_ops(&self, _op: &Op, _graph: &Graph) -> Result<Vec<GradOpSpec>, GraphError> {
        Ok(vec![GradOpSpec::new(
            Box::new(ScaleGrad {
                factor: self.factor,
            }),
            vec![grad_out(0, 0)],
            [(0, 0)],
        )])
    }
}

/// N-ary elementwise sum. The autodiff engine also uses it to combine
/// partial gradients.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sum;

impl OpKind for Sum {
    fn op_type(&self) -> &str {
        "Sum"
    }

    fn infer(&self, inputs: &[Option<TensorInfo>]) -> Result<Vec<TensorInfo>, GraphError> {
        let first = input(self.op_type(), inputs, 0)?;
        for index in 1..inputs.len() {
            same_info(self.op_type(), first, input(self.op_type(), inputs, index)?)?;
        }
        Ok(vec![first.clone()])
    }

    fn grad_ops(&self, op: &Op, _graph: &Graph) -> Result<Vec<GradOpSpec>, GraphError> {
        Ok(op.inputs().iter().map(|(i, _)| pass_through(i)).collect())
    }
}

/// `acc += update`, written into `acc`'s storage.
#[derive(Debug, Clone, Copy, Default)]
pub struct AccumulateInplace;

impl OpKind for AccumulateInplace {
    fn op_type(&self) -> &str {
        "AccumulateInplace"
    }

    fn infer(&self, inputs: &[Option<TensorInfo>]) -> Result<Vec<TensorInfo>, GraphError> {
        binary(self.op_type(), inputs)
    }

    fn grad_ops(&self, _op: &Op, _graph: &Graph) -> Result<Vec<GradOpSpec>, GraphError> {
        Ok(vec![pass_through(0), pass_through(1)])
    }

    fn modifies(&self, in_index: usize) -> bool {
        in_index == 0
    }
}

/// Host-visible print of its input; the output aliases the input.
#[derive(Debug, Clone, Copy, Default)]
pub struct Print;

impl OpKind for Print {
    fn op_type(&self) -> &str {
        "Print"
    }

    fn infer(&self, inputs: &[Option<TensorInfo>]) -> Result<Vec<TensorInfo>, GraphError> {
        check_arity(self.op_type(), inputs, 1)?;
        Ok(vec![input(self.op_type(), inputs, 0)?.clone()])
    }

    fn grad_ops(&self, _op: &Op, _graph: &Graph) -> Result<Vec<GradOpSpec>, GraphError> {
        Ok(vec![pass_through(0)])
    }

    fn has_side_effect(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DType;

    fn f32s(shape: &[usize]) -> Option<TensorInfo> {
        Some(TensorInfo::new(DType::F32, shape.to_vec()))
    }

    #[test]
    fn binary_ops_reject_mismatched_shapes() {
        let err = Add.infer(&[f32s(&[2]), f32s(&[3])]).unwrap_err();
        assert!(matches!(err, GraphError::Inference { .. }));
        assert_eq!(
            Mul.infer(&[f32s(&[2]), f32s(&[2])]).expect("mul"),
            vec![TensorInfo::new(DType::F32, vec![2])]
        );
    }

    #[test]
    fn sum_requires_contiguous_inputs() {
        assert!(Sum.infer(&[f32s(&[4]), None, f32s(&[4])]).is_err());
        assert!(Sum.infer(&[f32s(&[4]), f32s(&[4]), f32s(&[4])]).is_ok());
    }

    #[test]
    fn relu_rejects_integers() {
        let ints = Some(TensorInfo::new(DType::I32, vec![3]));
        assert!(Relu.infer(&[ints]).is_err());
    }

    #[test]
    fn extra_inputs_are_rejected() {
        assert!(Identity.infer(&[f32s(&[1]), f32s(&[1])]).is_err());
    }
}
