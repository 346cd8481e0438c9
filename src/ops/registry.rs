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

use std::collections::BTreeMap;

use crate::ir::{attr_f64, Attributes, OpKind};

use super::{
    AccumulateInplace, Add, Identity, MatMul, Mul, Nll, Print, ReduceSum, Relu, Scale, Sub, Sum, L1,
};

/// Builds an operator from its attribute set.
pub type OpFactory = fn(&Attributes) -> Result<Box<dyn OpKind>, RegistryError>;

/// Arity description for ops that accept a fixed or variadic input count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Fixed(usize),
    Variadic { min: usize },
}

impl Arity {
    pub fn accepts(self, count: usize) -> bool {
        match self {
            Arity::Fixed(n) => count == n,
            Arity::Variadic { min } => count >= min,
        }
    }
}

/// Registry metadata for one operator type.
#[derive(Debug, Clone, Copy)]
pub struct OpSignature {
    /// Type name as it appears in model descriptions.
    pub name: &'static str,
    /// Number of input slots, unwired optional slots included.
    pub arity: Arity,
    /// Whether the op can describe gradient ops.
    pub differentiable: bool,
    /// Short description of the op contract.
    pub summary: &'static str,
    pub factory: OpFactory,
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum RegistryError {
    #[error("unknown op type '{0}'")]
    UnknownOpType(String),
    #[error("op type '{0}' is already registered")]
    Duplicate(String),
    #[error("{op_type} requires attribute '{attr}'")]
    MissingAttribute { op_type: String, attr: String },
    #[error("{op_type} got {count} inputs, expected {arity:?}")]
    Arity {
        op_type: String,
        count: usize,
        arity: Arity,
    },
}

/// Open, type-name keyed table of operator factories.
///
/// [`OpRegistry::builtin`] holds the operators shipped with the crate;
/// callers extend it with [`OpRegistry::register`].
#[derive(Debug, Clone, Default)]
pub struct OpRegistry {
    entries: BTreeMap<&'static str, OpSignature>,
}

impl OpRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        for signature in builtin_ops() {
            // Names in the builtin table are distinct.
            registry.entries.insert(signature.name, signature);
        }
        registry
    }

    pub fn register(&mut self, signature: OpSignature) -> Result<(), RegistryError> {
        if self.entries.contains_key(signature.name) {
            return Err(RegistryError::Duplicate(signature.name.to_string()));
        }
        self.entries.insert(signature.name, signature);
        Ok(())
    }

    pub fn signature(&self, op_type: &str) -> Option<&OpSignature> {
        self.entries.get(op_type)
    }

    pub fn contains(&self, op_type: &str) -> bool {
        self.entries.contains_key(op_type)
    }

    /// Instantiate `op_type` for a node with `input_count` input slots.
    pub fn create(
        &self,
        op_type: &str,
        attrs: &Attributes,
        input_count: usize,
    ) -> Result<Box<dyn OpKind>, RegistryError> {
        let signature = self
            .signature(op_type)
            .ok_or_else(|| RegistryError::UnknownOpType(op_type.to_string()))?;
        if !signature.arity.accepts(input_count) {
            return Err(RegistryError::Arity {
                op_type: op_type.to_string(),
                count: input_count,
                arity: signature.arity,
            });
        }
        (signature.factory)(attrs)
    }

    /// Signatures in name order.
    pub fn signatures(&self) -> impl Iterator<Item = &OpSignature> {
        self.entries.values()
    }
}

fn required_f64(op_type: &str, attrs: &Attributes, attr: &str) -> Result<f64, RegistryError> {
    attr_f64(attrs, attr).ok_or_else(|| RegistryError::MissingAttribute {
        op_type: op_type.to_string(),
        attr: attr.to_string(),
    })
}

/// The operators shipped with the crate. Keep the ordering stable so CLI
/// output stays deterministic.
fn builtin_ops() -> Vec<OpSignature> {
    use Arity::*;
    vec![
        OpSignature {
            name: "Identity",
            arity: Fixed(1),
            differentiable: true,
            summary: "Copy of the input.",
            factory: |_| Ok(Box::new(Identity)),
        },
        OpSignature {
            name: "Add",
            arity: Fixed(2),
            differentiable: true,
            summary: "Elementwise addition of identically shaped tensors.",
            factory: |_| Ok(Box::new(Add)),
        },
        OpSignature {
            name: "Sub",
            arity: Fixed(2),
            differentiable: true,
            summary: "Elementwise subtraction of identically shaped tensors.",
            factory: |_| Ok(Box::new(Sub)),
        },
        OpSignature {
            name: "Mul",
            arity: Fixed(2),
            differentiable: true,
            summary: "Elementwise multiplication of identically shaped tensors.",
            factory: |_| Ok(Box::new(Mul)),
        },
        OpSignature {
            name: "MatMul",
            arity: Fixed(2),
            differentiable: true,
            summary: "Rank-2 matrix multiplication.",
            factory: |_| Ok(Box::new(MatMul)),
        },
        OpSignature {
            name: "Relu",
            arity: Fixed(1),
            differentiable: true,
            summary: "Elementwise ReLU activation.",
            factory: |_| Ok(Box::new(Relu)),
        },
        OpSignature {
            name: "Scale",
            arity: Fixed(1),
            differentiable: true,
            summary: "Multiply by the constant attribute 'factor'.",
            factory: |attrs| {
                Ok(Box::new(Scale {
                    factor: required_f64("Scale", attrs, "factor")?,
                }))
            },
        },
        OpSignature {
            name: "ReduceSum",
            arity: Fixed(1),
            differentiable: true,
            summary: "Sum of all elements to a scalar.",
            factory: |_| Ok(Box::new(ReduceSum)),
        },
        OpSignature {
            name: "Sum",
            arity: Variadic { min: 1 },
            differentiable: true,
            summary: "Elementwise sum of any number of identically shaped tensors.",
            factory: |_| Ok(Box::new(Sum)),
        },
        OpSignature {
            name: "L1",
            arity: Fixed(1),
            differentiable: true,
            summary: "Loss: 'lambda' (default 1) times the sum of absolute values.",
            factory: |attrs| {
                Ok(Box::new(L1 {
                    lambda: attr_f64(attrs, "lambda").unwrap_or(1.0),
                }))
            },
        },
        OpSignature {
            name: "Nll",
            arity: Fixed(2),
            differentiable: true,
            summary: "Loss: negative log-likelihood of probabilities at integer labels.",
            factory: |_| Ok(Box::new(Nll)),
        },
        OpSignature {
            name: "AccumulateInplace",
            arity: Fixed(2),
            differentiable: true,
            summary: "Adds input 1 into input 0 in place.",
            factory: |_| Ok(Box::new(AccumulateInplace)),
        },
        OpSignature {
            name: "Print",
            arity: Fixed(1),
            differentiable: true,
            summary: "Prints its input on the host; never pruned.",
            factory: |_| Ok(Box::new(Print)),
        },
    ]
}
