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

//! Dataflow graph IR: tensors, ops, their wiring, and the graph that owns
//! them.

mod graph;
mod index_map;
mod op;
mod print;
mod tensor;
mod topocons;
mod verify;

pub use graph::{Graph, GraphError, GraphId};
pub use index_map::TensorIndexMap;
pub use op::{
    attr_f64, AttrValue, Attributes, GradInOutMapper, GradInOutType, GradOpInfo, GradOpSpec, Op,
    OpId, OpKind, OpSettings,
};
pub use print::{format_graph, format_schedule};
pub use tensor::{Consumers, Tensor, TensorId, TensorKind, Tensors};
pub use topocons::TopoCons;
pub use verify::{verify_graph, IrVerifyError};
