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

//! In-memory model description and the builder that turns it into a
//! [`Graph`].
//!
//! The description is what an importer hands the core: nodes in creation
//! order, initialised tensors, streamed inputs and declared outputs. It
//! deserializes from JSON; the CLI reads it that way.

use std::fs;
use std::path::Path;

use log::{debug, trace};
use serde::Deserialize;

use crate::ir::{Attributes, Graph, GraphError, GraphId, OpId, OpSettings};
use crate::names::is_reserved_id;
use crate::ops::{OpRegistry, RegistryError};
use crate::types::{DType, TensorData, TensorInfo};

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ModelDescription {
    /// Graph scope. Empty for the root graph.
    pub graph: String,
    pub inputs: Vec<InputDesc>,
    pub initializers: Vec<InitializerDesc>,
    pub nodes: Vec<NodeDesc>,
    pub outputs: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InputDesc {
    pub id: String,
    pub dtype: DType,
    pub shape: Vec<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InitKind {
    #[serde(alias = "variable")]
    Var,
    #[serde(alias = "constant")]
    Const,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InitializerDesc {
    pub id: String,
    pub kind: InitKind,
    pub dtype: DType,
    pub shape: Vec<usize>,
    /// Element values for float tensors.
    #[serde(default)]
    pub values: Option<Vec<f32>>,
    /// Raw little-endian bytes. Zero-filled when neither form is given.
    #[serde(default)]
    pub bytes: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NodeDesc {
    pub op_type: String,
    /// Input tensor per index. An empty id leaves the index unwired.
    #[serde(default)]
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    #[serde(default)]
    pub attributes: Attributes,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub priority: f64,
    #[serde(default)]
    pub phase: Option<i64>,
    #[serde(default = "default_pruneable")]
    pub pruneable: bool,
}

fn default_pruneable() -> bool {
    true
}

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("failed to read model: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed model description: {0}")]
    Json(#[from] serde_json::Error),
    #[error("node {node}: {source}")]
    Registry {
        node: String,
        #[source]
        source: RegistryError,
    },
    #[error("node {node}: input {index} may not be left unwired")]
    UnwiredInput { node: String, index: usize },
    #[error("initializer '{id}' holds {found} values, expected {expected}")]
    ValueCount {
        id: String,
        expected: usize,
        found: usize,
    },
    #[error("initializer '{id}' gives values for non-float type {dtype}")]
    ValueType { id: String, dtype: DType },
    #[error(transparent)]
    Graph(#[from] GraphError),
}

impl ModelDescription {
    pub fn from_json_str(text: &str) -> Result<Self, ModelError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self, ModelError> {
        let text = fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }
}

/// Build a set-up graph from `model`, creating ops through `registry`.
pub fn build_graph(model: &ModelDescription, registry: &OpRegistry) -> Result<Graph, ModelError> {
    let mut graph = Graph::new(GraphId(model.graph.clone()));

    for input in &model.inputs {
        let info = TensorInfo::new(input.dtype, input.shape.clone());
        graph.add_input(&input.id, info)?;
    }
    for init in &model.initializers {
        let info = TensorInfo::new(init.dtype, init.shape.clone());
        let data = initializer_data(init, &info)?;
        match init.kind {
            InitKind::Var => graph.add_var_init(&init.id, info, data)?,
            InitKind::Const => graph.add_const_init(&init.id, info, data)?,
        }
    }
    for (index, node) in model.nodes.iter().enumerate() {
        let op = add_node(&mut graph, registry, node, index)?;
        if let Some(o) = graph.op(op) {
            trace!("grew {} from node {index}", o.debug_name());
        }
    }
    for output in &model.outputs {
        graph.mark_as_output(output)?;
    }

    debug!(
        "built graph '{}' with {} ops and {} tensors",
        graph.id(),
        graph.num_ops(),
        graph.tensors().len()
    );
    Ok(graph)
}

fn add_node(
    graph: &mut Graph,
    registry: &OpRegistry,
    node: &NodeDesc,
    index: usize,
) -> Result<OpId, ModelError> {
    let label = if node.name.is_empty() {
        format!("#{index} ({})", node.op_type)
    } else {
        format!("'{}' ({})", node.name, node.op_type)
    };
    let kind = registry
        .create(&node.op_type, &node.attributes, node.inputs.len())
        .map_err(|source| ModelError::Registry {
            node: label.clone(),
            source,
        })?;

    let optional = kind.optional_inputs();
    for (i, id) in node.inputs.iter().enumerate() {
        if id.is_empty() && !optional.contains(&i) {
            return Err(ModelError::UnwiredInput {
                node: label,
                index: i,
            });
        }
    }
    if let Some(id) = node.outputs.iter().find(|id| is_reserved_id(id)) {
        return Err(GraphError::ReservedId(id.clone()).into());
    }

    let settings = OpSettings {
        name: node.name.clone(),
        schedule_priority: node.priority,
        execution_phase: node.phase,
        pruneable: node.pruneable,
    };
    let op = graph.create_op(kind, settings);
    for (i, id) in node.inputs.iter().enumerate() {
        if !id.is_empty() {
            graph.connect_in_tensor(op, i, id)?;
        }
    }
    for (i, id) in node.outputs.iter().enumerate() {
        graph.create_and_connect_out_tensor(op, i, id)?;
    }
    graph.setup_op(op)?;
    Ok(op)
}

fn initializer_data(init: &InitializerDesc, info: &TensorInfo) -> Result<TensorData, ModelError> {
    if let Some(values) = &init.values {
        if init.dtype != DType::F32 {
            return Err(ModelError::ValueType {
                id: init.id.clone(),
                dtype: init.dtype,
            });
        }
        if values.len() != info.nelms() {
            return Err(ModelError::ValueCount {
                id: init.id.clone(),
                expected: info.nelms(),
                found: values.len(),
            });
        }
        return Ok(TensorData::from_f32s(values));
    }
    Ok(match &init.bytes {
        Some(bytes) => TensorData::from_bytes(bytes.clone()),
        None => TensorData::from_bytes(vec![0; info.nbytes()]),
    })
}
