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

use crate::ir::{Graph, GraphError, TensorId, TensorKind};

/// Remove tensors with neither a producer nor a consumer. Returns the ids
/// removed, sorted.
pub fn remove_isolated_tensors(
    graph: &mut Graph,
    retain_variables: bool,
    retain_constants: bool,
) -> Result<Vec<TensorId>, GraphError> {
    let isolated: Vec<TensorId> = graph
        .tensors()
        .iter()
        .filter(|t| !t.has_producer() && t.consumers.is_empty())
        .filter(|t| match t.kind {
            TensorKind::Variable => !retain_variables,
            TensorKind::Constant => !retain_constants,
            TensorKind::Stream | TensorKind::Computed => true,
        })
        .map(|t| t.id.clone())
        .collect();
    for id in &isolated {
        graph.remove_tensor(id)?;
    }
    Ok(isolated)
}
