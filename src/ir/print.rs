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

use std::fmt::Write;

use crate::ir::{Graph, Op, OpId, TensorId};

/// Format a [`Graph`] into a stable, human-readable string.
///
/// Tensors are listed by id, ops by creation order; the output only depends
/// on graph contents, so it is suitable for golden comparisons.
pub fn format_graph(graph: &Graph) -> String {
    let mut out = String::new();
    writeln!(&mut out, "graph {} {{", graph.id()).expect("write to string cannot fail");
    for tensor in graph.tensors().iter() {
        if tensor.has_producer() {
            continue;
        }
        let info = tensor
            .info
            .as_ref()
            .map_or_else(|| "?".to_string(), ToString::to_string);
        writeln!(&mut out, "  {} {} : {}", tensor.kind, tensor.id, info)
            .expect("write to string cannot fail");
    }
    for op in graph.ops() {
        format_op(graph, op, &mut out);
    }
    for (before, after) in graph.topo_cons().edges() {
        writeln!(&mut out, "  constraint %{before} -> %{after}")
            .expect("write to string cannot fail");
    }
    writeln!(
        &mut out,
        "}}  // inputs = [{}], outputs = [{}]",
        graph.inputs().join(", "),
        graph.outputs().join(", ")
    )
    .expect("write to string cannot fail");
    out
}

fn format_op(graph: &Graph, op: &Op, out: &mut String) {
    let outputs: Vec<String> = op
        .outputs()
        .iter()
        .map(|(_, id)| typed(graph, id))
        .collect();
    let inputs: Vec<String> = op
        .inputs()
        .iter()
        .map(|(index, id)| format!("{index}:{id}"))
        .collect();
    write!(
        out,
        "  %{} = {}({})",
        op.id(),
        op.op_type(),
        inputs.join(", ")
    )
    .expect("write to string cannot fail");
    if !outputs.is_empty() {
        write!(out, " -> {}", outputs.join(", ")).expect("write to string cannot fail");
    }
    if let Some(grad) = op.grad_info() {
        write!(out, " grad_of=%{}", grad.forward).expect("write to string cannot fail");
    }
    if !op.settings.name.is_empty() {
        write!(out, " name={:?}", op.settings.name).expect("write to string cannot fail");
    }
    if let Some(phase) = op.settings.execution_phase {
        write!(out, " phase={phase}").expect("write to string cannot fail");
    }
    out.push('\n');
}

fn typed(graph: &Graph, id: &TensorId) -> String {
    match graph.tensor(id).and_then(|t| t.info.as_ref()) {
        Some(info) => format!("{id}:{info}"),
        None => id.clone(),
    }
}

/// One line per scheduled op: position, op, and the ops still live after it.
pub fn format_schedule(graph: &Graph, schedule: &[OpId]) -> String {
    let live = graph.live_sets(schedule).ok();
    let mut out = String::new();
    for (step, id) in schedule.iter().enumerate() {
        let name = graph
            .op(*id)
            .map_or_else(|| format!("<missing {id}>"), Op::debug_name);
        write!(&mut out, "{step:>4}  {name}").expect("write to string cannot fail");
        if let Some(sets) = &live {
            let ids: Vec<String> = sets[step].iter().map(|o| format!("%{o}")).collect();
            write!(&mut out, "  live=[{}]", ids.join(" ")).expect("write to string cannot fail");
        }
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::OpSettings;
    use crate::ops::Relu;
    use crate::types::{DType, TensorInfo};

    #[test]
    fn graph_dump_is_stable() {
        let mut graph = Graph::default();
        graph
            .add_input("x", TensorInfo::new(DType::F32, vec![2]))
            .expect("input");
        let op = graph.create_op(Box::new(Relu), OpSettings::named("act"));
        graph.connect_in_tensor(op, 0, "x").expect("connect");
        graph.create_and_connect_out_tensor(op, 0, "y").expect("out");
        graph.setup_op(op).expect("setup");
        graph.mark_as_output("y").expect("output");

        let text = format_graph(&graph);
        assert!(text.contains("stream x : f32[2]"));
        assert!(text.contains("%0 = Relu(0:x) -> y:f32[2] name=\"act\""));
        assert!(text.ends_with("// inputs = [x], outputs = [y]\n"));
    }
}
