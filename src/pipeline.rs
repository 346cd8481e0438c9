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

//! End-to-end compilation of a model description: build, verify,
//! differentiate, prune, verify again and schedule.

use log::info;

use crate::ir::{self, Graph, OpId};
use crate::model::{self, ModelDescription, ModelError};
use crate::ops::OpRegistry;
use crate::options::SessionOptions;
use crate::opt::{self, PruneError, PruneStats};
use crate::scheduler::{OpsBeforeKey, RequireOptimalSchedule, SchedulerError};

#[cfg(feature = "autodiff")]
use crate::autodiff;

/// Artifacts produced by [`compile_model`].
#[derive(Debug)]
pub struct CompileProducts {
    /// Verified graph, backward pass included when a loss was configured.
    pub graph: Graph,
    /// Liveness-optimised order of every op in `graph`.
    pub schedule: Vec<OpId>,
    /// Gradient bookkeeping when autodiff ran.
    #[cfg(feature = "autodiff")]
    pub gradients: Option<autodiff::GradientResult>,
    /// Pruning statistics when pruning ran.
    pub pruned: Option<PruneStats>,
}

/// Errors surfaced by the compilation pipeline.
#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    #[error("model error: {0}")]
    Model(#[from] ModelError),
    /// The graph did not pass verification.
    #[error("IR verification failed: {0}")]
    IrVerify(#[from] ir::IrVerifyError),
    #[cfg(feature = "autodiff")]
    #[error("autodiff failed: {0}")]
    Autodiff(#[from] autodiff::AutodiffError),
    /// A loss was configured but the feature is not enabled.
    #[cfg(not(feature = "autodiff"))]
    #[error("a loss was configured but the 'autodiff' feature is not enabled")]
    AutodiffDisabled,
    #[error("pruning failed: {0}")]
    Prune(#[from] PruneError),
    #[error("scheduling failed: {0}")]
    Schedule(#[from] SchedulerError),
}

/// Compile `model` with the operators of `registry`.
pub fn compile_model(
    model: &ModelDescription,
    registry: &OpRegistry,
    options: &SessionOptions,
) -> Result<CompileProducts, CompileError> {
    let mut graph = model::build_graph(model, registry)?;
    ir::verify_graph(&graph)?;

    #[cfg(feature = "autodiff")]
    let gradients = match &options.loss {
        Some(loss) => {
            let grad_options = autodiff::GradientOptions {
                loss: loss.clone(),
                do_not_update: options.do_not_update.clone(),
                stream_gradients: options.stream_gradients.clone(),
                execution_phases: options.execution_phases,
            };
            Some(autodiff::differentiate(&mut graph, &grad_options)?)
        }
        None => None,
    };

    #[cfg(not(feature = "autodiff"))]
    if options.loss.is_some() {
        return Err(CompileError::AutodiffDisabled);
    }

    let pruned = if options.enable_pruning {
        let mut targets = options.anchors.clone();
        #[cfg(feature = "autodiff")]
        if let Some(result) = &gradients {
            targets.extend(result.gradients.values().cloned());
        }
        Some(opt::prune(&mut graph, &targets)?)
    } else {
        None
    };

    let constraints = graph.set_modifier_constraints();
    ir::verify_graph(&graph)?;

    graph.set_scheduler_options(options.scheduler_options());
    let schedule = graph.get_op_schedule(&OpsBeforeKey::new(), RequireOptimalSchedule::Yes)?;
    info!(
        "compiled '{}': {} ops scheduled, {} in-place constraints",
        graph.id(),
        schedule.len(),
        constraints
    );

    Ok(CompileProducts {
        graph,
        schedule,
        #[cfg(feature = "autodiff")]
        gradients,
        pruned,
    })
}
