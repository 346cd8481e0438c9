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

//! Liveness-optimising op scheduler.
//!
//! Scheduling runs in two phases over a [`DependencyGraph`] built from the
//! graph: a Kahn traversal producing a valid order, then an annealing pass
//! that swaps adjacent independent ops to lower peak liveness within a time
//! and swap budget. The last result is cached by dependency-graph equality.

mod anneal;
mod cache;
mod dag;
mod kahn;
mod liveness;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

use crate::ir::OpId;

pub use anneal::{anneal, AnnealStats};
pub use cache::{compute_schedule, ScheduleCacher};
pub use dag::DependencyGraph;
pub use kahn::kahn_order;
pub use liveness::{liveness_lower_bound, liveness_profile, peak_liveness};

/// Extra ordering constraints for one query: op -> ops that must precede it.
pub type OpsBeforeKey = BTreeMap<OpId, Vec<OpId>>;

/// Whether a schedule query must run the annealing phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequireOptimalSchedule {
    Yes,
    No,
}

impl From<bool> for RequireOptimalSchedule {
    fn from(optimal: bool) -> Self {
        if optimal {
            RequireOptimalSchedule::Yes
        } else {
            RequireOptimalSchedule::No
        }
    }
}

/// How the Kahn phase picks among equally prioritised ready ops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum KahnTieBreaker {
    /// The op that became ready first.
    Fifo,
    /// The op with the smallest net growth in live bytes.
    Greedy,
    /// A seeded random choice.
    Random,
}

impl FromStr for KahnTieBreaker {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fifo" => Ok(KahnTieBreaker::Fifo),
            "greedy" => Ok(KahnTieBreaker::Greedy),
            "random" => Ok(KahnTieBreaker::Random),
            _ => Err(SchedulerError::UnknownTieBreaker(s.to_string())),
        }
    }
}

impl TryFrom<String> for KahnTieBreaker {
    type Error = SchedulerError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl fmt::Display for KahnTieBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            KahnTieBreaker::Fifo => "fifo",
            KahnTieBreaker::Greedy => "greedy",
            KahnTieBreaker::Random => "random",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SchedulerOptions {
    /// Wall-clock budget of the annealing phase.
    pub time_limit_seconds: f64,
    /// Maximum number of swap proposals in the annealing phase.
    pub swap_limit: u64,
    pub kahn_tie_breaker: KahnTieBreaker,
    /// Largest node count for which descendant sets are precomputed.
    pub transitive_closure_threshold: usize,
    /// Seed for every randomised decision.
    pub seed: u64,
    /// Execution phases are only respected when there is more than one.
    pub execution_phases: usize,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            time_limit_seconds: 1e9,
            swap_limit: 1_000_000_000,
            kahn_tie_breaker: KahnTieBreaker::Greedy,
            transitive_closure_threshold: 10_000,
            seed: 0,
            execution_phases: 1,
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SchedulerError {
    /// No valid order exists; `ops` is one offending cycle in order.
    #[error("cyclic dependency between ops [{}]", join_ops(.ops))]
    Cycle { ops: Vec<OpId> },
    #[error("unknown Kahn tie-breaker '{0}' (expected fifo, greedy or random)")]
    UnknownTieBreaker(String),
    #[error("op {op} has execution phase {phase}; phases start at -1")]
    InvalidExecutionPhase { op: OpId, phase: i64 },
    #[error("ordering constraint refers to unknown op {0}")]
    UnknownOp(OpId),
    #[error("internal scheduler error: {0}")]
    Internal(String),
}

fn join_ops(ops: &[OpId]) -> String {
    ops.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}
