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

//! Session options, loadable from TOML.
//!
//! ```toml
//! loss = "loss"
//! enable_pruning = true
//! execution_phases = 1
//!
//! [scheduler]
//! kahn_tie_breaker = "greedy"
//! swap_limit = 100000
//! ```

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::ir::TensorId;
use crate::scheduler::SchedulerOptions;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SessionOptions {
    pub scheduler: SchedulerOptions,
    /// Number of execution phases. Op phases are only respected when this
    /// is greater than one.
    pub execution_phases: usize,
    pub enable_pruning: bool,
    /// Tensor to differentiate. No backward pass is grown without one.
    pub loss: Option<TensorId>,
    pub do_not_update: BTreeSet<TensorId>,
    /// Tensors kept alive by pruning in addition to the graph outputs.
    pub anchors: Vec<TensorId>,
    pub stream_gradients: BTreeSet<TensorId>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            scheduler: SchedulerOptions::default(),
            execution_phases: 1,
            enable_pruning: true,
            loss: None,
            do_not_update: BTreeSet::new(),
            anchors: Vec::new(),
            stream_gradients: BTreeSet::new(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum OptionsError {
    #[error("failed to read options: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid options: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("execution_phases must be at least 1")]
    ZeroPhases,
}

impl SessionOptions {
    pub fn from_toml_str(text: &str) -> Result<Self, OptionsError> {
        let options: Self = toml::from_str(text)?;
        if options.execution_phases == 0 {
            return Err(OptionsError::ZeroPhases);
        }
        Ok(options)
    }

    pub fn load(path: &Path) -> Result<Self, OptionsError> {
        let text = fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Scheduler options with the session's phase count applied.
    pub fn scheduler_options(&self) -> SchedulerOptions {
        SchedulerOptions {
            execution_phases: self.execution_phases,
            ..self.scheduler.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::KahnTieBreaker;

    #[test]
    fn partial_tables_keep_defaults() {
        let options = SessionOptions::from_toml_str(
            r#"
            loss = "l"
            [scheduler]
            kahn_tie_breaker = "FIFO"
            "#,
        )
        .expect("parse");
        assert_eq!(options.loss.as_deref(), Some("l"));
        assert!(options.enable_pruning);
        assert_eq!(options.scheduler.kahn_tie_breaker, KahnTieBreaker::Fifo);
        assert_eq!(options.scheduler.swap_limit, 1_000_000_000);
    }

    #[test]
    fn unknown_tie_breaker_is_rejected() {
        let err = SessionOptions::from_toml_str("[scheduler]\nkahn_tie_breaker = \"lifo\"\n")
            .unwrap_err();
        assert!(matches!(err, OptionsError::Toml(_)));
        assert!(err.to_string().contains("unknown Kahn tie-breaker 'lifo'"));
    }
}
