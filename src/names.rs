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

//! Canonical names for automatically generated tensors.
//!
//! Gradient tensors are named by pure string composition so that the same
//! forward graph always yields the same gradient ids. User supplied ids must
//! not collide with this pattern; [`is_reserved_id`] is the single predicate
//! used to reject them.

use crate::ir::OpId;

/// Prefix shared by every auto-generated gradient tensor id.
pub const RESERVED_GRAD_PREFIX: &str = "d__";

/// Separator between nested graph scopes and a tensor name.
pub const SCOPE_DELIMITER: char = '/';

/// Name of the complete (summed) gradient of `tensor`.
pub fn grad_id(tensor: &str) -> String {
    format!("{RESERVED_GRAD_PREFIX}{tensor}")
}

/// Name of the partial gradient of `tensor` along the edge where `op`
/// consumes it at input `index`.
pub fn edge_grad_id(tensor: &str, op: OpId, index: usize) -> String {
    format!("{RESERVED_GRAD_PREFIX}{tensor}_{}_{index}", op.0)
}

/// Inverse of [`grad_id`].
pub fn non_grad_id(id: &str) -> Option<&str> {
    id.strip_prefix(RESERVED_GRAD_PREFIX)
}

/// Whether `id` could have been produced by [`grad_id`] or [`edge_grad_id`],
/// either directly or inside a scope.
pub fn is_reserved_id(id: &str) -> bool {
    id.split(SCOPE_DELIMITER)
        .any(|segment| segment.starts_with(RESERVED_GRAD_PREFIX))
}

/// Prefix `id` with `scope`. The root scope is the empty string.
pub fn add_scope(scope: &str, id: &str) -> String {
    if scope.is_empty() {
        id.to_string()
    } else {
        format!("{scope}{SCOPE_DELIMITER}{id}")
    }
}

/// Strip `scope` from `id`, or `None` when `id` does not live in `scope`.
pub fn remove_scope<'a>(scope: &str, id: &'a str) -> Option<&'a str> {
    if scope.is_empty() {
        return Some(id);
    }
    id.strip_prefix(scope)?.strip_prefix(SCOPE_DELIMITER)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gradient_names_are_reserved() {
        assert!(is_reserved_id(&grad_id("w")));
        assert!(is_reserved_id(&edge_grad_id("w", OpId(3), 1)));
        assert!(is_reserved_id("body/d__x"));
        assert!(!is_reserved_id("add__x"));
        assert!(!is_reserved_id("weights"));
    }

    #[test]
    fn edge_name_encodes_op_and_index() {
        assert_eq!(edge_grad_id("x", OpId(7), 2), "d__x_7_2");
        assert_eq!(non_grad_id("d__x"), Some("x"));
        assert_eq!(non_grad_id("x"), None);
    }

    #[test]
    fn scopes_round_trip() {
        let scoped = add_scope("loop_body", "x");
        assert_eq!(scoped, "loop_body/x");
        assert_eq!(remove_scope("loop_body", &scoped), Some("x"));
        assert_eq!(remove_scope("other", &scoped), None);
        assert_eq!(add_scope("", "x"), "x");
    }
}
