//! MIND graph core: dataflow IR, static autodiff, liveness-aware scheduling
//! and pruning for the training compiler.
pub mod ir;
pub mod model;
pub mod names;
pub mod ops;
pub mod options;
pub mod opt;
pub mod pipeline;
pub mod scheduler;
pub mod types;

#[cfg(feature = "autodiff")]
pub mod autodiff;
