//! Gradient checking for moldyn nodes.
//!
//! Compares the central-difference Jacobian of a node's output with the
//! analytical Jacobian the engine produces through slot-machine deposits,
//! returning their relative RMS deviation. Used only in tests: a conforming
//! node stays below 1e-3 at eps = 1e-2.

mod gradient;

pub use gradient::{gradient_deviation, relative_rms_deviation, ValueType};
