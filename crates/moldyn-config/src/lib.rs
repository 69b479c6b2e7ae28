//! Configuration loading for the moldyn energy engine.
//!
//! A system is described by a JSON document: an atom count plus an ordered
//! list of node groups. Each group names the node (which selects its
//! factory by longest matching prefix), lists the argument nodes it reads,
//! and carries the node's own parameters:
//!
//! ```json
//! { "n_atom": 2,
//!   "potential": [
//!     { "name": "dist_spring",
//!       "arguments": ["pos"],
//!       "id": [[0, 1]], "equil_dist": [1.0], "spring_const": [100.0] }
//!   ] }
//! ```
//!
//! Groups are instantiated in declared order, so every argument precedes
//! its consumer. Unknown prefixes, unresolved arguments, and arity
//! mismatches are fatal.

pub mod error;
pub mod loader;

pub use error::{ConfigError, Result};
pub use loader::{initialize_engine_from_str, initialize_engine_from_value, SystemConfig};
