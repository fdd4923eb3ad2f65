//! # dnf-rs: Boolean constraint simplification over ternary truth tables
//!
//! **`dnf-rs`** simplifies a satisfiability problem given as a conjunction of small Boolean functions.
//! Each function is stored as an explicit truth table whose cells are `0`, `1` or `-` (either value).
//! The engine learns forced assignments and signed variable equivalences, rewrites every table with
//! them, and restructures the function set until nothing more can be learned cheaply.
//!
//! ## Key Features
//!
//! - **Ternary tables**: [`Function`][crate::function::Function] rows are satisfying assignments with wildcards.
//! - **Knowledge base**: [`Knowledge`][crate::knowledge::Knowledge] keeps assignments and canonical
//!   equivalences (every rewritten variable points directly at its representative).
//! - **Stable handles**: functions live in an [`Arena`][crate::arena::Arena]; the variable index and the
//!   work-queues hold [`Handle`][crate::arena::Handle]s that simply stop resolving once a function is gone.
//! - **Entropy-driven decomposition**: [`decompose`][crate::decomposition::decompose] factors a table into a
//!   small decision part and a residual.
//! - **1-Based Indexing**: Variables are 1-indexed, matching DIMACS.
//!
//! ## Basic Usage
//!
//! ```rust
//! use dnf_rs::function::Function;
//! use dnf_rs::problem::{Problem, ProblemConfig};
//! use dnf_rs::types::{Lit, Var};
//!
//! // x1 ∨ x2, ¬x1 ∨ x2
//! let clauses = [[1, 2], [-1, 2]];
//! let functions = clauses
//!     .iter()
//!     .map(|c| Function::from_clause(&c.map(Lit::from_dimacs)));
//!
//! let mut problem = Problem::from_functions(ProblemConfig::default(), functions);
//! problem.knowledge_propagate();
//! problem.assume_and_learn();
//!
//! assert_eq!(problem.knowledge().assignment(Var::new(2)), Some(true));
//! ```
//!
//! ## Core Components
//!
//! - **[`problem`]**: The engine. Propagation, assume-and-learn, variable extraction, merging and partitioning.
//! - **[`function`]**: Truth tables and their operations (apply/derive knowledge, merge, projection).
//! - **[`knowledge`]**: Assignments and signed equivalences with an unsatisfiability flag.
//! - **[`decomposition`]**: Entropy-guided factoring of a table around one variable.
//! - **[`io`]**: DNF and DIMACS CNF loaders, and the CNF writer.

pub mod arena;
pub mod decomposition;
pub mod function;
pub mod io;
pub mod knowledge;
pub mod problem;
pub mod types;
pub mod utils;
