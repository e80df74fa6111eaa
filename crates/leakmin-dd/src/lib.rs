//! Generalized delta debugging over indexed token sequences.
//!
//! The crate knows nothing about oracles, tokenizers or source code. It
//! minimizes a [`Candidate`] against an abstract two-outcome test and
//! exposes the two-method [`TokenReducer`] capability that concrete
//! reducers (string based, model based) implement.

pub mod ddmin;
pub mod error;
pub mod reducer;
pub mod verdict;

pub use ddmin::{CandidateTest, DdConfig, DdStats, DeltaDebugger, Minimized};
pub use error::{BoxError, DdError};
pub use reducer::{reduce_tokens, ReduceOptions, Reduction, TokenReducer};
pub use verdict::{index_tokens, Candidate, IndexedToken, Verdict};
