//! peershare-sim library: the scenario the binary runs, kept in a library so
//! it can be exercised from tests.

pub mod scenario;

pub use scenario::{run_scenario, JoinerOutcome, SimOptions, SimReport};
