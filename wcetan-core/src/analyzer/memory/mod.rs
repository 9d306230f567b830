//! Memory models: parameter derivation, abstract states and the data-flow
//! analyses for the dynamic instruction memories.

pub mod cache_dfa;
pub mod cache_state;
pub mod disp_dfa;
pub mod disp_state;
pub mod params;
