#![doc = include_str!("../README.md")]

//! SMT encoding and solver integration for predictive trace analysis.
//!
//! This crate provides the term language, the solver interface with a Z3
//! backend, and the maximal causal model of a trace window.

pub mod backends;
pub mod encoder;
pub mod solver;
pub mod terms;
