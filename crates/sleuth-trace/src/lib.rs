#![doc = include_str!("../README.md")]

//! Sleuth trace model and indexing.
//!
//! This crate defines the recorded event model, the JSON Lines reader and
//! window chunker, the per-window trace index (shared-address pruning, lock
//! regions, memory access blocks), the must-happen-before closure and the
//! lockset filter.

pub mod builder;
pub mod closure;
pub mod event;
pub mod lockset;
pub mod metadata;
#[cfg(any(test, feature = "proptest"))]
pub mod proptest_generators;
pub mod reader;
pub mod window;

#[cfg(test)]
mod property_tests;
