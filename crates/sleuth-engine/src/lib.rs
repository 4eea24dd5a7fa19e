#![doc = include_str!("../README.md")]

//! Predictive violation detection over recorded traces.
//!
//! This crate drives the windowed analysis: it indexes each window, builds
//! its maximal causal model, runs the race, deadlock and atomicity
//! detectors, reconstructs witness schedules and collects the findings of
//! a run into a serializable report.

pub mod detect;
pub mod pipeline;
pub mod result;
pub mod schedule;
pub mod session;
pub mod violation;
