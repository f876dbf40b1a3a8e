//! Traffic Signal Simulation Library
//!
//! An adaptive four-way intersection simulation fed by a synthetic
//! vehicle-detection stream. Runs headless or behind any front end.

pub mod simulation;
