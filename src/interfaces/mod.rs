//! Intake and output adapters around the engine.

pub mod csv;
