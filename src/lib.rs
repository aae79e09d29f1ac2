//! smokedet: smoke detection from IoT sensor readings
//!
//! The binary wires the core pipelines (training, registration, evaluation,
//! drift monitoring) to subcommands and runs the inference service.

pub mod cli;
