//! smokedet API Module
//!
//! The HTTP inference service: `/predict` classifies JSON records with the
//! loaded model and logs drift for every served batch.

pub mod fixtures;
pub mod handlers;
pub mod models;
pub mod server;

pub use handlers::*;
pub use models::*;
pub use server::*;
