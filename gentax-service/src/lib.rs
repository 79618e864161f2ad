//! GenTaxAI chat service: a knowledge-grounded Indian tax assistant.
pub mod config;
pub mod handlers;
pub mod models;
pub mod services;
pub mod startup;
pub mod utils;
