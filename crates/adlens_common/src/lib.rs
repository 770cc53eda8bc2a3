//! Shared types for the AdLens pipeline: data model, errors, configuration.

pub mod config;
pub mod error;
pub mod models;
