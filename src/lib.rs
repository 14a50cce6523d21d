//! Convforge - template-driven media conversion pipelines
//!
//! This library crate exposes the application layer for integration testing.

pub mod config;
pub mod convert;
pub mod package;
pub mod pipeline;
