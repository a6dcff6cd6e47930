//
// lib.rs
// Dicom-Trolley-Tool-rs
//
// Exposes the crate's modules and re-exports the CLI entry point for both binary and library consumers.
//
// Thales Matheus Mendonça Santos - October 2026

pub mod channels;
pub mod cli;
pub mod client;
pub mod dicom_access;
pub mod error;
pub mod logs;
pub mod output;
pub mod persistence;
pub mod query;
pub mod storage;

pub use cli::{run as run_cli, Cli, Commands};
pub use error::{Result, TrolleyToolError};
