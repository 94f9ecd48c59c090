//! Complaint management admin CLI.
//!
//! The binary is a thin shell over [`cli`]; commands are exposed here so
//! integration tests can drive them against a temporary home directory.

pub mod cli;
