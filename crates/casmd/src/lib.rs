//! casmd - CASM peer host daemon
//!
//! Runs one host on the QUIC carrier, serves `/echo` and dials a list of
//! bootstrap peers.

pub mod config;
pub mod node;

pub use config::Config;
