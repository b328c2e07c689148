//! CryptID Harness Library
//!
//! Build, test, coverage and memory-check pipeline for the CryptID C
//! library. The binary entry point is in main.rs; the modules are public so
//! integration tests can drive the pipeline with a scripted toolchain.

pub mod commands;
pub mod compiler;
pub mod config;
pub mod coverage;
pub mod discovery;
pub mod error;
pub mod invoker;
pub mod junit;
pub mod lifecycle;
pub mod memcheck;
pub mod orchestrator;
pub mod packager;
pub mod protocol;
pub mod reporter;
