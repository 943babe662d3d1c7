// src/lib.rs — Library root for kaizen

pub mod cli;
pub mod core;
pub mod infra;
pub mod worker;
