// src/core/mod.rs — PDCA control loop

pub mod budget;
pub mod controller;
pub mod design;
pub mod invoker;
pub mod ledger;
pub mod metrics;
pub mod state;
pub mod types;
