//! Integration flows across the Keystone crates.

pub mod event_bus_e2e;
pub mod pipeline_flow;
