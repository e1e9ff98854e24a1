//! # Keystone Test Suite
//!
//! Cross-crate flows that no single crate can test on its own.
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! └── integration/
//!     ├── pipeline_flow.rs    # container + pipeline + API + static files
//!     └── event_bus_e2e.rs    # real listener, websocket upgrade, two clients
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p ks-tests
//! cargo test -p ks-tests integration::event_bus_e2e
//! ```

#![allow(dead_code)]

pub mod integration;
