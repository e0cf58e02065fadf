//! # Recon Test Suite
//!
//! Unified test crate containing:
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! ├── support.rs        # In-process gateway harness and fixtures
//! │
//! ├── exploits/         # Attack simulations
//! │   ├── replay.rs
//! │   ├── flooding.rs
//! │   ├── tampering.rs
//! │   └── spoofing.rs
//! │
//! └── integration/      # Cross-component flows
//!     ├── end_to_end.rs
//!     └── offline_queue.rs
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! # All tests
//! cargo test -p recon-tests
//!
//! # By category
//! cargo test -p recon-tests integration::
//! cargo test -p recon-tests exploits::
//! ```

#![allow(unused_variables)]
#![allow(unused_imports)]
#![allow(dead_code)]

pub mod exploits;
pub mod integration;
