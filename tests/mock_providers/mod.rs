//! Mock provider servers for integration tests
//!
//! - [`realtime_mock`]: scripted realtime model endpoint

// Allow dead code in test infrastructure - not every test binary uses every helper
#![allow(dead_code)]

pub mod realtime_mock;

pub use realtime_mock::*;
