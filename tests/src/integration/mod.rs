//! # Integration Flows
//!
//! Full request paths through the gateway: HTTP surface, pipeline, bridge,
//! execution host and offline queue working together.

pub mod end_to_end;
pub mod offline_queue;
