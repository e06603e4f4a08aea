//! Integration tests module
//!
//! End-to-end tests for the recast worker against an in-memory store:
//! - Discovery → generation → publish flow through the stage handlers
//! - Pending-work priority and recurring jobs
//! - The multi-queue worker runtime and its control signals
//! - Error handling and recovery scenarios

pub mod pipeline_test;
pub mod scheduling_test;
pub mod worker_test;
