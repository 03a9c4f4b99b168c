//! Integration tests module
//!
//! This module provides end-to-end integration tests for the trawl pipeline,
//! including:
//! - Complete schedule -> fetch -> process -> result flow
//! - Multiple stage instances competing on shared queues
//! - Error handling and recovery scenarios

pub mod pipeline_test;
pub mod distributed_test;
pub mod fixtures;
