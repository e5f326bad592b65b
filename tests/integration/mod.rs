//! Integration Tests Module
//!
//! End-to-end turns through the orchestrator with scripted LLM, analytics,
//! interpreter and sandbox doubles, plus chat service and configuration
//! behaviour.

mod support;

// Full turns: tenant scoping, file flow, failure paths
mod turn_pipeline_test;

// Retry, edit and single-flight submission
mod chat_service_test;

// Config file loading and environment overlay
mod config_test;
