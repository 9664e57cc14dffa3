//! Handler module - test executor routing.
//!
//! Provides:
//! - [`ExecutorRegistry`] - maps command payloads to test executors
//! - [`TestContext`] - lets executors poll cancellation and build reports
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use serde_json::{json, Value};
//! use teststand::handler::ExecutorRegistry;
//! use teststand::message::CommandType;
//!
//! let mut registry = ExecutorRegistry::new();
//!
//! registry.register(CommandType::SingleTest, "led", |_: Value, ctx| {
//!     for _ in 0..3 {
//!         if !ctx.sleep(Duration::from_millis(1)) {
//!             break;
//!         }
//!     }
//!     Ok(ctx.passed(json!({"testResult": "OK"})))
//! });
//!
//! registry.register_order(2, |_: Value, ctx| Ok(ctx.failed(json!({}))));
//! ```

mod context;
mod registry;

pub use context::TestContext;
pub use registry::{ExecutorRegistry, TestExecutor, TypedExecutor};
