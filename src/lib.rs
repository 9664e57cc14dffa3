//! # teststand
//!
//! Command-and-control core for a hardware test station.
//!
//! A host sends CRC-protected binary frames carrying JSON commands over a
//! byte stream (typically a serial line). This crate decodes them, routes
//! each command to a cancellable test executor running on a worker thread,
//! and frames the acknowledgements and reports that go back.
//!
//! ## Architecture
//!
//! - **Link** ([`link`]): `feed(bytes)` / `drain()` around a locked ring
//!   buffer and resynchronizing frame decoder
//! - **Queue** ([`queue`]): bounded FIFO of decoded commands
//! - **Dispatcher** ([`dispatcher`]): routes commands, cancels the running
//!   generation on session control
//! - **Pool** ([`pool`]): OS worker threads with cooperative cancellation
//!
//! ## Example
//!
//! ```no_run
//! use serde_json::{json, Value};
//! use teststand::Station;
//!
//! #[tokio::main]
//! async fn main() -> teststand::Result<()> {
//!     let station = Station::builder()
//!         .test("fan", |_: Value, ctx| {
//!             if !ctx.sleep(std::time::Duration::from_secs(2)) {
//!                 return Ok(ctx.failed(json!({})));
//!             }
//!             Ok(ctx.passed(json!({"testResult": "OK"})))
//!         })
//!         .build()?;
//!
//!     station.serve(tokio::io::stdin(), tokio::io::stdout()).await?;
//!     station.shutdown();
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod link;
pub mod message;
pub mod pool;
pub mod protocol;
pub mod queue;
pub mod transport;

mod station;

pub use config::StationConfig;
pub use error::{Result, StationError};
pub use handler::TestContext;
pub use message::{Command, CommandType, Response};
pub use station::{Station, StationBuilder};
