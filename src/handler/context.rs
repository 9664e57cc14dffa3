//! Per-invocation context handed to test executors.
//!
//! Carries the command being served and its cancellation token, and builds
//! report responses under the right sub-command.
//!
//! # Example
//!
//! ```
//! use serde_json::{json, Value};
//! use teststand::handler::TestContext;
//! use teststand::message::CommandType;
//! use teststand::pool::CancellationToken;
//!
//! let ctx = TestContext::new(CommandType::SingleTest, 3, CancellationToken::new());
//! let report = ctx.passed(json!({"testResult": "OK"}));
//! assert_eq!(report.sub_command, 0x07);
//! ```

use std::time::{Duration, Instant};

use serde_json::Value;

use crate::message::{CommandType, Response};
use crate::pool::CancellationToken;

/// Longest single sleep between token polls in [`TestContext::sleep`].
const POLL_SLICE: Duration = Duration::from_millis(10);

/// Context passed to test executors on a worker thread.
///
/// Executors should call [`is_cancelled`](Self::is_cancelled) at every
/// natural boundary of their work and return promptly once it is true.
/// Whatever they return after cancellation is discarded.
#[derive(Debug, Clone)]
pub struct TestContext {
    command_type: CommandType,
    sequence: u16,
    token: CancellationToken,
}

impl TestContext {
    /// Create a context.
    pub fn new(command_type: CommandType, sequence: u16, token: CancellationToken) -> Self {
        Self {
            command_type,
            sequence,
            token,
        }
    }

    /// Command type being served.
    #[inline]
    pub fn command_type(&self) -> CommandType {
        self.command_type
    }

    /// Inbound sequence number of the command.
    #[inline]
    pub fn sequence(&self) -> u16 {
        self.sequence
    }

    /// Token for this invocation.
    #[inline]
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Check whether the invocation has been superseded.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Sleep up to `duration`, waking early on cancellation.
    ///
    /// Returns `false` if the token was cancelled.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_cancelled() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep((deadline - now).min(POLL_SLICE));
        }
    }

    /// Sub-command for this invocation's report.
    pub fn report_code(&self) -> i64 {
        self.command_type
            .report_code()
            .unwrap_or_else(|| self.command_type.code())
    }

    /// Build a report with an explicit verdict.
    pub fn report(&self, data: Value, passed: bool) -> Response {
        Response::report(self.report_code(), data, passed)
    }

    /// Build a passing report.
    pub fn passed(&self, data: Value) -> Response {
        self.report(data, true)
    }

    /// Build a failing report.
    pub fn failed(&self, data: Value) -> Response {
        self.report(data, false)
    }
}
