//! Executor registry for second-level test routing.
//!
//! Single-test (0x05) and combined-test (0x0F) commands select an executor by
//! the string tag in `data.type`; exec-order (0x0D) commands select one by the
//! integer in `data.order`. Each tagged command type has its own table.
//!
//! Tag resolution tries an exact match first, then substring patterns in
//! registration order, so a pattern `"usb"` catches `"usb2.0"` and
//! `"usb3_front"` alike.
//!
//! # Example
//!
//! ```
//! use serde_json::{json, Value};
//! use teststand::handler::ExecutorRegistry;
//! use teststand::message::{Command, CommandType};
//!
//! let mut registry = ExecutorRegistry::new();
//! registry.register(CommandType::SingleTest, "wifi", |_: Value, ctx| Ok(ctx.passed(json!({}))));
//! registry.register_pattern(CommandType::SingleTest, "usb", |_: Value, ctx| Ok(ctx.passed(json!({}))));
//!
//! let usb = Command::new(CommandType::SingleTest, 1, json!({"type": "usb3_front"}));
//! assert!(registry.resolve(&usb).is_ok());
//! ```

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use super::TestContext;
use crate::error::{Result, StationError};
use crate::message::{Command, CommandType, Response};

/// A test routine invoked on a worker thread.
///
/// Implementations must poll [`TestContext::is_cancelled`] and return
/// promptly once it is true.
pub trait TestExecutor: Send + Sync + 'static {
    /// Run the test against the command payload.
    fn execute(&self, payload: &Value, ctx: &TestContext) -> Result<Response>;
}

/// Wrapper that deserializes the payload before calling the executor.
pub struct TypedExecutor<F, T>
where
    F: Fn(T, &TestContext) -> Result<Response> + Send + Sync + 'static,
    T: DeserializeOwned + Send + 'static,
{
    executor: F,
    _phantom: PhantomData<fn(T)>,
}

impl<F, T> TypedExecutor<F, T>
where
    F: Fn(T, &TestContext) -> Result<Response> + Send + Sync + 'static,
    T: DeserializeOwned + Send + 'static,
{
    /// Create a new typed executor.
    pub fn new(executor: F) -> Self {
        Self {
            executor,
            _phantom: PhantomData,
        }
    }
}

impl<F, T> TestExecutor for TypedExecutor<F, T>
where
    F: Fn(T, &TestContext) -> Result<Response> + Send + Sync + 'static,
    T: DeserializeOwned + Send + 'static,
{
    fn execute(&self, payload: &Value, ctx: &TestContext) -> Result<Response> {
        let parsed: T = serde_json::from_value(payload.clone())?;
        (self.executor)(parsed, ctx)
    }
}

#[derive(Default)]
struct TagTable {
    exact: HashMap<String, Arc<dyn TestExecutor>>,
    patterns: Vec<(String, Arc<dyn TestExecutor>)>,
}

impl TagTable {
    fn resolve(&self, tag: &str) -> Option<&Arc<dyn TestExecutor>> {
        self.exact.get(tag).or_else(|| {
            self.patterns
                .iter()
                .find(|(fragment, _)| tag.contains(fragment.as_str()))
                .map(|(_, executor)| executor)
        })
    }

    fn len(&self) -> usize {
        self.exact.len() + self.patterns.len()
    }
}

/// Maps command payloads to test executors.
#[derive(Default)]
pub struct ExecutorRegistry {
    tagged: HashMap<CommandType, TagTable>,
    orders: HashMap<i64, Arc<dyn TestExecutor>>,
}

impl ExecutorRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an executor for an exact `data.type` tag.
    ///
    /// Re-registering a tag replaces the previous executor.
    pub fn register<F, T>(&mut self, command_type: CommandType, tag: &str, executor: F)
    where
        F: Fn(T, &TestContext) -> Result<Response> + Send + Sync + 'static,
        T: DeserializeOwned + Send + 'static,
    {
        self.register_executor(command_type, tag, TypedExecutor::new(executor));
    }

    /// Register a [`TestExecutor`] implementation for an exact tag.
    pub fn register_executor<E: TestExecutor>(
        &mut self,
        command_type: CommandType,
        tag: &str,
        executor: E,
    ) {
        self.tagged
            .entry(command_type)
            .or_default()
            .exact
            .insert(tag.to_string(), Arc::new(executor));
    }

    /// Register an executor for any tag containing `fragment`.
    ///
    /// Patterns are consulted after exact tags, earliest registration first.
    pub fn register_pattern<F, T>(&mut self, command_type: CommandType, fragment: &str, executor: F)
    where
        F: Fn(T, &TestContext) -> Result<Response> + Send + Sync + 'static,
        T: DeserializeOwned + Send + 'static,
    {
        self.tagged
            .entry(command_type)
            .or_default()
            .patterns
            .push((fragment.to_string(), Arc::new(TypedExecutor::new(executor))));
    }

    /// Register an executor for an exec-order number.
    pub fn register_order<F, T>(&mut self, order: i64, executor: F)
    where
        F: Fn(T, &TestContext) -> Result<Response> + Send + Sync + 'static,
        T: DeserializeOwned + Send + 'static,
    {
        self.orders
            .insert(order, Arc::new(TypedExecutor::new(executor)));
    }

    /// Number of registered routes.
    pub fn len(&self) -> usize {
        self.tagged.values().map(TagTable::len).sum::<usize>() + self.orders.len()
    }

    /// Check if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Find the executor for a test-invocation command.
    ///
    /// # Errors
    ///
    /// - `UnknownCommand` if the command is not a test invocation
    /// - `UnknownTest` if no executor matches its tag or order
    pub fn resolve(&self, command: &Command) -> Result<Arc<dyn TestExecutor>> {
        let command_type = match command.command_type {
            Some(t) if t.is_test_invocation() => t,
            Some(t) => return Err(StationError::UnknownCommand(t.code())),
            None => return Err(StationError::Protocol("command has no subCommand".into())),
        };

        if command_type == CommandType::ExecOrder {
            let order = command
                .exec_order()
                .ok_or_else(|| StationError::UnknownTest("missing data.order".into()))?;
            return self
                .orders
                .get(&order)
                .cloned()
                .ok_or_else(|| StationError::UnknownTest(format!("order {}", order)));
        }

        let tag = command
            .test_tag()
            .ok_or_else(|| StationError::UnknownTest("missing data.type".into()))?;
        self.tagged
            .get(&command_type)
            .and_then(|table| table.resolve(tag))
            .cloned()
            .ok_or_else(|| StationError::UnknownTest(tag.to_string()))
    }
}

impl std::fmt::Debug for ExecutorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutorRegistry")
            .field("routes", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::CancellationToken;
    use serde::Deserialize;
    use serde_json::json;

    fn ctx(command_type: CommandType) -> TestContext {
        TestContext::new(command_type, 1, CancellationToken::new())
    }

    fn run(registry: &ExecutorRegistry, command: &Command) -> Response {
        let executor = registry.resolve(command).unwrap();
        executor
            .execute(&command.payload, &ctx(command.command_type.unwrap()))
            .unwrap()
    }

    #[test]
    fn test_exact_tag_wins_over_pattern() {
        let mut registry = ExecutorRegistry::new();
        registry.register_pattern(CommandType::SingleTest, "usb", |_: Value, ctx| {
            Ok(ctx.passed(json!("pattern")))
        });
        registry.register(CommandType::SingleTest, "usb2.0", |_: Value, ctx| {
            Ok(ctx.passed(json!("exact")))
        });

        let exact = Command::new(CommandType::SingleTest, 1, json!({"type": "usb2.0"}));
        let fuzzy = Command::new(CommandType::SingleTest, 2, json!({"type": "usb3.0"}));
        assert_eq!(run(&registry, &exact).data, json!("exact"));
        assert_eq!(run(&registry, &fuzzy).data, json!("pattern"));
    }

    #[test]
    fn test_patterns_checked_in_registration_order() {
        let mut registry = ExecutorRegistry::new();
        registry.register_pattern(CommandType::SingleTest, "net", |_: Value, ctx| {
            Ok(ctx.passed(json!(1)))
        });
        registry.register_pattern(CommandType::SingleTest, "ether", |_: Value, ctx| {
            Ok(ctx.passed(json!(2)))
        });

        let command = Command::new(CommandType::SingleTest, 1, json!({"type": "ethernet"}));
        assert_eq!(run(&registry, &command).data, json!(1));
    }

    #[test]
    fn test_tables_are_per_command_type() {
        let mut registry = ExecutorRegistry::new();
        registry.register(CommandType::CombinedTest, "net", |_: Value, ctx| {
            Ok(ctx.passed(json!({})))
        });

        let single = Command::new(CommandType::SingleTest, 1, json!({"type": "net"}));
        let combined = Command::new(CommandType::CombinedTest, 1, json!({"type": "net"}));
        assert!(matches!(
            registry.resolve(&single),
            Err(StationError::UnknownTest(_))
        ));
        assert_eq!(run(&registry, &combined).sub_command, 0x10);
    }

    #[test]
    fn test_exec_order_routing() {
        let mut registry = ExecutorRegistry::new();
        registry.register_order(4, |_: Value, ctx| Ok(ctx.passed(json!("gpio"))));

        let gpio = Command::new(CommandType::ExecOrder, 1, json!({"order": 4}));
        let manual = Command::new(CommandType::ExecOrder, 1, json!({"order": 5}));
        assert_eq!(run(&registry, &gpio).data, json!("gpio"));
        assert!(matches!(
            registry.resolve(&manual),
            Err(StationError::UnknownTest(_))
        ));
    }

    #[test]
    fn test_typed_payload() {
        #[derive(Deserialize)]
        struct FanPayload {
            speed: u32,
        }

        let mut registry = ExecutorRegistry::new();
        registry.register(CommandType::SingleTest, "fan", |p: FanPayload, ctx| {
            Ok(ctx.report(json!({"speed": p.speed}), p.speed > 100))
        });

        let command = Command::new(
            CommandType::SingleTest,
            1,
            json!({"type": "fan", "speed": 300}),
        );
        let response = run(&registry, &command);
        assert!(response.passed);

        let bad = Command::new(CommandType::SingleTest, 1, json!({"type": "fan"}));
        let executor = registry.resolve(&bad).unwrap();
        assert!(matches!(
            executor.execute(&bad.payload, &ctx(CommandType::SingleTest)),
            Err(StationError::Json(_))
        ));
    }

    #[test]
    fn test_non_invocation_rejected() {
        let registry = ExecutorRegistry::new();
        let command = Command::new(CommandType::BeginTest, 1, Value::Null);
        assert!(matches!(
            registry.resolve(&command),
            Err(StationError::UnknownCommand(0x02))
        ));
    }

    #[test]
    fn test_len_counts_routes() {
        let mut registry = ExecutorRegistry::new();
        assert!(registry.is_empty());
        registry.register(CommandType::SingleTest, "a", |_: Value, ctx| Ok(ctx.passed(Value::Null)));
        registry.register_pattern(CommandType::SingleTest, "b", |_: Value, ctx| {
            Ok(ctx.passed(Value::Null))
        });
        registry.register_order(2, |_: Value, ctx| Ok(ctx.passed(Value::Null)));
        assert_eq!(registry.len(), 3);
    }
}
