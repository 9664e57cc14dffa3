//! Station builder and runtime lifecycle.
//!
//! The [`StationBuilder`] provides a fluent API for registering test
//! executors and tuning the pipeline. [`StationBuilder::build`] wires up:
//! 1. the command queue and the link (decoder + outbound backlog)
//! 2. the worker pool
//! 3. the dispatcher thread
//!
//! Bytes then enter through [`Station::feed`] or [`Station::serve`], and
//! encoded frames leave through [`Station::drain`] or the serve writer task.
//!
//! # Example
//!
//! ```no_run
//! use serde_json::{json, Value};
//! use teststand::Station;
//!
//! #[tokio::main]
//! async fn main() -> teststand::Result<()> {
//!     let station = Station::builder()
//!         .test("rtc", |_: Value, ctx| Ok(ctx.passed(json!({"testResult": "OK"}))))
//!         .exec_order(4, |_: Value, ctx| Ok(ctx.failed(json!({}))))
//!         .worker_count(4)
//!         .build()?;
//!
//!     station.serve(tokio::io::stdin(), tokio::io::stdout()).await?;
//!     station.shutdown();
//!     Ok(())
//! }
//! ```

use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::config::{DuplicatePolicy, OverflowPolicy, StationConfig, StationIdentity};
use crate::dispatcher::{Dispatcher, DispatcherHandle, TimeHook};
use crate::error::Result;
use crate::handler::{ExecutorRegistry, TestContext};
use crate::link::Link;
use crate::message::{CommandType, Response};
use crate::pool::WorkerPool;
use crate::protocol::DecoderStats;
use crate::queue::CommandQueue;
use crate::transport::{read_loop, spawn_writer_task};

/// Builder for configuring and creating a station.
pub struct StationBuilder {
    config: StationConfig,
    registry: ExecutorRegistry,
    time_hook: Option<TimeHook>,
}

impl StationBuilder {
    /// Create a builder with default configuration and no executors.
    pub fn new() -> Self {
        Self {
            config: StationConfig::default(),
            registry: ExecutorRegistry::new(),
            time_hook: None,
        }
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: StationConfig) -> Self {
        self.config = config;
        self
    }

    /// Register a single-test (0x05) executor for an exact `data.type` tag.
    pub fn test<F, T>(mut self, tag: &str, executor: F) -> Self
    where
        F: Fn(T, &TestContext) -> Result<Response> + Send + Sync + 'static,
        T: DeserializeOwned + Send + 'static,
    {
        self.registry.register(CommandType::SingleTest, tag, executor);
        self
    }

    /// Register a single-test executor for every tag containing `fragment`.
    pub fn test_pattern<F, T>(mut self, fragment: &str, executor: F) -> Self
    where
        F: Fn(T, &TestContext) -> Result<Response> + Send + Sync + 'static,
        T: DeserializeOwned + Send + 'static,
    {
        self.registry
            .register_pattern(CommandType::SingleTest, fragment, executor);
        self
    }

    /// Register a combined-test (0x0F) executor for an exact tag.
    pub fn combined_test<F, T>(mut self, tag: &str, executor: F) -> Self
    where
        F: Fn(T, &TestContext) -> Result<Response> + Send + Sync + 'static,
        T: DeserializeOwned + Send + 'static,
    {
        self.registry
            .register(CommandType::CombinedTest, tag, executor);
        self
    }

    /// Register an exec-order (0x0D) executor.
    pub fn exec_order<F, T>(mut self, order: i64, executor: F) -> Self
    where
        F: Fn(T, &TestContext) -> Result<Response> + Send + Sync + 'static,
        T: DeserializeOwned + Send + 'static,
    {
        self.registry.register_order(order, executor);
        self
    }

    /// Run `hook` on a worker for every set-system-time (0x0A) command.
    pub fn time_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Value) -> Result<()> + Send + Sync + 'static,
    {
        self.time_hook = Some(Arc::new(hook));
        self
    }

    /// Set the number of worker threads.
    ///
    /// Default: 8
    pub fn worker_count(mut self, count: usize) -> Self {
        self.config.worker_count = count;
        self
    }

    /// Set the command queue bound and overflow policy.
    ///
    /// Default: 64, reject
    pub fn command_queue(mut self, capacity: usize, policy: OverflowPolicy) -> Self {
        self.config.queue_capacity = capacity;
        self.config.overflow_policy = policy;
        self
    }

    /// Set the inbound ring capacity.
    ///
    /// Default: 4096 bytes
    pub fn ring_capacity(mut self, capacity: usize) -> Self {
        self.config.ring_capacity = capacity;
        self
    }

    /// Set the repeated-sequence policy.
    ///
    /// Default: accept
    pub fn duplicate_policy(mut self, policy: DuplicatePolicy) -> Self {
        self.config.duplicate_policy = policy;
        self
    }

    /// Prefix outbound content with the legacy 0x04 marker byte.
    pub fn legacy_content_marker(mut self, enabled: bool) -> Self {
        self.config.legacy_content_marker = enabled;
        self
    }

    /// Set the identity reported in handshake acknowledgements.
    pub fn identity(mut self, model: &str, version: &str) -> Self {
        self.config.identity = StationIdentity {
            model: model.to_string(),
            version: version.to_string(),
        };
        self
    }

    /// Spawn the worker pool and dispatcher thread.
    ///
    /// # Errors
    ///
    /// Returns `Config` for an unusable configuration, or `Io` if a thread
    /// cannot be spawned.
    pub fn build(self) -> Result<Station> {
        Station::start(self.config, self.registry, self.time_hook)
    }
}

impl Default for StationBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A running station.
pub struct Station {
    config: StationConfig,
    commands: Arc<CommandQueue>,
    link: Arc<Link>,
    pool: Arc<WorkerPool>,
    dispatcher: Arc<Dispatcher>,
    dispatch_thread: Mutex<Option<DispatcherHandle>>,
}

impl Station {
    /// Create a new station builder.
    pub fn builder() -> StationBuilder {
        StationBuilder::new()
    }

    fn start(
        config: StationConfig,
        registry: ExecutorRegistry,
        time_hook: Option<TimeHook>,
    ) -> Result<Self> {
        config.validate()?;

        let commands = Arc::new(CommandQueue::new(
            config.queue_capacity,
            config.overflow_policy,
        ));
        let link = Arc::new(Link::new(&config, Arc::clone(&commands)));
        let pool = Arc::new(WorkerPool::new(config.worker_count)?);

        let mut dispatcher = Dispatcher::new(
            Arc::clone(&link),
            Arc::clone(&pool),
            Arc::new(registry),
            config.identity.clone(),
        );
        if let Some(hook) = time_hook {
            dispatcher = dispatcher.with_time_hook(hook);
        }
        let dispatcher = Arc::new(dispatcher);
        let handle = Arc::clone(&dispatcher).spawn(Arc::clone(&commands), config.dispatch_poll())?;

        tracing::info!(
            "Station {} {} started ({} workers)",
            config.identity.model,
            config.identity.version,
            pool.size()
        );

        Ok(Self {
            config,
            commands,
            link,
            pool,
            dispatcher,
            dispatch_thread: Mutex::new(Some(handle)),
        })
    }

    /// Active configuration.
    pub fn config(&self) -> &StationConfig {
        &self.config
    }

    /// The transport-facing link.
    pub fn link(&self) -> &Arc<Link> {
        &self.link
    }

    /// Push inbound bytes. Returns the number of commands queued.
    pub fn feed(&self, bytes: &[u8]) -> Result<usize> {
        self.link.feed(bytes)
    }

    /// Pop the next encoded outbound frame.
    pub fn drain(&self) -> Option<Bytes> {
        self.link.drain()
    }

    /// Cancel every in-flight test, as a begin-test command would.
    pub fn cancel_all(&self) -> usize {
        self.dispatcher.cancel_generation()
    }

    /// Tests in the current generation that have not finished.
    pub fn outstanding_tests(&self) -> usize {
        self.dispatcher.outstanding()
    }

    /// Decoder counters.
    pub fn stats(&self) -> DecoderStats {
        self.link.stats()
    }

    /// Pump a byte stream until the reader reaches EOF.
    ///
    /// Outbound frames are written by a spawned writer task. When the reader
    /// ends, the outbound backlog is closed and flushed before returning;
    /// reports produced afterwards are dropped.
    pub async fn serve<R, W>(&self, reader: R, writer: W) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let writer_task = spawn_writer_task(writer, Arc::clone(&self.link));
        let read_result = read_loop(reader, Arc::clone(&self.link), self.config.read_buffer_size).await;

        self.link.close();
        let write_result = match writer_task.await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!("Writer task failed: {}", e);
                Ok(())
            }
        };

        read_result.and(write_result)
    }

    /// Stop dispatching, cancel running tests and join every thread.
    ///
    /// Blocks until running executors observe cancellation. Idempotent.
    pub fn shutdown(&self) {
        let handle = self
            .dispatch_thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(mut handle) = handle else {
            return;
        };

        handle.stop();
        self.dispatcher.cancel_generation();
        let dropped = self.commands.clear();
        self.commands.close();
        self.pool.shutdown();
        self.link.close();

        tracing::info!("Station stopped ({} queued commands dropped)", dropped);
    }
}

impl Drop for Station {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Station {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Station")
            .field("link", &self.link)
            .field("pool", &self.pool)
            .field("dispatcher", &self.dispatcher)
            .finish()
    }
}
