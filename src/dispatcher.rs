//! Command routing and generation cancellation.
//!
//! The dispatcher pops commands from the [`CommandQueue`] on its own thread
//! and routes them in two levels: first by command type, then, for test
//! invocations, through the [`ExecutorRegistry`].
//!
//! Session-control commands (handshake, begin-test, end-test) cancel the
//! current generation before they are acknowledged: the generation's parent
//! token is cancelled and replaced, and every outstanding task token is
//! cancelled and forgotten.
//!
//! The generation lock is held both while the parent token is cancelled and
//! while a finished test checks its token and queues its report. A report is
//! therefore either queued before the session-control acknowledgement or not
//! at all.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde_json::{json, Value};

use crate::config::StationIdentity;
use crate::error::Result;
use crate::handler::{ExecutorRegistry, TestContext};
use crate::link::Link;
use crate::message::{Command, CommandType, Response};
use crate::pool::{CancellationToken, TokenSet, WorkerPool};
use crate::queue::CommandQueue;

/// Hook applied for set-system-time commands, run on a worker thread.
pub type TimeHook = Arc<dyn Fn(&Value) -> Result<()> + Send + Sync>;

/// Routes decoded commands to acknowledgements and test executors.
pub struct Dispatcher {
    link: Arc<Link>,
    pool: Arc<WorkerPool>,
    registry: Arc<ExecutorRegistry>,
    identity: StationIdentity,
    generation: Arc<Mutex<CancellationToken>>,
    outstanding: Arc<TokenSet>,
    time_hook: Option<TimeHook>,
}

impl Dispatcher {
    /// Create a dispatcher.
    pub fn new(
        link: Arc<Link>,
        pool: Arc<WorkerPool>,
        registry: Arc<ExecutorRegistry>,
        identity: StationIdentity,
    ) -> Self {
        Self {
            link,
            pool,
            registry,
            identity,
            generation: Arc::new(Mutex::new(CancellationToken::new())),
            outstanding: Arc::new(TokenSet::new()),
            time_hook: None,
        }
    }

    /// Run `hook` for every set-system-time command.
    pub fn with_time_hook(mut self, hook: TimeHook) -> Self {
        self.time_hook = Some(hook);
        self
    }

    fn generation(&self) -> MutexGuard<'_, CancellationToken> {
        lock_generation(&self.generation)
    }

    /// Tests submitted in the current generation that have not finished.
    pub fn outstanding(&self) -> usize {
        self.outstanding.len()
    }

    /// Cancel every in-flight test and open a new generation.
    ///
    /// Returns the number of outstanding task tokens cancelled.
    pub fn cancel_generation(&self) -> usize {
        {
            let mut generation = self.generation();
            generation.cancel();
            *generation = CancellationToken::new();
        }
        self.outstanding.cancel_all()
    }

    /// Route one command.
    pub fn dispatch(&self, command: Command) {
        let Some(command_type) = command.command_type else {
            tracing::warn!("Dropping frame {} without subCommand", command.sequence);
            return;
        };

        match command_type {
            CommandType::Handshake | CommandType::BeginTest | CommandType::EndTest => {
                let cancelled = self.cancel_generation();
                if cancelled > 0 {
                    tracing::info!("{:?} cancelled {} running tests", command_type, cancelled);
                }
                let data = if command_type == CommandType::Handshake {
                    json!({"model": self.identity.model, "version": self.identity.version})
                } else {
                    Value::Null
                };
                self.ack(command_type, data, command.sequence);
            }
            CommandType::SetSystemTime => {
                self.ack(command_type, Value::Null, command.sequence);
                self.set_system_time(command.payload);
            }
            CommandType::SingleTest | CommandType::ExecOrder | CommandType::CombinedTest => {
                self.start_test(command_type, command);
            }
            CommandType::Other(code) => {
                tracing::warn!("Unknown command {:#04x} in frame {}", code, command.sequence);
            }
        }
    }

    fn ack(&self, command_type: CommandType, data: Value, sequence: u16) {
        if let Err(e) = self.link.send_ack(&Response::ack(command_type, data), sequence) {
            tracing::error!("Failed to queue ack for frame {}: {}", sequence, e);
        }
    }

    fn set_system_time(&self, payload: Value) {
        let Some(hook) = self.time_hook.clone() else {
            tracing::debug!("No time hook installed, ignoring {}", payload);
            return;
        };
        let submitted = self.pool.submit(move || {
            if let Err(e) = hook(&payload) {
                tracing::warn!("Setting system time failed: {}", e);
            }
        });
        if let Err(e) = submitted {
            tracing::warn!("Could not schedule system time update: {}", e);
        }
    }

    fn start_test(&self, command_type: CommandType, command: Command) {
        let executor = match self.registry.resolve(&command) {
            Ok(executor) => executor,
            Err(e) => {
                tracing::warn!("Dropping frame {}: {}", command.sequence, e);
                return;
            }
        };

        self.ack(command_type, Value::Null, command.sequence);

        let token = self.generation().child_token();
        let guard = self.outstanding.insert(token.clone());
        let ctx = TestContext::new(command_type, command.sequence, token.clone());
        let link = Arc::clone(&self.link);
        let generation = Arc::clone(&self.generation);
        let payload = command.payload;
        let sequence = command.sequence;

        let submitted = self.pool.submit_with_token(token, move |token| {
            let _guard = guard;
            let result = executor.execute(&payload, &ctx);
            let response = match result {
                Ok(response) => response,
                Err(e) => {
                    tracing::warn!("Test for frame {} failed: {}", sequence, e);
                    ctx.failed(payload).with_desc(e.to_string())
                }
            };

            // cancel_generation takes the same lock
            let _generation = lock_generation(&generation);
            if token.is_cancelled() {
                tracing::debug!("Test for frame {} cancelled, report discarded", sequence);
                return;
            }
            if let Err(e) = link.send_report(&response) {
                tracing::error!("Failed to queue report for frame {}: {}", sequence, e);
            }
        });

        if let Err(e) = submitted {
            tracing::warn!("Could not schedule test for frame {}: {}", sequence, e);
        }
    }

    /// Pop and dispatch commands until `running` clears or the queue closes.
    pub fn run(&self, commands: &CommandQueue, poll: Duration, running: &AtomicBool) {
        while running.load(Ordering::Acquire) {
            match commands.pop_timeout(poll) {
                Some(command) => self.dispatch(command),
                None if commands.is_closed() => break,
                None => {}
            }
        }
    }

    /// Run the dispatch loop on a dedicated thread.
    pub fn spawn(
        self: Arc<Self>,
        commands: Arc<CommandQueue>,
        poll: Duration,
    ) -> Result<DispatcherHandle> {
        let running = Arc::new(AtomicBool::new(true));
        let thread = {
            let running = Arc::clone(&running);
            thread::Builder::new()
                .name("teststand-dispatch".into())
                .spawn(move || {
                    tracing::debug!("Dispatcher started");
                    self.run(&commands, poll, &running);
                    tracing::debug!("Dispatcher stopped");
                })?
        };

        Ok(DispatcherHandle {
            running,
            thread: Some(thread),
        })
    }
}

fn lock_generation(generation: &Mutex<CancellationToken>) -> MutexGuard<'_, CancellationToken> {
    generation.lock().unwrap_or_else(PoisonError::into_inner)
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("registry", &self.registry)
            .field("outstanding", &self.outstanding.len())
            .finish()
    }
}

/// Stops and joins the dispatch thread.
#[derive(Debug)]
pub struct DispatcherHandle {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl DispatcherHandle {
    /// Signal the loop to stop and wait for it. Idempotent.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("Dispatcher thread exited by panic");
            }
        }
    }
}

impl Drop for DispatcherHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
