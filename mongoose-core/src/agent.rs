//! Composite agent: an OS thread running a duty cycle over a fixed group of
//! readers, in the style of an Aeron/Agrona `Agent` rather than an async
//! task — each agent owns its thread outright, so the per-agent clock
//! override in [`crate::clock`] can be a plain field instead of real
//! thread-local storage.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};

use crate::clock::AgentClock;
use crate::error::{MongooseError, Result};
use crate::flow_manager::EventFlowManager;
use crate::ids::SubscriptionKey;
use crate::observability::{ErrorEvent, ErrorSink, Severity};
use crate::processor::{Processor, ProcessorContext, ProcessorLifecycle};
use crate::reader::ReaderHandle;
use crate::services::ServiceRegistry;

const BATCH_LIMIT_PER_READER: usize = 64;

#[derive(Clone, Copy, Eq, PartialEq, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[repr(u8)]
pub enum AgentStatus {
    Init = 0,
    Starting = 1,
    Running = 2,
    Stopping = 3,
    Stopped = 4,
    Errored = 5,
}

impl AgentStatus {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => AgentStatus::Init,
            1 => AgentStatus::Starting,
            2 => AgentStatus::Running,
            3 => AgentStatus::Stopping,
            4 => AgentStatus::Stopped,
            _ => AgentStatus::Errored,
        }
    }
}

/// When every reader's queue is empty, how long the agent waits before
/// checking again. Busy-spin burns a core for lowest latency; yielding and
/// sleeping trade latency for CPU headroom.
#[derive(Clone, Copy, Debug)]
pub enum IdleStrategy {
    BusySpin,
    Yielding,
    Sleeping(Duration),
}

impl IdleStrategy {
    fn idle(&self, consecutive_idle_cycles: u32) {
        match self {
            IdleStrategy::BusySpin => std::hint::spin_loop(),
            IdleStrategy::Yielding => std::thread::yield_now(),
            IdleStrategy::Sleeping(base) => {
                let backoff = base.saturating_mul(consecutive_idle_cycles.min(8));
                std::thread::sleep(backoff.max(Duration::from_micros(1)));
            }
        }
    }
}

/// A control-plane command handed to the duty-cycle thread. Readers and
/// processors are added and removed this way rather than only at spawn
/// time, so a server can grow or shrink an agent's workload while it runs.
enum AgentCommand {
    AddReader(Arc<dyn ReaderHandle>),
    RemoveReader(SubscriptionKey),
    StartProcessor(Arc<dyn Processor>),
    StopProcessor(Arc<str>),
}

fn send_command(tx: &Sender<AgentCommand>, agent: &str, command: AgentCommand) -> Result<()> {
    tx.send(command).map_err(|_| MongooseError::Fatal {
        agent: agent.to_string(),
        message: "agent thread is no longer accepting commands".into(),
    })
}

/// Handle the embedding application holds to control a running agent's
/// thread from the outside.
pub struct CompositeAgentHandle {
    name: Arc<str>,
    status: Arc<AtomicU8>,
    command_tx: Sender<AgentCommand>,
    stop_tx: Sender<()>,
    join: Option<std::thread::JoinHandle<()>>,
}

impl CompositeAgentHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> AgentStatus {
        AgentStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    /// Hosts `reader` on this agent's duty cycle starting from the next
    /// tick. The agent's shared clock is installed on it before it is first
    /// drained, same as every reader passed in at spawn time.
    pub fn add_reader(&self, reader: Arc<dyn ReaderHandle>) -> Result<()> {
        send_command(&self.command_tx, &self.name, AgentCommand::AddReader(reader))
    }

    /// Stops hosting the reader subscribed under `key` as of the next tick.
    /// A no-op if no such reader is currently hosted.
    pub fn remove_reader(&self, key: SubscriptionKey) -> Result<()> {
        send_command(&self.command_tx, &self.name, AgentCommand::RemoveReader(key))
    }

    /// Starts `processor` on this agent's own thread: `on_start` runs
    /// in-line on the next duty-cycle tick, before that tick's readers are
    /// drained.
    pub fn start_processor(&self, processor: Arc<dyn Processor>) -> Result<()> {
        send_command(&self.command_tx, &self.name, AgentCommand::StartProcessor(processor))
    }

    /// Stops the processor registered under `name`, running its `on_stop`
    /// on this agent's thread. A no-op if no such processor is running.
    pub fn stop_processor(&self, name: impl Into<Arc<str>>) -> Result<()> {
        send_command(&self.command_tx, &self.name, AgentCommand::StopProcessor(name.into()))
    }

    /// Signals the agent to stop after its current duty-cycle iteration and
    /// blocks until its thread has exited.
    pub fn stop(mut self) -> Result<()> {
        let _ = self.stop_tx.send(());
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| MongooseError::Fatal {
                    agent: self.name.to_string(),
                    message: "agent thread panicked".into(),
                })?;
        }
        Ok(())
    }
}

impl Drop for CompositeAgentHandle {
    fn drop(&mut self) {
        if let Some(join) = self.join.take() {
            let _ = self.stop_tx.send(());
            let _ = join.join();
        }
    }
}

/// Spawns the agent's duty-cycle thread over `readers`, returning a handle
/// for external control. Each cycle drains a bounded batch from every
/// hosted reader in turn; if every reader came back empty, the configured
/// idle strategy runs before the next cycle.
///
/// All readers passed in here, and any added later via
/// [`CompositeAgentHandle::add_reader`], share one [`AgentClock`] instance
/// built for this agent — that is the clock `ProcessorContext` hands to any
/// processor this agent hosts, so a replay override installed while
/// dispatching one reader is visible to a processor reading the clock
/// directly on the same tick.
pub fn spawn_composite_agent(
    name: impl Into<Arc<str>>,
    readers: Vec<Arc<dyn ReaderHandle>>,
    idle_strategy: IdleStrategy,
    error_sink: ErrorSink,
    flow_manager: Arc<EventFlowManager>,
    services: Arc<ServiceRegistry>,
) -> CompositeAgentHandle {
    let name: Arc<str> = name.into();
    let status = Arc::new(AtomicU8::new(AgentStatus::Init as u8));
    let (stop_tx, stop_rx): (Sender<()>, Receiver<()>) = crossbeam_channel::bounded(1);
    let (command_tx, command_rx): (Sender<AgentCommand>, Receiver<AgentCommand>) =
        crossbeam_channel::unbounded();
    let clock = Arc::new(AgentClock::new());

    let thread_name = name.clone();
    let thread_status = status.clone();
    let join = std::thread::Builder::new()
        .name(thread_name.to_string())
        .spawn(move || {
            let ctx = ProcessorContext::new(flow_manager, services, clock.clone());
            run_duty_cycle(
                thread_name,
                readers,
                idle_strategy,
                error_sink,
                thread_status,
                stop_rx,
                command_rx,
                clock,
                ctx,
            )
        })
        .expect("failed to spawn agent thread");

    CompositeAgentHandle {
        name,
        status,
        command_tx,
        stop_tx,
        join: Some(join),
    }
}

fn apply_commands(
    command_rx: &Receiver<AgentCommand>,
    readers: &mut Vec<Arc<dyn ReaderHandle>>,
    processors: &mut Vec<ProcessorLifecycle>,
    clock: &Arc<AgentClock>,
    ctx: &ProcessorContext,
    name: &str,
    error_sink: &ErrorSink,
) {
    for command in command_rx.try_iter() {
        match command {
            AgentCommand::AddReader(reader) => {
                reader.set_clock(clock.clone());
                readers.push(reader);
            }
            AgentCommand::RemoveReader(key) => {
                readers.retain(|r| r.key() != &key);
            }
            AgentCommand::StartProcessor(processor) => {
                let mut lifecycle = ProcessorLifecycle::new(processor);
                if let Err(err) = lifecycle.start(ctx) {
                    error_sink.record(ErrorEvent {
                        severity: Severity::Error,
                        source: Arc::from(name),
                        message: format!("processor failed to start: {err}"),
                        occurred_at_micros: clock.now_micros(),
                        correlation_id: None,
                    });
                }
                processors.push(lifecycle);
            }
            AgentCommand::StopProcessor(processor_name) => {
                if let Some(pos) = processors
                    .iter()
                    .position(|p| p.processor_name() == processor_name.as_ref())
                {
                    let mut lifecycle = processors.remove(pos);
                    if let Err(err) = lifecycle.stop(ctx) {
                        error_sink.record(ErrorEvent {
                            severity: Severity::Error,
                            source: Arc::from(name),
                            message: format!("processor failed to stop cleanly: {err}"),
                            occurred_at_micros: clock.now_micros(),
                            correlation_id: None,
                        });
                    }
                    lifecycle.tear_down();
                }
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn run_duty_cycle(
    name: Arc<str>,
    mut readers: Vec<Arc<dyn ReaderHandle>>,
    idle_strategy: IdleStrategy,
    error_sink: ErrorSink,
    status: Arc<AtomicU8>,
    stop_rx: Receiver<()>,
    command_rx: Receiver<AgentCommand>,
    clock: Arc<AgentClock>,
    ctx: ProcessorContext,
) {
    status.store(AgentStatus::Starting as u8, Ordering::Release);
    for reader in &readers {
        reader.set_clock(clock.clone());
    }
    let mut processors: Vec<ProcessorLifecycle> = Vec::new();
    status.store(AgentStatus::Running as u8, Ordering::Release);

    let mut consecutive_idle = 0u32;
    loop {
        if stop_rx.try_recv().is_ok() {
            break;
        }

        apply_commands(&command_rx, &mut readers, &mut processors, &clock, &ctx, &name, &error_sink);

        let mut did_work = false;
        for reader in &readers {
            match reader.drain_batch(BATCH_LIMIT_PER_READER) {
                Ok(n) if n > 0 => did_work = true,
                Ok(_) => {}
                Err(err) => {
                    error_sink.record(ErrorEvent {
                        severity: Severity::Error,
                        source: name.clone(),
                        message: err.to_string(),
                        occurred_at_micros: clock.now_micros(),
                        correlation_id: None,
                    });
                }
            }
        }

        if did_work {
            consecutive_idle = 0;
        } else {
            consecutive_idle = consecutive_idle.saturating_add(1);
            idle_strategy.idle(consecutive_idle);
        }
    }

    status.store(AgentStatus::Stopping as u8, Ordering::Release);
    for mut lifecycle in processors {
        let _ = lifecycle.stop(&ctx);
        lifecycle.tear_down();
    }
    status.store(AgentStatus::Stopped as u8, Ordering::Release);
}
