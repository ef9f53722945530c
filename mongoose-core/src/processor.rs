//! Processors: the user-supplied units of work hosted by the fabric. A
//! processor is started and stopped on the duty-cycle thread of the single
//! agent that hosts it, via `CompositeAgentHandle::start_processor`/
//! `stop_processor` — the same thread that drains that agent's readers, so
//! a processor and every reader it shares an agent with never run
//! concurrently with each other.

use std::sync::Arc;

use crate::clock::AgentClock;
use crate::error::Result;
use crate::flow_manager::EventFlowManager;
use crate::services::ServiceRegistry;

#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum ProcessorState {
    Init,
    Started,
    StartComplete,
    Stopped,
    TornDown,
}

/// Handed to a processor's lifecycle callbacks: everything it needs to
/// subscribe to sources, look up injected services, or read the current
/// dispatch-time clock, without holding a direct reference to the server.
pub struct ProcessorContext {
    pub flow_manager: Arc<EventFlowManager>,
    pub services: Arc<ServiceRegistry>,
    pub clock: Arc<AgentClock>,
}

impl ProcessorContext {
    pub fn new(
        flow_manager: Arc<EventFlowManager>,
        services: Arc<ServiceRegistry>,
        clock: Arc<AgentClock>,
    ) -> Self {
        Self {
            flow_manager,
            services,
            clock,
        }
    }
}

/// A unit of application logic hosted by the fabric. Implementations
/// register their subscriptions in `on_start` and release any held
/// resources in `on_stop`; both run in-line on the hosting agent's
/// duty-cycle thread, between two ticks of that agent's reader drain loop.
pub trait Processor: Send + Sync {
    fn name(&self) -> &str;

    fn on_start(&self, ctx: &ProcessorContext) -> Result<()> {
        let _ = ctx;
        Ok(())
    }

    fn on_stop(&self, ctx: &ProcessorContext) -> Result<()> {
        let _ = ctx;
        Ok(())
    }
}

/// Tracks one processor's lifecycle state and runs its callbacks, recording
/// state-machine violations rather than panicking on a misordered call.
pub struct ProcessorLifecycle {
    processor: Arc<dyn Processor>,
    state: ProcessorState,
}

impl ProcessorLifecycle {
    pub fn new(processor: Arc<dyn Processor>) -> Self {
        Self {
            processor,
            state: ProcessorState::Init,
        }
    }

    pub fn state(&self) -> ProcessorState {
        self.state
    }

    pub fn processor_name(&self) -> &str {
        self.processor.name()
    }

    pub fn start(&mut self, ctx: &ProcessorContext) -> Result<()> {
        if self.state != ProcessorState::Init {
            return Err(crate::error::MongooseError::InvalidState(
                "processor started from a state other than Init",
            ));
        }
        self.state = ProcessorState::Started;
        self.processor.on_start(ctx)?;
        self.state = ProcessorState::StartComplete;
        Ok(())
    }

    pub fn stop(&mut self, ctx: &ProcessorContext) -> Result<()> {
        if self.state != ProcessorState::StartComplete {
            return Err(crate::error::MongooseError::InvalidState(
                "processor stopped before reaching StartComplete",
            ));
        }
        self.processor.on_stop(ctx)?;
        self.state = ProcessorState::Stopped;
        Ok(())
    }

    pub fn tear_down(&mut self) {
        self.state = ProcessorState::TornDown;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;
    impl Processor for Noop {
        fn name(&self) -> &str {
            "noop"
        }
    }

    fn ctx() -> ProcessorContext {
        ProcessorContext::new(
            Arc::new(EventFlowManager::new()),
            Arc::new(ServiceRegistry::new()),
            Arc::new(AgentClock::new()),
        )
    }

    #[test]
    fn lifecycle_progresses_in_order() {
        let mut lifecycle = ProcessorLifecycle::new(Arc::new(Noop));
        assert_eq!(lifecycle.state(), ProcessorState::Init);
        lifecycle.start(&ctx()).unwrap();
        assert_eq!(lifecycle.state(), ProcessorState::StartComplete);
        lifecycle.stop(&ctx()).unwrap();
        assert_eq!(lifecycle.state(), ProcessorState::Stopped);
        lifecycle.tear_down();
        assert_eq!(lifecycle.state(), ProcessorState::TornDown);
    }

    #[test]
    fn stop_before_start_complete_is_rejected() {
        let mut lifecycle = ProcessorLifecycle::new(Arc::new(Noop));
        assert!(lifecycle.stop(&ctx()).is_err());
    }

    #[test]
    fn double_start_is_rejected() {
        let mut lifecycle = ProcessorLifecycle::new(Arc::new(Noop));
        lifecycle.start(&ctx()).unwrap();
        assert!(lifecycle.start(&ctx()).is_err());
    }
}
