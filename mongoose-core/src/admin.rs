//! Read-only introspection surface for an embedding application's admin
//! page or health check — queue depths and agent status, not control.

use std::sync::Arc;

use crate::agent::AgentStatus;
use crate::flow_manager::EventFlowManager;

#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct QueueSnapshot {
    pub name: String,
    pub len: usize,
    pub capacity: Option<usize>,
}

#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct AgentSnapshot {
    pub name: String,
    pub status: AgentStatus,
}

#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ServerSnapshot {
    pub queues: Vec<QueueSnapshot>,
    pub agents: Vec<AgentSnapshot>,
}

/// Read-only facade a server builds once it has wired its flow manager and
/// agents, exposing just enough to answer "what's running, what's backed
/// up" without handing out control of either.
pub struct AdminFacade {
    flow_manager: Arc<EventFlowManager>,
    agent_statuses: Vec<(String, Arc<std::sync::atomic::AtomicU8>)>,
}

impl AdminFacade {
    pub fn new(flow_manager: Arc<EventFlowManager>) -> Self {
        Self {
            flow_manager,
            agent_statuses: Vec::new(),
        }
    }

    pub fn register_agent(&mut self, name: impl Into<String>, status: Arc<std::sync::atomic::AtomicU8>) {
        self.agent_statuses.push((name.into(), status));
    }

    pub fn snapshot(&self) -> ServerSnapshot {
        let queues = self
            .flow_manager
            .reader_handles()
            .into_iter()
            .map(|reader| QueueSnapshot {
                name: format!("{:?}", reader.key()),
                len: reader.queue_len(),
                capacity: None,
            })
            .collect();

        let agents = self
            .agent_statuses
            .iter()
            .map(|(name, status)| AgentSnapshot {
                name: name.clone(),
                status: agent_status_from_u8(status.load(std::sync::atomic::Ordering::Acquire)),
            })
            .collect();

        ServerSnapshot { queues, agents }
    }
}

fn agent_status_from_u8(v: u8) -> AgentStatus {
    match v {
        0 => AgentStatus::Init,
        1 => AgentStatus::Starting,
        2 => AgentStatus::Running,
        3 => AgentStatus::Stopping,
        4 => AgentStatus::Stopped,
        _ => AgentStatus::Errored,
    }
}
