pub mod admin;
pub mod agent;
pub mod clock;
pub mod error;
pub mod event;
pub mod flow_manager;
pub mod ids;
pub mod invocation;
pub mod observability;
pub mod pool;
pub mod processor;
pub mod publisher;
pub mod queue;
pub mod reader;
pub mod retry;
pub mod scheduler;
pub mod services;

pub use agent::{spawn_composite_agent, AgentStatus, CompositeAgentHandle, IdleStrategy};
pub use error::{MongooseError, Result};
pub use event::{Envelope, Event, NamedFeedEvent, SlowConsumerStrategy, WrapStrategy};
pub use flow_manager::EventFlowManager;
pub use ids::{CallbackType, SourceName, SubscriptionKey};
pub use invocation::{
    Capability, EventHandler, GenericOnEventStrategy, InvocationStrategy, TypedInterfaceStrategy,
};
pub use processor::{Processor, ProcessorContext, ProcessorState};
pub use publisher::{MappedPublisher, Publisher};
pub use retry::RetryPolicy;
pub use services::ServiceRegistry;
