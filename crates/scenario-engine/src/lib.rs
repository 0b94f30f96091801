//! Declarative scenario schema, loader, factory registry, context,
//! dynamic-parameter sentinels, error taxonomy, and orchestrator for
//! trading-provider adapter integration tests.
//!
//! `ws-session` provides the live WebSocket transport; this crate only
//! ever sees it through [`event_source::EventSource`], so it can be
//! exercised entirely with scripted doubles (see [`testing`]).

pub mod context;
pub mod event_source;
pub mod loader;
pub mod orchestrator;
pub mod registry;
pub mod schema;
pub mod sentinel;
pub mod taxonomy;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use context::Context;
pub use event_source::{EventOccurrence, EventSource, EventSourceError, NullEventSource};
pub use loader::{ScenarioFile, ScenarioLoader};
pub use orchestrator::Orchestrator;
pub use registry::{
    ClassFactory, ConfigurationError, DispatchArgs, Invokable, InvokeError, MissingMethod,
    ProviderConfig, Registry,
};
pub use schema::{
    EnvironmentDescriptor, ExecutionResult, ExpectedEvent, ExpectedResult, Network, ParamMap,
    Scenario, SetupStep, ValidationConfig,
};
pub use sentinel::{MarketData, MarketDataError, Sentinel};
pub use taxonomy::OutcomeStatus;
