//! Request orchestration for the Lingualink gateway.
//!
//! The [`Dispatcher`] drives one upload through the full data path:
//! credential verification, audio normalization, prompt construction,
//! backend selection, the upstream chat-completions call with retry, and
//! cleanup. The [`Operator`] is the in-process control surface the HTTP
//! boundary uses to inspect and mutate the pool at runtime. Both hang
//! off one [`AppContext`] built once at startup.

mod context;
mod dispatcher;
mod operator;
mod prompt;
mod upstream;

pub use context::AppContext;
pub use dispatcher::{
    AudioUpload, DispatchOutcome, DispatchRequest, Dispatcher, DispatcherConfig,
};
pub use operator::{BackendsOverview, Operator, PoolStatus, ProbeReport, StrategyInfo, StrategyUpdate};
pub use prompt::build_system_prompt;
pub use upstream::{ChatClient, ChatRequest, ChatResponse};
