//! Structured-generation core: admission control, retry policy, request and batch executors,
//! the dispatcher that combines them, and the in-memory task store.
pub mod admission;
pub use admission::{AdmissionController, AdmissionError, Permit};

pub mod config;
pub use config::LensConfig;

pub mod dispatch;
pub use dispatch::{
    BatchExecutor, DispatchEvent, DispatchEventKind, Dispatcher, DispatcherBuilder, EventBus,
    RequestExecutor, Subscribe,
};

mod error;
pub use error::{GenerationError, StoreError};

mod request;
pub use request::GenerationRequest;

pub mod retry;
pub use retry::{RetryPolicy, RetryState, RetryStep};

pub mod state;
pub use state::TaskStore;

pub mod upstream;
pub use upstream::{BatchHandle, BatchState, BatchStatus, Completion, FinishReason, Upstream};

#[cfg(any(test, feature = "test-util"))]
pub mod testing;
