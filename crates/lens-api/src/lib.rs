//! Caller-facing surface of the tool server: the [`ApiHandler`] seam, the runner-backed adapter
//! and, behind the `http` feature, the axum router.
mod error;
pub use error::ApiError;

mod handler;
pub use handler::ApiHandler;

mod adapter;
pub use adapter::RunnerApiAdapter;

#[cfg(feature = "http")]
mod http;

#[cfg(feature = "http")]
pub use http::HttpApi;

#[cfg(feature = "http")]
pub use axum;
