//! Control-panel side of the stream daemon: talks to the HTTP API, follows
//! the status push channel and reconciles optimistic UI state with it.

pub mod client;
pub mod error;
pub mod intent;
pub mod log;
pub mod reconcile;
pub mod sse;
