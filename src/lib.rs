//! Driver core for remote browser automation.
//!
//! The driver sits between a remote client speaking a structured command
//! protocol and a multi-process browser host. Commands are dispatched
//! against either the privileged (chrome) execution context, handled
//! in-process through narrow host interfaces, or the managed (content)
//! execution context, proxied over an asynchronous message-passing
//! transport and correlated back by command id.
//!
//! Everything runs on a single logical thread: concurrency is expressed
//! through suspension on futures, never parallel execution. Exactly one
//! top-level command is processed to completion at a time; while a handler
//! is suspended on a proxied call, inbound host messages (including modal
//! dialog interrupts) are routed for that command only.

pub mod browser;
pub mod capabilities;
pub mod conn;
pub mod context;
pub mod driver;
pub mod error;
pub mod frame;
pub mod host;
pub mod modal;
pub mod proxy;
pub mod runtime;
pub mod sandbox;

#[cfg(test)]
pub(crate) mod testutil;

pub use crate::context::Context;
pub use crate::conn::{MessageLink, SendError, Transport};
pub use crate::driver::Driver;
pub use crate::error::{DriverError, Result};
pub use crate::runtime::{DriverRuntime, ServerInfo};
