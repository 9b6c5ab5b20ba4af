//! Single-owner-thread event reactor.
//!
//! One thread owns a [`Center`] and drives it by calling
//! [`run_once`](Center::run_once) in a loop. Each iteration waits on a
//! pluggable [`Driver`] for I/O readiness, fires timers that came due, and
//! drains one batch of callbacks submitted by other threads. Everything the
//! loop touches except the external submission queue belongs exclusively to
//! the owning thread.

mod callback;
mod center;
mod driver;
mod external;
mod poll;
mod timers;

pub use callback::{CallbackHandle, EventCallback};
pub use center::{Center, OwnError};
pub use driver::{Driver, DriverWaker, FiredEvent, Readiness};
pub use poll::PollDriver;
