//! Job lifecycle notifications.
//!
//! - [`JobNotifier`]: the callback seam the engine invokes after every
//!   committed state transition.
//! - [`EventBus`]: in-process publish/subscribe hub backed by
//!   `tokio::sync::broadcast`, carrying [`JobEvent`]s to any transport.
//! - [`BusNotifier`]: a [`JobNotifier`] that publishes onto an [`EventBus`].

pub mod bus;
pub mod notifier;

pub use bus::{EventBus, JobEvent};
pub use notifier::{BusNotifier, JobNotifier, NoopNotifier};
