pub mod broker;
pub mod store;

pub use broker::{OrderBroker, OrderEnvelope};
pub use store::{DeadLetter, FjallQueue, QueueError, QueueKey, QueuedOrder};
