pub mod api;
pub mod config;
pub mod daemon;
pub mod dispatch;
pub mod history;
pub mod lifecycle;
pub mod messaging;
pub mod model;
pub mod observability;
pub mod queue;
pub mod scheduler;
pub mod selfcheck;
pub mod storage;
