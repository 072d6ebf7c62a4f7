#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

mod agent_ops;
mod config_ops;
mod event_ops;
mod inbox_ops;
mod reconcile_ops;
mod run_ops;
