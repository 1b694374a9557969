pub mod config;
pub mod drive;
pub mod error;
pub mod failsafe;
pub mod link;
pub mod messages;
pub mod runtime;
pub mod session;
