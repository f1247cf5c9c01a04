pub mod auth;
pub mod cache;
pub mod dispatcher;
pub mod events;
pub mod handler;
pub mod limiter;
pub mod liveness;
pub mod registry;
pub mod rooms;
pub mod server;
