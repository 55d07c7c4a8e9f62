pub mod connection;
pub mod views;

pub use views::{GatewayContext, ViewHost};
