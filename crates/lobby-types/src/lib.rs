pub mod api;
pub mod collections;
pub mod events;
pub mod models;
pub mod view;
