pub mod app;
pub mod auth;
pub mod chat;
pub mod error;
pub mod handlers;
pub mod upstream;
