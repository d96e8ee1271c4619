pub mod app;
pub mod chat_stream;
pub mod config;
pub mod decoder;
pub mod providers;
pub mod session;
pub mod store;
pub mod summary;
