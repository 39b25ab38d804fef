pub mod app;
pub mod auth;
pub mod chat;
pub mod hosted;
pub mod local;
pub mod model_selector;
pub mod services;
pub mod settings;

#[cfg(test)]
mod testing;
