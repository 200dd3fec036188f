// Public API for integration tests and potential library usage

pub mod api;
pub mod config;
pub mod error;
pub mod notifier;
pub mod observer;
pub mod popularity;
pub mod presence;
pub mod protocol;
pub mod retry;
pub mod seed;
pub mod state;
pub mod store;
pub mod types;
pub mod ws;

// Re-export broadcast for testing
pub mod broadcast;
