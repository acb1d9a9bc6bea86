//! Session lifecycle and cross-link orchestration.

pub mod manager;

pub use manager::SessionManager;
