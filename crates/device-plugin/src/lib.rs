pub mod api;
pub mod config;
pub mod domain;
pub mod lifecycle;
pub mod platform;

// Re-export main modules
pub use platform::k8s;
