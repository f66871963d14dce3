//! Debug HTTP endpoint for inspecting and nudging the device inventory.

pub mod errors;
pub mod handlers;
pub mod server;
pub mod types;

pub use errors::ApiError;
pub use server::DebugServer;
