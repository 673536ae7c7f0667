pub mod client;
pub mod config;
pub mod message;
pub mod protocol;
pub mod server;

pub use config::{ClientConfig, ServerConfig};
pub use message::{ChatMessage, User};
pub use server::{ChatServer, ServerError};
