pub mod config;
mod dispatch;
pub mod error;
pub mod fragmentation;
pub mod handler;
pub mod server;
pub mod server_state;
pub mod session;
pub mod storage;

#[cfg(test)]
mod test_fixtures;

pub use config::ServerConfig;
pub use error::ServerError;
pub use handler::{MessageHandler, PrekeyMessageHandler};
pub use server::PrekeyServer;
pub use server_state::ServerState;
pub use session::{SessionManager, SessionState};
pub use storage::{InMemoryStorage, Storage};
