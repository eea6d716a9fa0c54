pub mod command;
pub mod constants;
pub mod cookie;
pub mod envelope;
pub mod error;

pub use command::{Command, CommandName};
pub use constants::*;
pub use error::ProtocolError;
