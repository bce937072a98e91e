pub mod protocol;
pub mod server;

pub use protocol::RpcMessage;
pub use server::{CommandExecutor, OutboundHub, RpcServer};
