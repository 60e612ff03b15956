pub mod types;
pub mod rpc;


pub use types::*;
pub use rpc::{EndpointHandle, RpcClient};
