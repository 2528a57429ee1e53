//! JSON-RPC tool server exposing `nmapScan` and `getInfo`

pub mod handler;
pub mod protocol;
pub mod server;

pub use handler::McpHandler;
pub use server::McpServer;
