// MCP (Model Context Protocol) server exposing a configured CLI as tools and resources

pub mod protocol;
pub mod server;
pub mod tools;

pub use server::McpServer;
