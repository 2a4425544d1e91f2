pub mod app;
pub mod delivery;
pub mod mcp;
