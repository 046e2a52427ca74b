//! Network transport.
//!
//! Clients speak the terminal protocol over WebSocket.

pub mod websocket;

pub use websocket::WebSocketServer;
