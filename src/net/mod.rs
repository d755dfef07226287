//! Network surfaces: the WebSocket gateway, the JSON wire protocol, and the
//! REST management API.

pub mod gateway;
pub mod http_api;
pub mod protocol;
