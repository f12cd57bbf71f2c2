// wsmux-api: transport layer underneath the wsmux connection registry

pub mod error;
pub mod transport;
pub mod websocket;

pub use error::Error;
pub use transport::{
    CloseReason, Connector, OpenedTransport, Payload, ReadyState, Transport, TransportEvent,
};
pub use websocket::{WsConfig, WsConnector};
