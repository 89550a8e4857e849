//! Realtime protocol shared by the broadcast hub and the client connector

mod messages;

pub use messages::{
    ClientMessage, ProtocolError, ServerMessage, Subscription, CLIENT_MESSAGE_TYPES,
};
