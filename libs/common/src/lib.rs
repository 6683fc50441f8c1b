pub mod character;
pub mod dice;
pub mod id;
pub mod map;
pub mod realtime;
pub mod token;
pub mod wire;

pub use realtime::RealtimeEvent;
pub use wire::{ClientMessage, EventOrigin, GatewayEnvelope, ServerMessage};
