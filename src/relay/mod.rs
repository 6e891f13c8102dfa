mod error;
mod hub;
mod lifecycle;
mod presence;
mod registry;
mod router;
mod types;
mod typing;
mod websocket;

pub use error::{RelayError, RelayResult};
pub use hub::{deliver, Departure, Hub};
pub use lifecycle::{Connection, ConnectionState, LifecycleController};
pub use presence::PresenceBroadcaster;
pub use registry::{ConnectionRegistry, Target};
pub use router::{DeliveryReceipt, MessageRouter, MAX_MESSAGE_LENGTH};
pub use types::{ClientEvent, ConnectionId, Outbound, ServerEvent};
pub use typing::TypingTracker;
pub use websocket::{handle_websocket, RelayState};
