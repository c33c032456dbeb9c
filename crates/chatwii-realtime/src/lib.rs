// Realtime layer: vendor-agnostic listeners, connection monitoring, typing
// and presence on top of a JSON-tree realtime database.

pub mod backend;
pub mod channels;
pub mod connection;
pub mod error;
pub mod memory;
pub mod presence;
pub mod registry;
pub mod retry;
pub mod typing;

pub use backend::{ChannelEvent, EventCallback, RealtimeBackend, Subscription};
pub use channels::{
    ChannelHook, ChannelStatus, MessageChannel, PresenceChannel, ReactionChannel, TypingChannel,
};
pub use connection::{ConnectionMonitor, ConnectionState, NetworkEvent, ReconnectOutcome};
pub use error::RealtimeError;
pub use memory::MemoryBackend;
pub use presence::{PresenceDirectory, PresenceWriter};
pub use registry::ListenerRegistry;
pub use retry::{retry, RetryError, RetryPolicy};
pub use typing::{PeerTyping, TypingBroadcaster, TypingTracker};
