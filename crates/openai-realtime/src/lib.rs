//! Client-side pieces of the OpenAI Realtime API used over a peer connection:
//! the typed events exchanged on the data channel and the SDP signaling call.

pub mod protocol;
pub mod signaling;

pub use protocol::{ClientEvent, ConversationItem, EVENTS_CHANNEL_LABEL, ServerEvent};
pub use signaling::{SignalingClient, SignalingError};
