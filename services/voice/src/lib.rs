//! Voice capture calls for the mentoring marketplace.
//!
//! A [`CallController`] runs one realtime voice call at a time. While the
//! call is live the agent fills a draft through tool calls on the control
//! channel; the draft and transcript live in a shared
//! [`mentorcall_core::DraftStore`].

pub mod config;
pub mod credential;
pub mod dispatcher;
pub mod error;
pub mod level;
pub mod media;
#[cfg(feature = "microphone")]
pub mod microphone;
pub mod session;
pub mod transport;

pub use config::{Config, ConfigError};
pub use credential::{CredentialProvider, EphemeralCredential, HttpCredentialProvider};
pub use dispatcher::{DispatchOutcome, Dispatcher};
pub use error::CallError;
pub use media::{Analyser, AudioSource, AudioTrack, CaptureError};
pub use session::{CallController, CallDependencies, CallStatus, SessionResources};
pub use transport::{
    ChannelEvent, ControlChannel, ControlLink, PeerTransport, TransportError, TransportFactory,
    TransportState,
};
