//! Client-side buddycloud channel protocol over XMPP stanzas.
//!
//! Finds the channel server of a domain and runs paginated item queries
//! against it, normalizing replies into plain item lists.

#![deny(missing_docs)]

pub mod client;
pub mod codec;
pub mod config;
pub mod correlator;
pub mod discovery;
pub mod error;
pub mod normalize;
pub mod ns;
pub mod query;
pub mod transport;

// Re-export key types
pub use client::{ChannelClient, ChannelClientBuilder};
pub use codec::{AtomCodec, EntryCodec};
pub use config::ChannelsConfig;
pub use discovery::{DiscoHandler, DiscoRequest, DiscoverRequest};
pub use error::{ClientError, Error, Result, StanzaError};
pub use normalize::{ItemPage, NormalizedItem, PublishResult, RsmCursor};
pub use query::{Before, PublishRequest, QueryRequest, Rsm};
pub use transport::{ChannelTransport, OutgoingStanzas, StanzaSink};

pub use minidom;
