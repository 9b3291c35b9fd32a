//! Per-session channel client.

use std::sync::Arc;
use std::time::Duration;

use minidom::Element;
use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, info};

use crate::codec::{AtomCodec, EntryCodec};
use crate::config::ChannelsConfig;
use crate::correlator::Correlator;
use crate::discovery::{self, DiscoHandler, DiscoRequest, DiscoverRequest};
use crate::normalize::{normalize, ItemPage, Normalized, PublishResult};
use crate::query::{self, BuiltQuery, PublishRequest, QueryRequest};
use crate::transport::StanzaSink;
use crate::{Error, Result};

/// A buddycloud session bound to one XMPP domain.
///
/// Owns the request correlator and the discovered channel server. Create one
/// per connection; inbound replies are fed in through
/// [`handle_stanza`](ChannelClient::handle_stanza).
///
/// # Example
/// ```rust,no_run
/// # async fn example() -> buddycloud_channels::Result<()> {
/// use buddycloud_channels::{ChannelClient, ChannelTransport, DiscoverRequest, QueryRequest};
///
/// let (transport, _outgoing) = ChannelTransport::new();
/// let client = ChannelClient::builder("example.com", transport).build();
/// // drive `_outgoing` and feed replies to `client.handle_stanza(..)` elsewhere
/// let server = client.discover(&DiscoverRequest::default()).await?;
/// let page = client.feed(&QueryRequest::default()).await?;
/// # let _ = (server, page);
/// # Ok(())
/// # }
/// ```
pub struct ChannelClient {
    domain: String,
    correlator: Correlator,
    codec: Arc<dyn EntryCodec>,
    disco: Option<Arc<dyn DiscoHandler>>,
    config: RwLock<ChannelsConfig>,
    channel_server: RwLock<Option<String>>,
}

impl ChannelClient {
    /// Start building a client for `domain` sending through `sink`.
    pub fn builder(domain: impl Into<String>, sink: impl StanzaSink) -> ChannelClientBuilder {
        ChannelClientBuilder {
            domain: domain.into(),
            sink: Arc::new(sink),
            config: ChannelsConfig::default(),
            codec: Arc::new(AtomCodec),
            disco: None,
        }
    }

    /// Domain whose channel server is discovered.
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// The channel server, once known.
    pub fn channel_server(&self) -> Option<String> {
        self.channel_server.read().clone()
    }

    /// Use `server` as the channel server without discovery.
    pub fn set_channel_server(&self, server: impl Into<String>) {
        *self.channel_server.write() = Some(server.into());
    }

    /// Forget the channel server; queries fail until discovery runs again.
    pub fn clear_channel_server(&self) {
        *self.channel_server.write() = None;
    }

    /// Change the discovery timeout for subsequent discovery calls.
    pub fn set_discovery_timeout(&self, timeout: Option<Duration>) {
        self.config.write().discovery_timeout = timeout;
    }

    /// Snapshot of the current configuration.
    pub fn config(&self) -> ChannelsConfig {
        self.config.read().clone()
    }

    /// Hand an inbound stanza to the session.
    ///
    /// Returns `false` when it did not answer any request made here, so the
    /// caller can route it elsewhere.
    pub fn handle_stanza(&self, stanza: Element) -> bool {
        self.correlator.receive(stanza)
    }

    /// Parse a serialized stanza and route it like [`handle_stanza`](ChannelClient::handle_stanza).
    pub fn handle_xml(&self, xml: &str) -> Result<bool> {
        let stanza: Element = xml.parse()?;
        Ok(self.handle_stanza(stanza))
    }

    /// Find the channel server for this domain and remember it.
    ///
    /// An explicit `server` in the request is accepted as is.
    pub async fn discover(&self, request: &DiscoverRequest) -> Result<String> {
        if let Some(server) = &request.server {
            info!(%server, "channel server set manually");
            self.set_channel_server(server.clone());
            return Ok(server.clone());
        }

        let timeout = self.config.read().discovery_timeout;
        let server = discovery::find_channel_server(&self.correlator, &self.domain, timeout).await?;
        self.set_channel_server(server.clone());
        Ok(server)
    }

    /// Forward a disco#info request to the generic discovery handler.
    pub async fn discover_info(&self, request: DiscoRequest) -> Result<Value> {
        self.disco_handler(&request)?.info(request).await
    }

    /// Forward a disco#items request to the generic discovery handler.
    pub async fn discover_items(&self, request: DiscoRequest) -> Result<Value> {
        self.disco_handler(&request)?.items(request).await
    }

    fn disco_handler(&self, request: &DiscoRequest) -> Result<Arc<dyn DiscoHandler>> {
        self.disco
            .clone()
            .ok_or_else(|| Error::client("No service discovery handler configured", request))
    }

    /// Publish one entry to a channel node.
    pub async fn publish(&self, request: &PublishRequest) -> Result<PublishResult> {
        let built = query::publish(self.channel_server().as_deref(), request, self.codec.as_ref())?;
        debug!(node = ?request.node, "publishing item");
        self.execute(built)
            .await?
            .into_published()
            .ok_or_else(|| Error::connection("reply is not a publish acknowledgement"))
    }

    /// Items from every channel the user follows.
    pub async fn feed(&self, request: &QueryRequest) -> Result<ItemPage> {
        let built = query::feed(self.channel_server().as_deref(), request, &self.config.read())?;
        debug!("requesting user feed");
        self.items(built).await
    }

    /// The most recent items of each followed channel.
    pub async fn recent_items(&self, request: &QueryRequest) -> Result<ItemPage> {
        let built = query::recent_items(self.channel_server().as_deref(), request, &self.config.read())?;
        debug!("requesting recent items");
        self.items(built).await
    }

    /// Replies to one item.
    pub async fn replies(&self, request: &QueryRequest) -> Result<ItemPage> {
        let built = query::replies(self.channel_server().as_deref(), request)?;
        debug!(node = ?request.node, id = ?request.id, "requesting replies");
        self.items(built).await
    }

    /// The full thread of one item.
    pub async fn thread(&self, request: &QueryRequest) -> Result<ItemPage> {
        let built = query::thread(self.channel_server().as_deref(), request)?;
        debug!(node = ?request.node, id = ?request.id, "requesting thread");
        self.items(built).await
    }

    /// Items of one node, or a single item when `id` is given.
    pub async fn retrieve(&self, request: &QueryRequest) -> Result<ItemPage> {
        let built = query::retrieve(self.channel_server().as_deref(), request)?;
        debug!(node = ?request.node, "retrieving items");
        self.items(built).await
    }

    async fn items(&self, built: BuiltQuery) -> Result<ItemPage> {
        self.execute(built)
            .await?
            .into_page()
            .ok_or_else(|| Error::connection("reply is not an item listing"))
    }

    async fn execute(&self, built: BuiltQuery) -> Result<Normalized> {
        let reply = self.correlator.send(built.stanza)?.await?;
        normalize(reply, &built.shape, self.codec.as_ref())
    }
}

/// Builder for [`ChannelClient`].
pub struct ChannelClientBuilder {
    domain: String,
    sink: Arc<dyn StanzaSink>,
    config: ChannelsConfig,
    codec: Arc<dyn EntryCodec>,
    disco: Option<Arc<dyn DiscoHandler>>,
}

impl ChannelClientBuilder {
    /// Replace the configuration.
    pub fn config(mut self, config: ChannelsConfig) -> Self {
        self.config = config;
        self
    }

    /// Use a custom entry codec. Default: [`AtomCodec`].
    pub fn codec(mut self, codec: impl EntryCodec) -> Self {
        self.codec = Arc::new(codec);
        self
    }

    /// Handler for the disco#info / disco#items proxy calls.
    pub fn disco_handler(mut self, handler: impl DiscoHandler) -> Self {
        self.disco = Some(Arc::new(handler));
        self
    }

    /// Build the client.
    pub fn build(self) -> ChannelClient {
        ChannelClient {
            domain: self.domain,
            correlator: Correlator::new(self.sink),
            codec: self.codec,
            disco: self.disco,
            config: RwLock::new(self.config),
            channel_server: RwLock::new(None),
        }
    }
}
