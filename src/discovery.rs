//! Channel server discovery.
//!
//! A discovery call lists the items of the session domain (disco#items),
//! probes every listed component with disco#info, and settles on the first
//! one advertising the `pubsub/channels` identity.
//!
//! The probing phase is driven by a [`DiscoveryRound`]: every probe reply and
//! the timer are fed to it as events, and it reports an outcome exactly once.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::FuturesUnordered;
use futures_util::StreamExt;
use minidom::Element;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, trace};

use crate::correlator::Correlator;
use crate::error::check_reply;
use crate::query::iq;
use crate::{ns, Error, Result};

/// Identity category advertised by a channel service.
pub const CHANNEL_IDENTITY_CATEGORY: &str = "pubsub";

/// Identity type advertised by a channel service.
pub const CHANNEL_IDENTITY_TYPE: &str = "channels";

/// Parameters for [`ChannelClient::discover`](crate::ChannelClient::discover).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoverRequest {
    /// Use this channel server without asking the network.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
}

/// Parameters for the disco proxy calls.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoRequest {
    /// Entity to query.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub of: Option<String>,
    /// Optional disco node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,
}

/// Generic service discovery, used for the disco#info / disco#items proxies.
#[async_trait]
pub trait DiscoHandler: Send + Sync + 'static {
    /// Answer a disco#info request.
    async fn info(&self, request: DiscoRequest) -> Result<Value>;

    /// Answer a disco#items request.
    async fn items(&self, request: DiscoRequest) -> Result<Value>;
}

/// Phase of a discovery call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryState {
    /// Nothing sent yet.
    Idle,
    /// Waiting for the disco#items reply.
    EnumeratingEndpoints,
    /// Waiting for disco#info replies.
    ProbingCapabilities,
    /// A channel service was found.
    Found,
    /// Every probe answered without the channel identity.
    Exhausted,
    /// The timer fired first.
    TimedOut,
}

/// Input to a probing round.
#[derive(Debug)]
pub enum RoundEvent {
    /// A probe finished: the reply, or why there is none.
    Probe {
        /// Candidate that was probed.
        jid: String,
        /// Reply stanza or failure.
        reply: Result<Element>,
    },
    /// The discovery timer fired.
    Timeout,
}

/// Terminal result of a probing round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoundOutcome {
    /// The candidate advertising the channel identity.
    Found(String),
    /// No candidate matched.
    Exhausted,
    /// Gave up waiting.
    TimedOut,
}

/// State of one probing phase.
#[derive(Debug)]
pub struct DiscoveryRound {
    outstanding: HashSet<String>,
    state: DiscoveryState,
    closed: bool,
}

impl DiscoveryRound {
    /// Start probing `candidates`.
    pub fn new<I>(candidates: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        Self {
            outstanding: candidates.into_iter().collect(),
            state: DiscoveryState::ProbingCapabilities,
            closed: false,
        }
    }

    /// Current phase.
    pub fn state(&self) -> DiscoveryState {
        self.state
    }

    /// Whether an outcome has been reported.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Candidates still awaiting a probe reply.
    pub fn outstanding(&self) -> usize {
        self.outstanding.len()
    }

    /// Feed one event. Returns the outcome the first time the round completes
    /// and `None` for every other event, including all events after that.
    pub fn handle(&mut self, event: RoundEvent) -> Option<RoundOutcome> {
        if self.closed {
            trace!(?event, "discovery round closed, discarding event");
            return None;
        }
        match event {
            RoundEvent::Timeout => {
                debug!(outstanding = self.outstanding.len(), "discovery timed out");
                Some(self.close(DiscoveryState::TimedOut, RoundOutcome::TimedOut))
            }
            RoundEvent::Probe { jid, reply } => {
                if !self.outstanding.remove(&jid) {
                    trace!(%jid, "probe reply for unknown candidate");
                    return None;
                }
                match reply.and_then(check_reply) {
                    Ok(info) if is_channel_service(&info) => {
                        Some(self.close(DiscoveryState::Found, RoundOutcome::Found(jid)))
                    }
                    Ok(_) => {
                        trace!(%jid, "component is not a channel service");
                        self.check_exhausted()
                    }
                    Err(e) => {
                        trace!(%jid, error = %e, "probe failed");
                        self.check_exhausted()
                    }
                }
            }
        }
    }

    fn check_exhausted(&mut self) -> Option<RoundOutcome> {
        if self.outstanding.is_empty() {
            Some(self.close(DiscoveryState::Exhausted, RoundOutcome::Exhausted))
        } else {
            None
        }
    }

    fn close(&mut self, state: DiscoveryState, outcome: RoundOutcome) -> RoundOutcome {
        self.closed = true;
        self.state = state;
        outcome
    }
}

/// Whether a disco#info reply advertises the channel service identity.
pub fn is_channel_service(info: &Element) -> bool {
    info.get_child("query", ns::DISCO_INFO)
        .map(|query| {
            query.children().any(|c| {
                c.is("identity", ns::DISCO_INFO)
                    && c.attr("category") == Some(CHANNEL_IDENTITY_CATEGORY)
                    && c.attr("type") == Some(CHANNEL_IDENTITY_TYPE)
            })
        })
        .unwrap_or(false)
}

/// Candidate addresses from a disco#items reply, in reply order.
pub fn candidate_jids(items: &Element) -> Vec<String> {
    items
        .get_child("query", ns::DISCO_ITEMS)
        .map(|query| {
            query
                .children()
                .filter(|c| c.is("item", ns::DISCO_ITEMS))
                .filter_map(|c| c.attr("jid"))
                .map(str::to_owned)
                .collect()
        })
        .unwrap_or_default()
}

pub(crate) fn disco_items_query(to: &str) -> Element {
    iq("get", to, Element::bare("query", ns::DISCO_ITEMS))
}

pub(crate) fn disco_info_query(to: &str) -> Element {
    iq("get", to, Element::bare("query", ns::DISCO_INFO))
}

/// Enumerate the components of `domain` and probe them for the channel identity.
///
/// Returns the address of the channel server. The caller records it.
pub(crate) async fn find_channel_server(
    correlator: &Correlator,
    domain: &str,
    timeout: Option<Duration>,
) -> Result<String> {
    debug!(%domain, state = ?DiscoveryState::EnumeratingEndpoints, "listing domain items");
    let reply = correlator.send(disco_items_query(domain))?.await?;
    let items = check_reply(reply)?;

    let mut seen = HashSet::new();
    let candidates: Vec<String> = candidate_jids(&items)
        .into_iter()
        .filter(|jid| seen.insert(jid.clone()))
        .collect();
    if candidates.is_empty() {
        debug!(%domain, "domain lists no items");
        return Err(Error::NoServerFound);
    }

    let mut probes = FuturesUnordered::new();
    for jid in &candidates {
        let pending = correlator.send(disco_info_query(jid))?;
        let jid = jid.clone();
        probes.push(async move { (jid, pending.await) });
    }
    let mut round = DiscoveryRound::new(candidates);
    debug!(
        candidates = round.outstanding(),
        ?timeout,
        "probing candidates"
    );

    let timer = async {
        match timeout {
            Some(t) => tokio::time::sleep(t).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(timer);

    let outcome = loop {
        let event = tokio::select! {
            biased;

            Some((jid, reply)) = probes.next() => RoundEvent::Probe { jid, reply },
            _ = &mut timer => RoundEvent::Timeout,
        };
        if let Some(outcome) = round.handle(event) {
            break outcome;
        }
    };

    match outcome {
        RoundOutcome::Found(jid) => {
            info!(server = %jid, "discovered channel server");
            Ok(jid)
        }
        RoundOutcome::Exhausted | RoundOutcome::TimedOut => Err(Error::NoServerFound),
    }
}
