//! Reply parsing into uniform item lists.

use minidom::Element;
use serde::Serialize;
use serde_json::Value;
use tracing::trace;

use crate::codec::EntryCodec;
use crate::error::check_reply;
use crate::query::ReplyShape;
use crate::{ns, Result};

/// One item from any query reply.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedItem {
    /// Channel node the item lives in.
    pub node: String,
    /// Item id.
    pub id: String,
    /// Decoded payload.
    pub entry: Value,
}

/// Result set window reported by the service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RsmCursor {
    /// Total number of items in the full result set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
    /// Marker of the first item in this page.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first: Option<String>,
    /// Marker of the last item in this page.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last: Option<String>,
}

/// Items plus an optional paging cursor.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ItemPage {
    /// Items in reply order.
    pub items: Vec<NormalizedItem>,
    /// Present when the reply carried result set metadata.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rsm: Option<RsmCursor>,
}

/// Acknowledgement of a publish.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PublishResult {
    /// Item id confirmed by the service, if it returned one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

/// A parsed reply.
#[derive(Debug, Clone, PartialEq)]
pub enum Normalized {
    /// Item listing.
    Items(ItemPage),
    /// Publish acknowledgement.
    Published(PublishResult),
}

impl Normalized {
    /// The item listing, if this reply was one.
    pub fn into_page(self) -> Option<ItemPage> {
        match self {
            Self::Items(page) => Some(page),
            Self::Published(_) => None,
        }
    }

    /// The publish acknowledgement, if this reply was one.
    pub fn into_published(self) -> Option<PublishResult> {
        match self {
            Self::Published(ack) => Some(ack),
            Self::Items(_) => None,
        }
    }
}

/// Interpret `reply` according to the shape recorded when the query was built.
///
/// Error replies surface as [`Error::Remote`](crate::Error::Remote) with no
/// partial data.
pub fn normalize(reply: Element, shape: &ReplyShape, codec: &dyn EntryCodec) -> Result<Normalized> {
    let reply = check_reply(reply)?;
    let pubsub = reply.get_child("pubsub", ns::PUBSUB);

    match shape {
        ReplyShape::Publish => {
            let id = pubsub
                .and_then(|p| p.get_child("publish", ns::PUBSUB))
                .and_then(|p| p.get_child("item", ns::PUBSUB))
                .and_then(|i| i.attr("id"))
                .map(str::to_owned);
            Ok(Normalized::Published(PublishResult { id }))
        }
        ReplyShape::MultiNode => Ok(Normalized::Items(item_page(&reply, pubsub, None, codec))),
        ReplyShape::SingleNode(node) => Ok(Normalized::Items(item_page(
            &reply,
            pubsub,
            Some(node.as_str()),
            codec,
        ))),
    }
}

fn item_page(
    reply: &Element,
    pubsub: Option<&Element>,
    node_override: Option<&str>,
    codec: &dyn EntryCodec,
) -> ItemPage {
    let mut items = Vec::new();
    if let Some(pubsub) = pubsub {
        for block in pubsub.children().filter(|c| c.is("items", ns::PUBSUB)) {
            let node = node_override
                .or_else(|| block.attr("node"))
                .unwrap_or_default();
            for item in block.children().filter(|c| c.is("item", ns::PUBSUB)) {
                let entry = item
                    .children()
                    .next()
                    .map(|payload| codec.decode(payload))
                    .unwrap_or(Value::Null);
                items.push(NormalizedItem {
                    node: node.to_string(),
                    id: item.attr("id").unwrap_or_default().to_string(),
                    entry,
                });
            }
        }
    }

    let set = pubsub
        .and_then(|p| p.get_child("set", ns::RSM))
        .or_else(|| reply.get_child("set", ns::RSM));
    let rsm = set.map(parse_rsm);
    trace!(items = items.len(), rsm = rsm.is_some(), "normalized reply");
    ItemPage { items, rsm }
}

fn parse_rsm(set: &Element) -> RsmCursor {
    let text = |name: &str| set.get_child(name, ns::RSM).map(|c| c.text());
    RsmCursor {
        count: text("count").and_then(|c| c.trim().parse().ok()),
        first: text("first"),
        last: text("last"),
    }
}
