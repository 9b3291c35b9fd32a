//! Outgoing query construction and request validation.
//!
//! Every builder checks its input before producing anything, so a failed
//! validation never results in traffic.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use minidom::Element;
use serde::{de, Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::codec::EntryCodec;
use crate::config::ChannelsConfig;
use crate::error::{
    ERROR_DISCOVERY_REQUIRED, ERROR_MISSING_ID, ERROR_MISSING_NODE, ERROR_SINCE_DATE_UNPARSABLE,
};
use crate::{ns, Error, Result};

/// Parameters shared by the item query operations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    /// Channel node, e.g. `/user/juliet@example.net/posts`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,
    /// Item id within `node`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Only return items newer than this timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<String>,
    /// Items per channel for recent-items.
    #[serde(
        default,
        deserialize_with = "number_or_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub max: Option<u32>,
    /// Ask for top-level posts only.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub parent_only: bool,
    /// Result set window.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rsm: Option<Rsm>,
}

impl QueryRequest {
    /// Request scoped to `node`.
    pub fn node(node: impl Into<String>) -> Self {
        Self {
            node: Some(node.into()),
            ..Self::default()
        }
    }

    /// Request scoped to item `id` of `node`.
    pub fn item(node: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            node: Some(node.into()),
            id: Some(id.into()),
            ..Self::default()
        }
    }
}

/// XEP-0059 paging parameters supplied by the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rsm {
    /// Page size.
    #[serde(
        default,
        deserialize_with = "number_or_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub max: Option<u32>,
    /// Return the page after this marker.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<String>,
    /// Return the page before this marker, or the last page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<Before>,
}

/// `before` is either a marker or `true` for "the page before the end".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Before {
    /// `true` requests the preceding page without a marker.
    Flag(bool),
    /// Item id to page back from.
    Marker(String),
}

/// Parameters for [`ChannelClient::publish`](crate::ChannelClient::publish).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PublishRequest {
    /// Target channel node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,
    /// Item id to publish under; the service assigns one when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Entry handed to the [`EntryCodec`].
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub content: Value,
}

/// Accept a count given either as a JSON number or as a numeric string.
fn number_or_string<'de, D>(deserializer: D) -> std::result::Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Count {
        Number(u32),
        Text(String),
    }

    match Option::<Count>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Count::Number(n)) => Ok(Some(n)),
        Some(Count::Text(text)) => text
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| de::Error::custom(format!("invalid count {text:?}"))),
    }
}

/// How a reply to a built query is interpreted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyShape {
    /// `<items/>` blocks from several channels, each naming its node.
    MultiNode,
    /// Items of one channel; the node comes from the request.
    SingleNode(String),
    /// Publish acknowledgement.
    Publish,
}

/// A ready-to-send stanza and how to read its reply.
#[derive(Debug, Clone)]
pub struct BuiltQuery {
    /// The `<iq/>` to send. Its `id` is assigned on dispatch.
    pub stanza: Element,
    /// Reply interpretation.
    pub shape: ReplyShape,
}

/// Wrap `payload` in an `<iq/>` of the given type addressed to `to`.
pub(crate) fn iq(kind: &str, to: &str, payload: Element) -> Element {
    Element::builder("iq", ns::CLIENT)
        .attr("type", kind)
        .attr("to", to)
        .append(payload)
        .build()
}

fn require_server<'a, R: Serialize>(server: Option<&'a str>, request: &R) -> Result<&'a str> {
    server.ok_or_else(|| {
        debug!("query attempted before channel server discovery");
        Error::client(ERROR_DISCOVERY_REQUIRED, request)
    })
}

fn require_node<R: Serialize>(node: Option<&str>, request: &R) -> Result<String> {
    node.map(str::to_owned)
        .ok_or_else(|| Error::client(ERROR_MISSING_NODE, request))
}

const NAIVE_DATETIME_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Whether `since` names a point in time.
///
/// Accepts RFC 3339, a date and time without offset (read as UTC), or a
/// bare `YYYY-MM-DD` date.
fn is_timestamp(since: &str) -> bool {
    let since = since.trim();
    DateTime::parse_from_rfc3339(since).is_ok()
        || NAIVE_DATETIME_FORMATS
            .iter()
            .any(|format| NaiveDateTime::parse_from_str(since, format).is_ok())
        || NaiveDate::parse_from_str(since, "%Y-%m-%d").is_ok()
}

fn since_attr(request: &QueryRequest, config: &ChannelsConfig) -> Result<String> {
    match &request.since {
        Some(since) if is_timestamp(since) => Ok(since.clone()),
        Some(since) => {
            debug!(%since, "rejecting unparsable since");
            Err(Error::client(ERROR_SINCE_DATE_UNPARSABLE, request))
        }
        None => Ok(config.since_floor.clone()),
    }
}

fn parent_only_attr(request: &QueryRequest) -> &'static str {
    if request.parent_only {
        "true"
    } else {
        "false"
    }
}

fn text_element(name: &str, namespace: &str, text: &str) -> Element {
    let mut element = Element::bare(name, namespace);
    element.append_text_node(text);
    element
}

fn rsm_set(rsm: &Rsm) -> Element {
    let mut set = Element::bare("set", ns::RSM);
    if let Some(max) = rsm.max {
        set.append_child(text_element("max", ns::RSM, &max.to_string()));
    }
    if let Some(after) = &rsm.after {
        set.append_child(text_element("after", ns::RSM, after));
    }
    match &rsm.before {
        Some(Before::Flag(true)) => {
            set.append_child(Element::bare("before", ns::RSM));
        }
        Some(Before::Marker(marker)) => {
            set.append_child(text_element("before", ns::RSM, marker));
        }
        Some(Before::Flag(false)) | None => {}
    }
    set
}

fn pubsub(query: Element, rsm: Option<&Rsm>) -> Element {
    let mut pubsub = Element::builder("pubsub", ns::PUBSUB).append(query).build();
    if let Some(rsm) = rsm {
        pubsub.append_child(rsm_set(rsm));
    }
    pubsub
}

/// Build a `user-items` query across every channel the user follows.
pub fn feed(
    server: Option<&str>,
    request: &QueryRequest,
    config: &ChannelsConfig,
) -> Result<BuiltQuery> {
    let server = require_server(server, request)?;
    let since = since_attr(request, config)?;
    let query = Element::builder("user-items", ns::BUDDYCLOUD)
        .attr("since", since)
        .attr("parent-only", parent_only_attr(request))
        .build();
    Ok(BuiltQuery {
        stanza: iq("get", server, pubsub(query, request.rsm.as_ref())),
        shape: ReplyShape::MultiNode,
    })
}

/// Build a `recent-items` query, capped per channel.
pub fn recent_items(
    server: Option<&str>,
    request: &QueryRequest,
    config: &ChannelsConfig,
) -> Result<BuiltQuery> {
    let server = require_server(server, request)?;
    let since = since_attr(request, config)?;
    let max = request.max.unwrap_or(config.max_recent_items_per_channel);
    let query = Element::builder("recent-items", ns::BUDDYCLOUD)
        .attr("since", since)
        .attr("max", max.to_string())
        .attr("parent-only", parent_only_attr(request))
        .build();
    Ok(BuiltQuery {
        stanza: iq("get", server, pubsub(query, request.rsm.as_ref())),
        shape: ReplyShape::MultiNode,
    })
}

fn item_scoped(name: &str, server: Option<&str>, request: &QueryRequest) -> Result<BuiltQuery> {
    let server = require_server(server, request)?;
    let node = require_node(request.node.as_deref(), request)?;
    let Some(id) = &request.id else {
        return Err(Error::client(ERROR_MISSING_ID, request));
    };
    let query = Element::builder(name, ns::BUDDYCLOUD)
        .attr("node", node.as_str())
        .attr("item_id", id.as_str())
        .build();
    Ok(BuiltQuery {
        stanza: iq("get", server, pubsub(query, request.rsm.as_ref())),
        shape: ReplyShape::SingleNode(node),
    })
}

/// Build a query for the direct replies to one item.
pub fn replies(server: Option<&str>, request: &QueryRequest) -> Result<BuiltQuery> {
    item_scoped("replies", server, request)
}

/// Build a query for the whole thread an item belongs to.
pub fn thread(server: Option<&str>, request: &QueryRequest) -> Result<BuiltQuery> {
    item_scoped("thread", server, request)
}

/// Build a plain pubsub items retrieval, optionally for a single item.
pub fn retrieve(server: Option<&str>, request: &QueryRequest) -> Result<BuiltQuery> {
    let server = require_server(server, request)?;
    let node = require_node(request.node.as_deref(), request)?;
    let mut items = Element::builder("items", ns::PUBSUB)
        .attr("node", node.as_str())
        .build();
    if request.parent_only {
        items.set_attr("parent-only", "true");
    }
    if let Some(id) = &request.id {
        items.append_child(
            Element::builder("item", ns::PUBSUB)
                .attr("id", id.as_str())
                .build(),
        );
    }
    Ok(BuiltQuery {
        stanza: iq("get", server, pubsub(items, request.rsm.as_ref())),
        shape: ReplyShape::SingleNode(node),
    })
}

/// Build a publish of one entry to a channel node.
pub fn publish(
    server: Option<&str>,
    request: &PublishRequest,
    codec: &dyn EntryCodec,
) -> Result<BuiltQuery> {
    let server = require_server(server, request)?;
    let node = require_node(request.node.as_deref(), request)?;
    let entry = codec.encode(&request.content)?;

    let mut item = Element::builder("item", ns::PUBSUB).append(entry).build();
    if let Some(id) = &request.id {
        item.set_attr("id", id.as_str());
    }
    let publish = Element::builder("publish", ns::PUBSUB)
        .attr("node", node)
        .append(item)
        .build();
    Ok(BuiltQuery {
        stanza: iq("set", server, pubsub(publish, None)),
        shape: ReplyShape::Publish,
    })
}
