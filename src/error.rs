//! Error types for buddycloud-channels.

use minidom::Element;
use serde::Serialize;

use crate::ns;

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Description used when a query is made before a channel server is known.
pub const ERROR_DISCOVERY_REQUIRED: &str = "You must perform discovery first!";

/// Description used when a `since` value does not parse as a timestamp.
pub const ERROR_SINCE_DATE_UNPARSABLE: &str = "Unparsable 'since' date";

/// Description used when a request lacks its `node` key.
pub const ERROR_MISSING_NODE: &str = "Missing 'node' key";

/// Description used when a request lacks its `id` key.
pub const ERROR_MISSING_ID: &str = "Missing 'id' key";

/// Message reported when discovery finds no channel server.
pub const NO_SERVER_FOUND: &str = "No buddycloud server found";

/// Main error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The caller supplied invalid or incomplete input.
    #[error("client error: {}", .0.description)]
    Client(ClientError),

    /// The remote side answered with an error stanza.
    #[error("remote error: {}/{}", .0.kind, .0.condition)]
    Remote(StanzaError),

    /// Discovery completed without finding a channel server.
    #[error("{}", NO_SERVER_FOUND)]
    NoServerFound,

    /// Malformed XML.
    #[error("XML error: {0}")]
    Xml(#[from] minidom::Error),

    /// Transport or session error.
    #[error("Connection error: {0}")]
    Connection(String),
}

impl Error {
    /// Create a connection error.
    pub fn connection<S: Into<String>>(msg: S) -> Self {
        Self::Connection(msg.into())
    }

    /// Create a client error echoing the offending request.
    pub fn client<R: Serialize>(description: impl Into<String>, request: &R) -> Self {
        Self::Client(ClientError::new(description, request))
    }

    /// The client error, if this is one.
    pub fn as_client(&self) -> Option<&ClientError> {
        match self {
            Self::Client(e) => Some(e),
            _ => None,
        }
    }

    /// The remote stanza error, if this is one.
    pub fn as_remote(&self) -> Option<&StanzaError> {
        match self {
            Self::Remote(e) => Some(e),
            _ => None,
        }
    }
}

/// Validation failure reported to the caller before any stanza is sent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClientError {
    /// Always `modify`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Always `client-error`.
    pub condition: String,
    /// Human readable reason.
    pub description: String,
    /// The request as supplied by the caller.
    pub request: serde_json::Value,
}

impl ClientError {
    /// Build a client error, serializing `request` for the echo.
    pub fn new<R: Serialize>(description: impl Into<String>, request: &R) -> Self {
        Self {
            kind: "modify".into(),
            condition: "client-error".into(),
            description: description.into(),
            request: serde_json::to_value(request).unwrap_or(serde_json::Value::Null),
        }
    }
}

/// Error carried by an `<iq type='error'/>` reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StanzaError {
    /// Error type (`cancel`, `modify`, `auth`, `wait`, `continue`).
    #[serde(rename = "type")]
    pub kind: String,
    /// Defined condition element name, e.g. `item-not-found`.
    pub condition: String,
    /// Optional `<text/>` content.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl StanzaError {
    /// Extract the error from a stanza whose `type` is `error`.
    ///
    /// Returns `None` for any other stanza.
    pub fn from_stanza(stanza: &Element) -> Option<Self> {
        if stanza.attr("type") != Some("error") {
            return None;
        }
        let Some(error) = stanza.children().find(|c| c.name() == "error") else {
            return Some(Self {
                kind: "cancel".into(),
                condition: "undefined-condition".into(),
                description: None,
            });
        };
        let condition = error
            .children()
            .find(|c| c.name() != "text")
            .map(|c| c.name().to_string())
            .unwrap_or_else(|| "undefined-condition".into());
        let description = error
            .get_child("text", ns::STANZAS)
            .map(|t| t.text())
            .filter(|t| !t.is_empty());
        Some(Self {
            kind: error.attr("type").unwrap_or("cancel").to_string(),
            condition,
            description,
        })
    }
}

/// Turn an error-typed reply into [`Error::Remote`], pass anything else through.
pub(crate) fn check_reply(reply: Element) -> Result<Element> {
    match StanzaError::from_stanza(&reply) {
        Some(err) => Err(Error::Remote(err)),
        None => Ok(reply),
    }
}
