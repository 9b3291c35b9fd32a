//! XML namespaces used on the wire.

/// Client stream namespace for top-level stanzas.
pub const CLIENT: &str = "jabber:client";

/// Stanza error conditions.
pub const STANZAS: &str = "urn:ietf:params:xml:ns:xmpp-stanzas";

/// XEP-0030 item enumeration.
pub const DISCO_ITEMS: &str = "http://jabber.org/protocol/disco#items";

/// XEP-0030 entity information.
pub const DISCO_INFO: &str = "http://jabber.org/protocol/disco#info";

/// XEP-0060 publish-subscribe.
pub const PUBSUB: &str = "http://jabber.org/protocol/pubsub";

/// Buddycloud channel extensions (`user-items`, `recent-items`, `replies`, `thread`).
pub const BUDDYCLOUD: &str = "http://buddycloud.org/v1";

/// XEP-0059 result set management.
pub const RSM: &str = "http://jabber.org/protocol/rsm";

/// Atom syndication entries.
pub const ATOM: &str = "http://www.w3.org/2005/Atom";
