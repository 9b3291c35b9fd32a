//! Outbound stanza transport.
//!
//! The engine only ever hands fully built stanzas to a [`StanzaSink`]; replies
//! come back through [`ChannelClient::handle_stanza`](crate::ChannelClient::handle_stanza).

use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::Stream;
use minidom::Element;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::trace;

use crate::{Error, Result};

/// Something that can put a stanza on the wire.
///
/// Implementations must not block; queue the stanza and return.
pub trait StanzaSink: Send + Sync + 'static {
    /// Dispatch one stanza.
    fn send(&self, stanza: Element) -> Result<()>;
}

/// In-process transport backed by an unbounded channel.
///
/// The connection driver drains the paired [`OutgoingStanzas`] stream and
/// writes each element to the XMPP stream.
#[derive(Clone, Debug)]
pub struct ChannelTransport {
    sender: mpsc::UnboundedSender<Element>,
}

impl ChannelTransport {
    /// Create a transport and the stream of stanzas it emits.
    pub fn new() -> (Self, OutgoingStanzas) {
        let (tx, rx) = mpsc::unbounded_channel();
        let outgoing = OutgoingStanzas {
            receiver: UnboundedReceiverStream::new(rx),
        };
        (Self { sender: tx }, outgoing)
    }
}

impl StanzaSink for ChannelTransport {
    fn send(&self, stanza: Element) -> Result<()> {
        trace!(to = stanza.attr("to").unwrap_or(""), "queueing stanza");
        self.sender
            .send(stanza)
            .map_err(|_| Error::connection("outgoing stanza stream closed"))
    }
}

/// Stream of stanzas emitted through a [`ChannelTransport`].
pub struct OutgoingStanzas {
    receiver: UnboundedReceiverStream<Element>,
}

impl OutgoingStanzas {
    /// Await the next outgoing stanza.
    pub async fn recv(&mut self) -> Option<Element> {
        self.receiver.as_mut().recv().await
    }

    /// Take a stanza if one is already queued.
    pub fn try_recv(&mut self) -> Option<Element> {
        self.receiver.as_mut().try_recv().ok()
    }
}

impl Stream for OutgoingStanzas {
    type Item = Element;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.receiver).poll_next(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ns;

    #[tokio::test]
    async fn delivers_stanzas_in_order() {
        let (transport, mut outgoing) = ChannelTransport::new();
        for id in ["a", "b"] {
            let iq = Element::builder("iq", ns::CLIENT).attr("id", id).build();
            transport.send(iq).unwrap();
        }
        assert_eq!(outgoing.recv().await.unwrap().attr("id"), Some("a"));
        assert_eq!(outgoing.recv().await.unwrap().attr("id"), Some("b"));
        assert!(outgoing.try_recv().is_none());
    }

    #[test]
    fn send_fails_once_stream_dropped() {
        let (transport, outgoing) = ChannelTransport::new();
        drop(outgoing);
        let err = transport
            .send(Element::builder("iq", ns::CLIENT).build())
            .unwrap_err();
        assert!(matches!(err, Error::Connection(_)));
    }
}
