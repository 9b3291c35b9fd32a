//! Request/response correlation by stanza id.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use minidom::Element;
use parking_lot::Mutex;
use rand::Rng;
use tokio::sync::oneshot;
use tracing::trace;

use crate::transport::StanzaSink;
use crate::{Error, Result};

type PendingMap = Arc<Mutex<HashMap<String, oneshot::Sender<Element>>>>;

/// Tracks outstanding requests and routes replies back to their waiters.
pub struct Correlator {
    sink: Arc<dyn StanzaSink>,
    pending: PendingMap,
    prefix: String,
    counter: AtomicU64,
}

impl Correlator {
    /// Create a correlator dispatching through `sink`.
    pub fn new(sink: Arc<dyn StanzaSink>) -> Self {
        let prefix: u32 = rand::thread_rng().gen();
        Self {
            sink,
            pending: Arc::new(Mutex::new(HashMap::new())),
            prefix: format!("{prefix:08x}"),
            counter: AtomicU64::new(0),
        }
    }

    fn mint_token(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        format!("bc-{}-{n}", self.prefix)
    }

    /// Tag `stanza` with a fresh id, register it and dispatch it.
    ///
    /// The returned future resolves with the matching reply. Dropping it
    /// forgets the token so that a late reply is treated as unknown.
    pub fn send(&self, mut stanza: Element) -> Result<PendingReply> {
        let token = self.mint_token();
        stanza.set_attr("id", token.clone());

        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(token.clone(), tx);
        trace!(%token, "registered pending request");

        if let Err(e) = self.sink.send(stanza) {
            self.pending.lock().remove(&token);
            return Err(e);
        }

        Ok(PendingReply {
            token,
            rx,
            pending: Arc::clone(&self.pending),
        })
    }

    /// Route an inbound stanza by its `id` attribute.
    ///
    /// Returns `false` when nothing was waiting for it.
    pub fn receive(&self, stanza: Element) -> bool {
        match stanza.attr("id").map(str::to_owned) {
            Some(token) => self.resolve(&token, stanza),
            None => false,
        }
    }

    /// Complete the request registered under `token`.
    ///
    /// Unknown or already resolved tokens are a no-op and return `false`.
    pub fn resolve(&self, token: &str, reply: Element) -> bool {
        let Some(tx) = self.pending.lock().remove(token) else {
            trace!(%token, "no pending request for reply");
            return false;
        };
        trace!(%token, "resolving pending request");
        tx.send(reply).is_ok()
    }

    /// Number of requests still awaiting a reply.
    pub fn outstanding(&self) -> usize {
        self.pending.lock().len()
    }
}

/// Future for the reply to one correlated request.
pub struct PendingReply {
    token: String,
    rx: oneshot::Receiver<Element>,
    pending: PendingMap,
}

impl PendingReply {
    /// Tracking token written into the outgoing stanza.
    pub fn token(&self) -> &str {
        &self.token
    }
}

impl Future for PendingReply {
    type Output = Result<Element>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map_err(|_| Error::connection("session closed before reply"))
    }
}

impl Drop for PendingReply {
    fn drop(&mut self) {
        self.pending.lock().remove(&self.token);
    }
}
