use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use buddycloud_channels::minidom::Element;
use buddycloud_channels::{
    ns, ChannelClient, ChannelTransport, DiscoHandler, DiscoRequest, DiscoverRequest, Error,
    OutgoingStanzas,
};
use serde_json::{json, Value};

const DOMAIN: &str = "example.com";

fn client() -> (ChannelClient, OutgoingStanzas) {
    let (transport, outgoing) = ChannelTransport::new();
    (ChannelClient::builder(DOMAIN, transport).build(), outgoing)
}

fn id_of(stanza: &Element) -> String {
    stanza.attr("id").expect("outgoing stanza carries an id").to_string()
}

fn disco_items(id: &str, jids: &[&str]) -> Element {
    let items: String = jids
        .iter()
        .map(|jid| format!("<item jid='{jid}'/>"))
        .collect();
    format!(
        "<iq xmlns='jabber:client' type='result' from='example.com' id='{id}'>\
         <query xmlns='http://jabber.org/protocol/disco#items'>{items}</query></iq>"
    )
    .parse()
    .unwrap()
}

fn disco_info(id: &str, category: &str, kind: &str) -> Element {
    format!(
        "<iq xmlns='jabber:client' type='result' id='{id}'>\
         <query xmlns='http://jabber.org/protocol/disco#info'>\
         <identity category='{category}' type='{kind}'/>\
         <feature var='http://jabber.org/protocol/pubsub'/>\
         </query></iq>"
    )
    .parse()
    .unwrap()
}

fn iq_error(id: &str) -> Element {
    format!(
        "<iq xmlns='jabber:client' type='error' id='{id}'>\
         <error type='cancel'>\
         <error-condition xmlns='urn:ietf:params:xml:ns:xmpp-stanzas'/>\
         </error></iq>"
    )
    .parse()
    .unwrap()
}

/// Answer the disco#items request and return the probes that follow, keyed by target.
async fn enumerate(
    client: &ChannelClient,
    outgoing: &mut OutgoingStanzas,
    jids: &[&str],
) -> Vec<(String, String)> {
    let items = outgoing.recv().await.unwrap();
    assert!(client.handle_stanza(disco_items(&id_of(&items), jids)));
    let mut probes = Vec::new();
    for _ in jids {
        let probe = outgoing.recv().await.unwrap();
        assert!(probe.get_child("query", ns::DISCO_INFO).is_some());
        probes.push((probe.attr("to").unwrap().to_string(), id_of(&probe)));
    }
    probes
}

#[tokio::test]
async fn sends_disco_items_to_domain() {
    let (client, mut outgoing) = client();
    let inspect = async {
        let stanza = outgoing.recv().await.unwrap();
        assert_eq!(stanza.name(), "iq");
        assert_eq!(stanza.attr("to"), Some(DOMAIN));
        assert_eq!(stanza.attr("type"), Some("get"));
        assert!(stanza.attr("id").is_some());
        assert!(stanza.get_child("query", ns::DISCO_ITEMS).is_some());
        client.handle_stanza(iq_error(&id_of(&stanza)));
    };
    let request = DiscoverRequest::default();
    let (result, ()) = tokio::join!(client.discover(&request), inspect);
    assert!(result.is_err());
}

#[tokio::test]
async fn enumeration_error_is_passed_through() {
    let (client, mut outgoing) = client();
    let respond = async {
        let stanza = outgoing.recv().await.unwrap();
        client.handle_stanza(iq_error(&id_of(&stanza)));
    };
    let request = DiscoverRequest::default();
    let (result, ()) = tokio::join!(client.discover(&request), respond);
    let err = result.unwrap_err();
    let remote = err.as_remote().expect("remote error");
    assert_eq!(remote.kind, "cancel");
    assert_eq!(remote.condition, "error-condition");
    assert!(client.channel_server().is_none());
}

#[tokio::test]
async fn no_items_means_no_server() {
    let (client, mut outgoing) = client();
    let respond = async {
        let stanza = outgoing.recv().await.unwrap();
        client.handle_stanza(disco_items(&id_of(&stanza), &[]));
    };
    let request = DiscoverRequest::default();
    let (result, ()) = tokio::join!(client.discover(&request), respond);
    assert!(matches!(result, Err(Error::NoServerFound)));
    assert_eq!(result.unwrap_err().to_string(), "No buddycloud server found");
    assert!(outgoing.try_recv().is_none());
}

#[tokio::test]
async fn probes_every_listed_component() {
    let (client, mut outgoing) = client();
    let respond = async {
        let probes = enumerate(
            &client,
            &mut outgoing,
            &["channels.example.com", "topics.example.com"],
        )
        .await;
        assert_eq!(probes.len(), 2);
        for (to, id) in probes {
            assert!(to.contains(DOMAIN));
            client.handle_stanza(disco_info(&id, "pubsub", "service"));
        }
    };
    let request = DiscoverRequest::default();
    let (result, ()) = tokio::join!(client.discover(&request), respond);
    assert!(matches!(result, Err(Error::NoServerFound)));
}

#[tokio::test]
async fn probe_errors_mean_no_server() {
    let (client, mut outgoing) = client();
    let respond = async {
        let probes = enumerate(
            &client,
            &mut outgoing,
            &["channels.example.com", "topics.example.com"],
        )
        .await;
        for (_, id) in probes {
            client.handle_stanza(iq_error(&id));
        }
    };
    let request = DiscoverRequest::default();
    let (result, ()) = tokio::join!(client.discover(&request), respond);
    assert!(matches!(result, Err(Error::NoServerFound)));
    assert!(client.channel_server().is_none());
}

#[test_log::test(tokio::test)]
async fn finds_channel_server_after_negative_probe() {
    let (client, mut outgoing) = client();
    let respond = async {
        let probes = enumerate(
            &client,
            &mut outgoing,
            &["channels.example.com", "topics.example.com"],
        )
        .await;
        let (_, topics) = probes.iter().find(|(to, _)| to.starts_with("topics")).unwrap();
        let (_, channels) = probes.iter().find(|(to, _)| to.starts_with("channels")).unwrap();
        client.handle_stanza(disco_info(topics, "pubsub", "service"));
        client.handle_stanza(disco_info(channels, "pubsub", "channels"));
    };
    let request = DiscoverRequest::default();
    let (result, ()) = tokio::join!(client.discover(&request), respond);
    assert_eq!(result.unwrap(), "channels.example.com");
    assert_eq!(client.channel_server().as_deref(), Some("channels.example.com"));
}

#[test_log::test(tokio::test)]
async fn first_match_wins_while_probes_outstanding() {
    let (client, mut outgoing) = client();
    let mut slow = None;
    let respond = async {
        let probes = enumerate(
            &client,
            &mut outgoing,
            &["a.example.com", "channels.example.com", "c.example.com"],
        )
        .await;
        for (to, id) in probes {
            if to == "channels.example.com" {
                client.handle_stanza(disco_info(&id, "pubsub", "channels"));
            } else {
                slow.get_or_insert_with(Vec::new).push(id);
            }
        }
    };
    let request = DiscoverRequest::default();
    let (result, ()) = tokio::join!(client.discover(&request), respond);
    assert_eq!(result.unwrap(), "channels.example.com");

    for id in slow.unwrap() {
        assert!(!client.handle_stanza(disco_info(&id, "pubsub", "channels")));
    }
    assert_eq!(client.channel_server().as_deref(), Some("channels.example.com"));
}

#[tokio::test(start_paused = true)]
async fn unresponsive_components_time_out() {
    let (client, mut outgoing) = client();
    client.set_discovery_timeout(Some(Duration::from_millis(1)));
    let respond = async {
        enumerate(
            &client,
            &mut outgoing,
            &["channels.example.com", "topics.example.com"],
        )
        .await;
    };
    let request = DiscoverRequest::default();
    let (result, _) = tokio::join!(client.discover(&request), respond);
    assert!(matches!(result, Err(Error::NoServerFound)));
}

#[test_log::test(tokio::test(start_paused = true))]
async fn slow_reply_after_timeout_is_ignored() {
    let (client, mut outgoing) = client();
    client.set_discovery_timeout(Some(Duration::ZERO));
    let mut late = Vec::new();
    let respond = async {
        late = enumerate(&client, &mut outgoing, &["channels.example.com"]).await;
    };
    let request = DiscoverRequest::default();
    let (result, ()) = tokio::join!(client.discover(&request), respond);
    assert!(matches!(result, Err(Error::NoServerFound)));

    tokio::time::sleep(Duration::from_millis(2)).await;
    for (_, id) in late {
        assert!(!client.handle_stanza(disco_info(&id, "pubsub", "channels")));
    }
    assert!(client.channel_server().is_none());
}

#[tokio::test]
async fn manual_server_skips_network() -> anyhow::Result<()> {
    let (client, mut outgoing) = client();
    let request = DiscoverRequest {
        server: Some("channels.example.com".into()),
    };
    let server = client.discover(&request).await?;
    assert_eq!(server, "channels.example.com");
    assert_eq!(client.channel_server().as_deref(), Some("channels.example.com"));
    assert!(outgoing.try_recv().is_none());
    Ok(())
}

struct CountingDisco {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl DiscoHandler for CountingDisco {
    async fn info(&self, request: DiscoRequest) -> buddycloud_channels::Result<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(json!({ "info": request.of }))
    }

    async fn items(&self, request: DiscoRequest) -> buddycloud_channels::Result<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(json!({ "items": request.of }))
    }
}

#[tokio::test]
async fn disco_proxy_delegates_without_traffic() {
    let calls = Arc::new(AtomicUsize::new(0));
    let (transport, mut outgoing) = ChannelTransport::new();
    let client = ChannelClient::builder(DOMAIN, transport)
        .disco_handler(CountingDisco {
            calls: Arc::clone(&calls),
        })
        .build();

    let request = DiscoRequest {
        of: Some("channels.example.com".into()),
        node: None,
    };
    let info = client.discover_info(request.clone()).await.unwrap();
    let items = client.discover_items(request).await.unwrap();
    assert_eq!(info, json!({ "info": "channels.example.com" }));
    assert_eq!(items, json!({ "items": "channels.example.com" }));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(outgoing.try_recv().is_none());
}

#[tokio::test]
async fn disco_proxy_without_handler_is_client_error() {
    let (client, _outgoing) = client();
    let err = client
        .discover_info(DiscoRequest::default())
        .await
        .unwrap_err();
    let client_err = err.as_client().expect("client error");
    assert_eq!(client_err.kind, "modify");
    assert_eq!(client_err.request, json!({}));
}
