mod support;

use std::time::Duration;

use safehome_client::channel::{self, ChannelState};
use safehome_client::{BackendApi, WsTransport};
use safehome_shared::SubjectId;
use tokio::sync::mpsc;
use tokio::time::timeout;

use support::{FakeBackend, HistoryScript, WAIT, sample};

#[tokio::test]
async fn channels_only_see_their_own_subject() {
    let mut backend = FakeBackend::spawn(HistoryScript::Fixed(Vec::new())).await;

    let (a_tx, mut a_events) = mpsc::unbounded_channel();
    let (b_tx, mut b_events) = mpsc::unbounded_channel();
    let mut channel_a = channel::open(backend.transport(), SubjectId::new("child-a"), move |s| {
        let _ = a_tx.send(s);
    });
    let mut channel_b = channel::open(backend.transport(), SubjectId::new("child-b"), move |s| {
        let _ = b_tx.send(s);
    });

    let mut subscribed = vec![
        backend.next_subscription().await,
        backend.next_subscription().await,
    ];
    subscribed.sort();
    assert_eq!(subscribed, vec!["child-a", "child-b"]);

    backend.push("child-a", &sample(1.0, 1.0, 1));
    backend.push("child-b", &sample(2.0, 2.0, 1));
    backend.push("child-a", &sample(1.5, 1.5, 2));

    let first_a = timeout(WAIT, a_events.recv()).await.expect("push for a").expect("sample");
    let second_a = timeout(WAIT, a_events.recv()).await.expect("push for a").expect("sample");
    let only_b = timeout(WAIT, b_events.recv()).await.expect("push for b").expect("sample");
    assert_eq!((first_a.lat, second_a.lat), (1.0, 1.5));
    assert_eq!(only_b.lat, 2.0);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(a_events.try_recv().is_err());
    assert!(b_events.try_recv().is_err());
    assert_eq!(channel_a.status(), ChannelState::Connected);
    assert_eq!(channel_b.subject().as_str(), "child-b");

    channel_a.close().await;
    channel_b.close().await;
    assert!(!channel_a.is_connected());
}

#[tokio::test]
async fn upgrade_request_carries_session_cookies() {
    let mut backend = FakeBackend::spawn(HistoryScript::Fixed(Vec::new())).await;
    let gateway = backend.gateway();
    BackendApi::new(gateway.clone())
        .login("parent@example.com", "hunter22")
        .await
        .expect("login");

    let transport = WsTransport::new(backend.ws_url())
        .with_cookies(gateway.cookie_jar(), backend.http_url());
    let mut handle = channel::open(transport, SubjectId::new("child-a"), |_| {});
    assert_eq!(backend.next_subscription().await, "child-a");

    let cookies = backend.upgrade_cookies();
    assert_eq!(cookies.len(), 1);
    assert!(
        cookies[0].as_deref().is_some_and(|c| c.contains("sid=session-1")),
        "upgrade cookies were {cookies:?}"
    );

    handle.close().await;
}

#[tokio::test]
async fn unreachable_origin_stays_offline_until_closed() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);

    let transport = WsTransport::new(url::Url::parse(&format!("ws://{addr}/ws")).expect("url"));
    let mut handle = channel::open(transport, SubjectId::new("child-a"), |_| {});
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!handle.is_connected());

    timeout(WAIT, handle.close()).await.expect("close in time");
    assert_eq!(handle.status(), ChannelState::Disconnected);
}
