//! End-to-end tests over real loopback connections.
//!
//! Each test runs an in-process scripted server speaking the wire
//! protocol over TCP (or a Unix socket) and drives the public client
//! API against it.

use binder::{
    BindError, BinderConfig, ConnectionManager, ConnectionState, NoRetry, ObjectDescriptor,
    RequestDispatcher,
};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use wire::{AtomDecl, AtomId, AtomMode, ChannelId, CommandDecl, CommandId, ObjectId, WireMessage, WireValue};

const MAX_FRAME: usize = wire::DEFAULT_MAX_FRAME_SIZE;
const TEST_TIMEOUT: Duration = Duration::from_secs(5);

async fn server_recv(stream: &mut TcpStream) -> WireMessage {
    tokio::time::timeout(TEST_TIMEOUT, wire::read_frame(stream, MAX_FRAME))
        .await
        .expect("server read timed out")
        .expect("server read failed")
        .expect("client closed early")
}

async fn server_send(stream: &mut TcpStream, message: &WireMessage) {
    wire::write_frame(stream, message, MAX_FRAME)
        .await
        .expect("server write failed");
}

fn request_channel(message: &WireMessage) -> ChannelId {
    match message {
        WireMessage::RootRequest { reply_channel, .. } => *reply_channel,
        other => panic!("expected RootRequest, got {}", other.kind()),
    }
}

fn reply_with_atoms(
    channel: ChannelId,
    object_id: u64,
    atoms: &[(&str, u64, AtomMode, WireValue)],
    commands: &[(&str, u64)],
) -> WireMessage {
    WireMessage::RootReply {
        channel,
        object_id: ObjectId(object_id),
        atoms: atoms
            .iter()
            .map(|(name, id, mode, initial)| {
                (
                    name.to_string(),
                    AtomDecl {
                        id: AtomId(*id),
                        mode: *mode,
                        initial: initial.clone(),
                    },
                )
            })
            .collect(),
        commands: commands
            .iter()
            .map(|(name, id)| (name.to_string(), CommandDecl { id: CommandId(*id) }))
            .collect(),
    }
}

async fn connected_client(config: BinderConfig) -> (ConnectionManager, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();

    let manager = ConnectionManager::new(config);
    manager.connect(&addr).unwrap();

    let (stream, _) = listener.accept().await.unwrap();
    manager.wait_ready().await.unwrap();
    (manager, stream)
}

#[test_log::test(tokio::test)]
async fn wait_ready_resolves_once_connected() {
    let (manager, _stream) = connected_client(BinderConfig::default()).await;
    assert_eq!(manager.state(), ConnectionState::Ready);
    // Idempotent for an already-Ready connection
    manager.wait_ready().await.unwrap();
}

#[test_log::test(tokio::test)]
async fn wait_ready_fails_when_connection_refused() {
    // Bind then drop to get a port nothing listens on
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);

    let manager = ConnectionManager::new(BinderConfig::default());
    manager.connect(&addr).unwrap();

    let err = manager.wait_ready().await.unwrap_err();
    assert!(matches!(err, BindError::Closed { .. }));
    assert_eq!(manager.state(), ConnectionState::Closed);
}

#[test_log::test(tokio::test)]
async fn connect_twice_is_invalid_state() {
    let (manager, _stream) = connected_client(BinderConfig::default()).await;
    let err = manager.connect("127.0.0.1:1").unwrap_err();
    assert!(matches!(err, BindError::InvalidState { .. }));
}

#[test_log::test(tokio::test)]
async fn send_before_ready_is_not_ready() {
    let manager = ConnectionManager::new(BinderConfig::default());
    let err = manager
        .send(WireMessage::Release {
            object_id: ObjectId(1),
        })
        .unwrap_err();
    assert!(matches!(
        err,
        BindError::NotReady {
            state: ConnectionState::Disconnected
        }
    ));
}

#[test_log::test(tokio::test)]
async fn bind_object_and_receive_updates() {
    // Scenario: request "foo" with {a: 1}; the reply declares a
    // read-only atom bar = 5; a later push of 7 reaches subscribers.
    let (manager, mut stream) = connected_client(BinderConfig::default()).await;
    let (push_tx, push_rx) = tokio::sync::oneshot::channel::<()>();

    let server = tokio::spawn(async move {
        let request = server_recv(&mut stream).await;
        let (type_name, args) = match &request {
            WireMessage::RootRequest {
                type_name, args, ..
            } => (type_name.clone(), args.clone()),
            other => panic!("expected RootRequest, got {}", other.kind()),
        };
        assert_eq!(type_name, "foo");
        assert_eq!(args["a"], WireValue::Int(1));

        let reply = reply_with_atoms(
            request_channel(&request),
            1,
            &[("bar", 10, AtomMode::ReadOnly, WireValue::Int(5))],
            &[],
        );
        server_send(&mut stream, &reply).await;

        // Hold the push until the client has read the initial value
        push_rx.await.unwrap();
        server_send(
            &mut stream,
            &WireMessage::AtomUpdate {
                atom_id: AtomId(10),
                value: WireValue::Int(7),
                write_seq: None,
            },
        )
        .await;
        stream
    });

    let dispatcher = RequestDispatcher::new(manager.clone());
    let proxy = dispatcher
        .request_object(
            ObjectDescriptor::new("foo").atom("bar"),
            BTreeMap::from([("a".to_string(), WireValue::Int(1))]),
        )
        .await
        .unwrap();

    let bar = proxy.atom("bar").unwrap();
    assert_eq!(bar.value(), WireValue::Int(5));

    let (update_tx, mut update_rx) = mpsc::unbounded_channel();
    let sub = bar.subscribe(move |value| {
        let _ = update_tx.send(value.clone());
    });
    push_tx.send(()).unwrap();

    let pushed = tokio::time::timeout(TEST_TIMEOUT, update_rx.recv())
        .await
        .expect("no update delivered")
        .unwrap();
    assert_eq!(pushed, WireValue::Int(7));
    assert_eq!(bar.value(), WireValue::Int(7));

    sub.unsubscribe();
    server.await.unwrap();
}

#[test_log::test(tokio::test)]
async fn request_times_out_without_reply() {
    // Scenario: the server accepts but never answers; the request must
    // fail with a timeout instead of hanging.
    let config = BinderConfig::default().with_request_timeout(Duration::from_millis(200));
    let (manager, _stream) = connected_client(config).await;

    let dispatcher = RequestDispatcher::new(manager);
    let err = dispatcher
        .request_object(ObjectDescriptor::new("slow"), BTreeMap::new())
        .await
        .unwrap_err();
    assert!(matches!(err, BindError::RequestTimeout { .. }));
}

#[test_log::test(tokio::test)]
async fn pending_request_fails_when_peer_disconnects() {
    let (manager, stream) = connected_client(BinderConfig::default()).await;

    let dispatcher = RequestDispatcher::new(manager.clone());
    let request = dispatcher.request_object(ObjectDescriptor::new("foo"), BTreeMap::new());

    // Drop the server side while the request is in flight
    let closer = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(stream);
    });

    let err = tokio::time::timeout(TEST_TIMEOUT, request)
        .await
        .expect("request hung after closure")
        .unwrap_err();
    assert!(matches!(err, BindError::Closed { .. }));
    closer.await.unwrap();

    manager.wait_ready().await.unwrap_err();
}

#[test_log::test(tokio::test)]
async fn optimistic_write_reaches_the_server_and_ack_applies() {
    let (manager, mut stream) = connected_client(BinderConfig::default()).await;

    let server = tokio::spawn(async move {
        let request = server_recv(&mut stream).await;
        let reply = reply_with_atoms(
            request_channel(&request),
            2,
            &[("weight", 11, AtomMode::Mutable, WireValue::Float(1.0))],
            &[],
        );
        server_send(&mut stream, &reply).await;

        // The local write arrives with its sequence number
        let set = server_recv(&mut stream).await;
        let seq = match set {
            WireMessage::AtomSet {
                atom_id: AtomId(11),
                value: WireValue::Float(v),
                write_seq,
            } => {
                assert_eq!(v, 0.5);
                write_seq
            }
            other => panic!("expected AtomSet, got {}", other.kind()),
        };
        assert_eq!(seq, 1);

        // Echo it back as the authoritative rebroadcast
        server_send(
            &mut stream,
            &WireMessage::AtomUpdate {
                atom_id: AtomId(11),
                value: WireValue::Float(0.5),
                write_seq: Some(seq),
            },
        )
        .await;
        stream
    });

    let dispatcher = RequestDispatcher::new(manager.clone());
    let proxy = dispatcher
        .request_object(
            ObjectDescriptor::new("foo").mutable_atom("weight"),
            BTreeMap::new(),
        )
        .await
        .unwrap();

    let weight = proxy.mutable("weight").unwrap();
    let (update_tx, mut update_rx) = mpsc::unbounded_channel();
    let _sub = weight.subscribe(move |value| {
        let _ = update_tx.send(value.clone());
    });

    weight.set(0.5).unwrap();
    // Optimistic: reflected before any server traffic
    assert_eq!(weight.value(), WireValue::Float(0.5));

    // First notification is the local write, second is the applied ack
    let first = tokio::time::timeout(TEST_TIMEOUT, update_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first, WireValue::Float(0.5));
    let second = tokio::time::timeout(TEST_TIMEOUT, update_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(second, WireValue::Float(0.5));

    server.await.unwrap();
}

#[test_log::test(tokio::test)]
async fn commands_are_fire_and_forget() {
    let (manager, mut stream) = connected_client(BinderConfig::default()).await;

    let server = tokio::spawn(async move {
        let request = server_recv(&mut stream).await;
        let reply = reply_with_atoms(request_channel(&request), 3, &[], &[("restart", 21)]);
        server_send(&mut stream, &reply).await;

        let command = server_recv(&mut stream).await;
        match command {
            WireMessage::Command {
                command_id,
                payload,
            } => {
                assert_eq!(command_id, CommandId(21));
                assert_eq!(payload, WireValue::Null);
            }
            other => panic!("expected Command, got {}", other.kind()),
        }
        stream
    });

    let dispatcher = RequestDispatcher::new(manager.clone());
    let proxy = dispatcher
        .request_object(
            ObjectDescriptor::new("foo").command("restart"),
            BTreeMap::new(),
        )
        .await
        .unwrap();

    proxy.command("restart").unwrap().trigger().unwrap();
    server.await.unwrap();
}

#[test_log::test(tokio::test)]
async fn dropping_a_proxy_releases_the_object() {
    let (manager, mut stream) = connected_client(BinderConfig::default()).await;

    let server = tokio::spawn(async move {
        let request = server_recv(&mut stream).await;
        let reply = reply_with_atoms(
            request_channel(&request),
            42,
            &[("bar", 10, AtomMode::ReadOnly, WireValue::Null)],
            &[],
        );
        server_send(&mut stream, &reply).await;

        let release = server_recv(&mut stream).await;
        assert_eq!(
            release,
            WireMessage::Release {
                object_id: ObjectId(42)
            }
        );
        stream
    });

    let dispatcher = RequestDispatcher::new(manager.clone());
    let proxy = dispatcher
        .request_object(ObjectDescriptor::new("foo").atom("bar"), BTreeMap::new())
        .await
        .unwrap();
    drop(proxy);

    server.await.unwrap();
}

#[test_log::test(tokio::test)]
async fn duplicate_reply_does_not_disturb_the_bound_proxy() {
    let (manager, mut stream) = connected_client(BinderConfig::default()).await;
    let (push_tx, push_rx) = tokio::sync::oneshot::channel::<()>();

    let server = tokio::spawn(async move {
        let request = server_recv(&mut stream).await;
        let channel = request_channel(&request);
        let reply = reply_with_atoms(
            channel,
            1,
            &[("bar", 10, AtomMode::ReadOnly, WireValue::Int(5))],
            &[],
        );
        server_send(&mut stream, &reply).await;
        // A second reply for the same channel: dropped with a
        // diagnostic, dispatch keeps going
        server_send(
            &mut stream,
            &reply_with_atoms(channel, 9, &[("zzz", 99, AtomMode::ReadOnly, WireValue::Null)], &[]),
        )
        .await;

        push_rx.await.unwrap();
        server_send(
            &mut stream,
            &WireMessage::AtomUpdate {
                atom_id: AtomId(10),
                value: WireValue::Int(6),
                write_seq: None,
            },
        )
        .await;
        stream
    });

    let dispatcher = RequestDispatcher::new(manager.clone());
    let proxy = dispatcher
        .request_object(ObjectDescriptor::new("foo").atom("bar"), BTreeMap::new())
        .await
        .unwrap();
    assert_eq!(proxy.object_id(), ObjectId(1));

    let bar = proxy.atom("bar").unwrap();
    let (update_tx, mut update_rx) = mpsc::unbounded_channel();
    let _sub = bar.subscribe(move |value| {
        let _ = update_tx.send(value.clone());
    });
    push_tx.send(()).unwrap();

    let pushed = tokio::time::timeout(TEST_TIMEOUT, update_rx.recv())
        .await
        .expect("dispatch stopped after duplicate reply")
        .unwrap();
    assert_eq!(pushed, WireValue::Int(6));

    server.await.unwrap();
}

#[test_log::test(tokio::test)]
async fn unix_socket_transport_binds_objects() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("binder.sock");
    let listener = tokio::net::UnixListener::bind(&path).unwrap();

    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let request = wire::read_frame(&mut stream, MAX_FRAME)
            .await
            .unwrap()
            .unwrap();
        let channel = request_channel(&request);
        let reply = reply_with_atoms(
            channel,
            7,
            &[("progress", 10, AtomMode::ReadOnly, WireValue::Int(0))],
            &[],
        );
        wire::write_frame(&mut stream, &reply, MAX_FRAME).await.unwrap();
        stream
    });

    let manager = ConnectionManager::new(BinderConfig::default());
    manager
        .connect(&format!("unix:{}", path.display()))
        .unwrap();
    manager.wait_ready().await.unwrap();

    let dispatcher = RequestDispatcher::new(manager.clone());
    let proxy = dispatcher
        .request_object(
            ObjectDescriptor::new("diffusion").atom("progress"),
            BTreeMap::new(),
        )
        .await
        .unwrap();
    assert_eq!(proxy.atom("progress").unwrap().value(), WireValue::Int(0));

    server.await.unwrap();
}

#[test_log::test(tokio::test)]
async fn connect_with_policy_gives_up_per_policy() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);

    let err = binder::connect_with_policy(&addr, BinderConfig::default(), NoRetry)
        .await
        .unwrap_err();
    assert!(matches!(err, BindError::Closed { .. }));
}

#[test_log::test(tokio::test)]
async fn connect_with_policy_returns_a_ready_manager() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let accept = tokio::spawn(async move { listener.accept().await.unwrap() });

    let manager = binder::connect_with_policy(&addr, BinderConfig::default(), NoRetry)
        .await
        .unwrap();
    assert_eq!(manager.state(), ConnectionState::Ready);
    accept.await.unwrap();
}
