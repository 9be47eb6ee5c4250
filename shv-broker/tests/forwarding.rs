//! Exercises the broker's defining behavior end to end: a request actually
//! reaching a mounted peer and its response routing back to the
//! originator, and a signal actually fanning out to a subscriber — both
//! driven through [`shv_broker::serve_connection`] and a shared
//! [`PeerRegistry`], not through direct `Handler::run_once` stepping.

use std::io;
use std::sync::Arc;

use parking_lot::Mutex;
use shv_broker::{serve_connection, BrokerState, PeerRegistry, Role, TableLoginCallback};
use shv_chainpack::Packer;
use shv_client::{LoginOptions, PasswordKind, ShvClient};
use shv_proto::{imap_key, request, RequestMeta};
use shv_value::AccessLevel;
use tokio::io::{AsyncRead, AsyncWrite};

fn make_state() -> Arc<Mutex<BrokerState>> {
    let mut state = BrokerState::new();
    state.roles.insert(
        "admin".to_string(),
        Role::new("admin").grant(AccessLevel::Admin, ["**:*"]),
    );
    Arc::new(Mutex::new(state))
}

async fn call_with_string_param<S>(client: &mut ShvClient<S>, path: &str, method: &str, param: &str) -> io::Result<i64>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let request_id = 1000;
    let buf = std::mem::take(client.writer());
    let mut p = Packer::chain_pack(buf);
    request(&mut p, &RequestMeta { request_id, path, method, ..Default::default() })?;
    p.pack_int(imap_key::PARAM)?;
    p.pack_string(param)?;
    p.container_end()?;
    let Packer::ChainPack(w) = p else { unreachable!() };
    *client.writer() = w.into_inner();
    client.send_msg().await?;
    Ok(request_id)
}

#[tokio::test]
async fn request_to_mounted_peer_forwards_and_routes_the_response_back() {
    let state = make_state();
    let cb = Arc::new(TableLoginCallback::new().add_user("admin", "admin!123", "admin"));
    let registry = PeerRegistry::new();

    let originator_cid = state.lock().allocate_cid(0);
    let device_cid = state.lock().allocate_cid(0);
    state.lock().register_mount(device_cid, "test/device").unwrap();

    let (mut user, broker_side_a) = ShvClient::pair();
    let (mut device, broker_side_b) = ShvClient::pair();

    tokio::spawn(serve_connection(broker_side_a, originator_cid, state.clone(), registry.clone(), cb.clone()));
    tokio::spawn(serve_connection(broker_side_b, device_cid, state.clone(), registry.clone(), cb.clone()));

    let opts = LoginOptions {
        username: "admin",
        password: "admin!123",
        password_kind: PasswordKind::Plain,
        device_id: None,
        device_mount_point: None,
    };
    user.login(&opts).await.unwrap();

    let request_id = user.call_void("test/device/status", "get").await.unwrap();

    let (meta, _) = device.read_message().await.unwrap().unwrap();
    assert_eq!(meta.shv_path, "status");
    assert_eq!(meta.method.as_deref(), Some("get"));
    assert_eq!(meta.caller_ids, vec![originator_cid]);

    let buf = std::mem::take(device.writer());
    let mut p = Packer::chain_pack(buf);
    shv_proto::response_void(&mut p, meta.request_id.unwrap(), &meta.caller_ids).unwrap();
    let Packer::ChainPack(w) = p else { unreachable!() };
    *device.writer() = w.into_inner();
    device.send_msg().await.unwrap();

    let (resp_meta, _) = user.read_message().await.unwrap().unwrap();
    assert_eq!(resp_meta.request_id, Some(request_id));
    assert!(resp_meta.caller_ids.is_empty());
}

#[tokio::test]
async fn signal_from_a_mounted_peer_reaches_its_subscriber_exactly_once() {
    let state = make_state();
    let cb = Arc::new(TableLoginCallback::new().add_user("admin", "admin!123", "admin"));
    let registry = PeerRegistry::new();

    let subscriber_cid = state.lock().allocate_cid(0);
    let device_cid = state.lock().allocate_cid(0);
    state.lock().register_mount(device_cid, "test/device").unwrap();

    let (mut subscriber, broker_side_a) = ShvClient::pair();
    let (mut device, broker_side_b) = ShvClient::pair();

    tokio::spawn(serve_connection(broker_side_a, subscriber_cid, state.clone(), registry.clone(), cb.clone()));
    tokio::spawn(serve_connection(broker_side_b, device_cid, state.clone(), registry.clone(), cb.clone()));

    let opts = LoginOptions {
        username: "admin",
        password: "admin!123",
        password_kind: PasswordKind::Plain,
        device_id: None,
        device_mount_point: None,
    };
    subscriber.login(&opts).await.unwrap();

    call_with_string_param(&mut subscriber, ".broker/currentClient", "subscribe", "test/device/status:*:*")
        .await
        .unwrap();
    subscriber.read_message().await.unwrap().unwrap();

    let buf = std::mem::take(device.writer());
    let mut p = Packer::chain_pack(buf);
    shv_proto::chng(&mut p, "status").unwrap();
    p.container_end().unwrap();
    let Packer::ChainPack(w) = p else { unreachable!() };
    *device.writer() = w.into_inner();
    device.send_msg().await.unwrap();

    let (meta, _) = subscriber.read_message().await.unwrap().unwrap();
    assert_eq!(meta.shv_path, "test/device/status");
    assert_eq!(meta.method.as_deref(), Some("chng"));
    assert_eq!(meta.request_id, None);
}
