//! Exercises login, access recording, and the `.broker` built-ins together
//! through a real [`Handler`], the way a connected peer would see them.

use std::io;
use std::sync::Arc;

use parking_lot::Mutex;
use shv_broker::{AccessStage, BrokerState, LoginStage, PeerRegistry, Role, RpcStage, TableLoginCallback};
use shv_chainpack::Packer;
use shv_client::{LoginOptions, PasswordKind, ShvClient};
use shv_handler::Handler;
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

/// Sends a request whose param is a single ChainPack string, since
/// [`ShvClient::call_void`] only covers the no-param case.
async fn call_with_string_param<S>(client: &mut ShvClient<S>, path: &str, method: &str, param: &str) -> io::Result<i64>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let request_id = 1000; // distinct from the client's own hello/login ids
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
async fn login_then_broker_name_round_trip() {
    let state = make_state();
    let cb = Arc::new(TableLoginCallback::new().add_user("admin", "admin!123", "admin"));
    let cid = state.lock().allocate_cid(0);

    let (mut caller, callee) = ShvClient::pair();
    let mut handler = Handler::new(
        callee,
        vec![
            Box::new(LoginStage::new(cid, state.clone(), cb)),
            Box::new(AccessStage::new(cid, state.clone())),
            Box::new(RpcStage::new(cid, state.clone(), PeerRegistry::new())),
        ],
    );

    let driver = tokio::spawn(async move {
        let opts = LoginOptions {
            username: "admin",
            password: "admin!123",
            password_kind: PasswordKind::Plain,
            device_id: None,
            device_mount_point: None,
        };
        let result = caller.login(&opts).await.unwrap();
        assert_eq!(result.client_id, Some(cid));

        let request_id = caller.call_void(".broker", "name").await.unwrap();
        let (meta, payload) = caller.read_message().await.unwrap().unwrap();
        assert_eq!(meta.request_id, Some(request_id));
        let name = shv_proto::find_imap_field(&payload, &shv_proto::Limits::default(), shv_proto::imap_key::RESULT)
            .unwrap()
            .unwrap();
        match name {
            shv_value::Item::String(c) => assert_eq!(String::from_utf8(c.data).unwrap(), "shvbroker"),
            other => panic!("unexpected result shape: {other:?}"),
        }
        caller
    });

    // hello
    assert!(matches!(handler.run_once().await.unwrap(), shv_handler::Tick::Dispatched));
    // login
    assert!(matches!(handler.run_once().await.unwrap(), shv_handler::Tick::Dispatched));
    // .broker/name
    assert!(matches!(handler.run_once().await.unwrap(), shv_handler::Tick::Dispatched));

    let _caller = driver.await.unwrap();
    assert_eq!(state.lock().peer(cid).unwrap().role.as_deref(), Some("admin"));
}

#[tokio::test]
async fn subscribe_then_subscriptions_round_trip() {
    let state = make_state();
    let cb = Arc::new(TableLoginCallback::new().add_user("admin", "admin!123", "admin"));
    let cid = state.lock().allocate_cid(0);

    let (mut caller, callee) = ShvClient::pair();
    let mut handler = Handler::new(
        callee,
        vec![
            Box::new(LoginStage::new(cid, state.clone(), cb)),
            Box::new(AccessStage::new(cid, state.clone())),
            Box::new(RpcStage::new(cid, state.clone(), PeerRegistry::new())),
        ],
    );

    let driver = tokio::spawn(async move {
        let opts = LoginOptions {
            username: "admin",
            password: "admin!123",
            password_kind: PasswordKind::Plain,
            device_id: None,
            device_mount_point: None,
        };
        caller.login(&opts).await.unwrap();

        call_with_string_param(&mut caller, ".broker/currentClient", "subscribe", "test/device:*:*").await.unwrap();
        caller.read_message().await.unwrap().unwrap();

        caller.call_void(".broker/currentClient", "subscriptions").await.unwrap();
        let (_, payload) = caller.read_message().await.unwrap().unwrap();
        let result = shv_proto::find_imap_field(&payload, &shv_proto::Limits::default(), shv_proto::imap_key::RESULT)
            .unwrap()
            .unwrap();
        let subs = match result {
            shv_value::Item::List => true,
            other => panic!("unexpected result shape: {other:?}"),
        };
        assert!(subs);
        caller
    });

    assert!(matches!(handler.run_once().await.unwrap(), shv_handler::Tick::Dispatched)); // hello
    assert!(matches!(handler.run_once().await.unwrap(), shv_handler::Tick::Dispatched)); // login
    assert!(matches!(handler.run_once().await.unwrap(), shv_handler::Tick::Dispatched)); // subscribe
    assert!(matches!(handler.run_once().await.unwrap(), shv_handler::Tick::Dispatched)); // subscriptions

    let _caller = driver.await.unwrap();
    assert!(state.lock().subscriptions.subscriptions_of(cid).contains(&"test/device:*:*".to_string()));
}
