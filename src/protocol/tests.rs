// test-only module included via protocol/mod.rs
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use crate::error::ProtocolError;
use crate::protocol::dispatcher::DispatchTable;
use crate::protocol::handshake::{AccessControl, CHANNEL_OBJECT_ID};
use crate::protocol::interface::InterfaceDescriptor;
use crate::service::channel::{ChannelBuilder, DataChannel, Role};
use bytes::Bytes;
use std::sync::Arc;

struct Greeter;

fn greeter_interface() -> Arc<InterfaceDescriptor> {
    Arc::new(
        InterfaceDescriptor::builder("IGreeter")
            .method("SayHello")
            .build()
            .unwrap(),
    )
}

async fn connected(server: ChannelBuilder) -> (DataChannel, DataChannel) {
    let table = Arc::new(
        DispatchTable::<Greeter>::builder(greeter_interface())
            .method("SayHello", |_g, (name,): (String,)| async move {
                Ok(format!("Hello {name}"))
            })
            .build()
            .unwrap(),
    );
    let server = server.build().unwrap();
    server.export(Arc::new(Greeter), table).unwrap();

    let client = DataChannel::builder(Role::Client).build().unwrap();
    let (a, b) = tokio::io::duplex(16 * 1024);
    server.attach(a).await.unwrap();
    client.attach(b).await.unwrap();
    (server, client)
}

#[tokio::test]
async fn test_handshake_gates_application_calls() {
    let (server, client) = connected(DataChannel::builder(Role::Server)).await;
    let greeter = client.bootstrap_proxy(greeter_interface()).unwrap();

    // =================== Before the handshake ===================
    let early: Result<String, _> = greeter.call("SayHello", ("World!".to_string(),)).await;
    match early {
        Err(ProtocolError::RemoteCall(text)) => assert!(text.contains("handshake")),
        other => panic!("Expected rejection, got {other:?}"),
    }

    // =================== Handshake ===================
    client.handshake("IGreeter", "alice").await.unwrap();
    assert!(server.is_handshake_complete());
    assert_eq!(server.client_id().as_deref(), Some("alice"));

    // =================== After the handshake ===================
    let reply: String = greeter
        .call("SayHello", ("World!".to_string(),))
        .await
        .unwrap();
    assert_eq!(reply, "Hello World!");
}

#[tokio::test]
async fn test_interface_mismatch_is_authentication_error() {
    let (server, client) = connected(DataChannel::builder(Role::Server)).await;
    let result = client.handshake("ICalculator", "alice").await;
    assert!(matches!(result, Err(ProtocolError::AuthenticationError(_))));
    assert!(!server.is_handshake_complete());
}

#[tokio::test]
async fn test_access_control_rejects_client() {
    let only_admin: Arc<dyn AccessControl> =
        Arc::new(|client: &str, _service: &str| client == "admin");
    let (_server, client) =
        connected(DataChannel::builder(Role::Server).access_control(only_admin)).await;

    let denied = client.handshake("IGreeter", "guest").await;
    match denied {
        Err(ProtocolError::AuthenticationError(text)) => assert!(text.contains("guest")),
        other => panic!("Expected access denial, got {other:?}"),
    }
    client.handshake("IGreeter", "admin").await.unwrap();
}

#[tokio::test]
async fn test_unknown_targets_reply_with_failure_text() {
    let (_server, client) = connected(DataChannel::builder(Role::Server)).await;
    client.handshake("IGreeter", "alice").await.unwrap();

    let unknown_object = client.call_raw(55, 0, Bytes::new()).await;
    assert!(matches!(unknown_object, Err(ProtocolError::RemoteCall(t)) if t.contains("55")));

    let unknown_method = client.call_raw(0, 50, Bytes::new()).await;
    assert!(matches!(unknown_method, Err(ProtocolError::RemoteCall(t)) if t.contains("50")));

    let unknown_channel_method = client.call_raw(CHANNEL_OBJECT_ID, 999, Bytes::new()).await;
    assert!(matches!(unknown_channel_method, Err(ProtocolError::RemoteCall(_))));

    // the channel keeps serving after failures
    client.ping().await.unwrap();
}

#[tokio::test]
async fn test_bad_arguments_fail_only_that_call() {
    let (_server, client) = connected(DataChannel::builder(Role::Server)).await;
    client.handshake("IGreeter", "alice").await.unwrap();

    // a negative reference id where SayHello expects its string
    let garbage = Bytes::from_static(&[0xfb, 0xff, 0xff, 0xff]);
    let result = client.call_raw(0, 0, garbage).await;
    assert!(matches!(result, Err(ProtocolError::RemoteCall(_))));

    let greeter = client.bootstrap_proxy(greeter_interface()).unwrap();
    let reply: String = greeter.call("SayHello", ("again".to_string(),)).await.unwrap();
    assert_eq!(reply, "Hello again");
}
