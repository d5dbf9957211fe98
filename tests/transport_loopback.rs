mod testutil;

use mash_conformance::transport::{IncomingFrame, Operation, RequestEnvelope, ResponseEnvelope, Status};
use ciborium::value::Value;

#[tokio::test]
async fn duplex_framer_pair_round_trips_a_request() {
    let (mut a, mut b) = testutil::duplex_framer_pair(4096);
    let request = RequestEnvelope {
        message_id: 7,
        operation: Operation::Invoke,
        endpoint_id: 1,
        feature_id: 2,
        payload: Value::Null,
    };
    a.send_request(&request).await.unwrap();
    match b.read_frame().await.unwrap() {
        IncomingFrame::Response(_) => panic!("expected a notification-shaped request, not a response"),
        IncomingFrame::Notification(req) => assert_eq!(req.message_id, 7),
    }
}

#[tokio::test]
async fn loopback_connection_pair_is_connected_on_both_ends() {
    let (client, server) = testutil::loopback_connection_pair().await;
    assert!(client.is_connected());
    assert!(server.is_connected());
    assert!(!client.is_operational());
}

#[tokio::test]
async fn loopback_pair_carries_a_full_invoke_round_trip() {
    let (mut client, mut server) = testutil::loopback_connection_pair().await;

    let server_task = tokio::spawn(async move {
        let framer = server.framer_mut().expect("server connection has a framer");
        let raw = framer.read_raw().await.expect("reading client request");
        let request: RequestEnvelope =
            ciborium::de::from_reader(raw.as_slice()).expect("decoding client request");
        let response = ResponseEnvelope {
            message_id: request.message_id,
            status: Status::Success,
            payload: Value::Text("pong".into()),
        };
        let mut bytes = Vec::new();
        ciborium::ser::into_writer(&response, &mut bytes).unwrap();
        framer.send_raw(bytes).await.expect("sending response");
    });

    let framer = client.framer_mut().expect("client connection has a framer");
    let request = RequestEnvelope {
        message_id: 42,
        operation: Operation::Invoke,
        endpoint_id: 0,
        feature_id: 0xFE,
        payload: Value::Null,
    };
    framer.send_request(&request).await.unwrap();
    let incoming = framer.read_frame().await.unwrap();
    server_task.await.unwrap();

    match incoming {
        IncomingFrame::Response(resp) => {
            assert_eq!(resp.message_id, 42);
            assert!(resp.status.is_success());
        }
        IncomingFrame::Notification(_) => panic!("expected a response"),
    }
}
