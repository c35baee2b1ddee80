//! CoA / Disconnect Reverse Routing Tests
//!
//! A fake NAS listens on a local UDP port and answers dynamic authorization
//! requests the way an access device would. Requests travel through real
//! module pipelines and the UDP exchanger.

use radius_edge::coa::{CoaDynamicConfig, CoaNasAttributeConfig};
use radius_edge::{
    CoaDynamicModule, CoaNasAttributeModule, ExchangeError, MemoryNasTracker, MemoryStorage,
    ModuleError, NasTracker, Pipeline, Request, TrackerError, UdpExchanger,
};
use radius_proto::auth::{calculate_response_authenticator, verify_hashed_request_authenticator};
use radius_proto::{Attribute, AttributeType, Code, Packet};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

const SECRET: &[u8] = b"coa-secret";

/// Fake NAS acknowledging every request it receives
///
/// Returns its port and a channel of the requests it saw.
async fn spawn_nas() -> (u16, mpsc::UnboundedReceiver<Packet>) {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let port = socket.local_addr().unwrap().port();
    let (seen, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let mut buf = vec![0u8; 4096];
        loop {
            let Ok((len, from)) = socket.recv_from(&mut buf).await else {
                return;
            };
            let request = Packet::decode(&buf[..len]).unwrap();
            assert!(verify_hashed_request_authenticator(&request, SECRET));

            let code = match request.code {
                Code::DisconnectRequest => Code::DisconnectAck,
                Code::CoaRequest => Code::CoaAck,
                _ => Code::CoaNak,
            };
            let mut reply = Packet::new(code, request.identifier, [0u8; 16]);
            reply.authenticator =
                calculate_response_authenticator(&reply, &request.authenticator, SECRET);
            socket.send_to(&reply.encode().unwrap(), from).await.unwrap();

            let _ = seen.send(request);
        }
    });

    (port, rx)
}

fn request(code: Code, identifier: u8, remote: &str) -> Request {
    let mut packet = Packet::new(code, identifier, [0u8; 16]);
    packet.add_attribute(
        Attribute::string(AttributeType::CalledStationId as u8, "ap-7:campus")
            .expect("Failed to create Called-Station-Id"),
    );
    packet.add_attribute(
        Attribute::string(AttributeType::CallingStationId as u8, "02-00-00-00-00-01")
            .expect("Failed to create Calling-Station-Id"),
    );
    Request::new(packet, remote.parse().unwrap(), SECRET.to_vec())
}

fn dynamic_pipeline(tracker: Arc<MemoryNasTracker>, nas_port: u16) -> Pipeline {
    let module = CoaDynamicModule::new(
        CoaDynamicConfig::default().with_port(nas_port).with_timeout_seconds(2),
        tracker,
        Arc::new(UdpExchanger::new()),
    )
    .unwrap();

    Pipeline::builder("coa", Arc::new(MemoryStorage::new()))
        .module(Arc::new(module))
        .build()
}

/// Ordinary traffic from A, then a Disconnect for the same session reaches A
#[tokio::test]
async fn test_disconnect_round_trip() {
    let (nas_port, mut seen) = spawn_nas().await;
    let tracker = Arc::new(MemoryNasTracker::new());
    let pipeline = dynamic_pipeline(tracker.clone(), nas_port);

    // Accounting from the NAS: recorded, then the chain ends without a response
    let accounting = request(Code::AccountingRequest, 1, "127.0.0.1:40000");
    assert!(matches!(
        pipeline.handle(&accounting).await,
        Err(ModuleError::NoResponse)
    ));
    assert_eq!(
        tracker.get(&accounting.packet).unwrap(),
        "127.0.0.1:40000".parse::<SocketAddr>().unwrap()
    );

    // Disconnect from the policy system, arriving from somewhere else
    let response = pipeline
        .handle(&request(Code::DisconnectRequest, 2, "192.0.2.10:5000"))
        .await
        .unwrap();

    assert_eq!(response.code, Code::DisconnectAck);
    let delivered = seen.recv().await.unwrap();
    assert_eq!(delivered.code, Code::DisconnectRequest);
    assert_eq!(delivered.identifier, 2);
}

#[tokio::test]
async fn test_coa_round_trip() {
    let (nas_port, _seen) = spawn_nas().await;
    let tracker = Arc::new(MemoryNasTracker::new());
    let pipeline = dynamic_pipeline(tracker.clone(), nas_port);

    let _ = pipeline
        .handle(&request(Code::AccessRequest, 1, "127.0.0.1:40000"))
        .await;
    let response = pipeline
        .handle(&request(Code::CoaRequest, 3, "192.0.2.10:5000"))
        .await
        .unwrap();

    assert_eq!(response.code, Code::CoaAck);
}

#[tokio::test]
async fn test_disconnect_for_unseen_session() {
    let (nas_port, _seen) = spawn_nas().await;
    let pipeline = dynamic_pipeline(Arc::new(MemoryNasTracker::new()), nas_port);

    let result = pipeline
        .handle(&request(Code::DisconnectRequest, 4, "192.0.2.10:5000"))
        .await;

    assert!(matches!(
        result,
        Err(ModuleError::Tracker(TrackerError::NotFound(_)))
    ));
}

#[tokio::test]
async fn test_silent_nas_times_out() {
    // Bound but never answers
    let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let tracker = Arc::new(MemoryNasTracker::new());
    let pipeline = dynamic_pipeline(tracker.clone(), silent.local_addr().unwrap().port());

    let _ = pipeline
        .handle(&request(Code::AccessRequest, 1, "127.0.0.1:40000"))
        .await;
    let result = pipeline
        .handle(&request(Code::DisconnectRequest, 5, "192.0.2.10:5000"))
        .await;

    assert!(matches!(
        result,
        Err(ModuleError::Exchange(ExchangeError::Timeout { .. }))
    ));
}

#[tokio::test]
async fn test_nas_attribute_round_trip() {
    let (nas_port, mut seen) = spawn_nas().await;
    let module = CoaNasAttributeModule::new(
        CoaNasAttributeConfig::default().with_port(nas_port),
        Arc::new(UdpExchanger::new()),
    )
    .unwrap();
    let pipeline = Pipeline::builder("coa", Arc::new(MemoryStorage::new()))
        .module(Arc::new(module))
        .build();

    let mut disconnect = request(Code::DisconnectRequest, 6, "192.0.2.10:5000");
    disconnect.packet.add_attribute(
        Attribute::ipv4(AttributeType::NasIpAddress as u8, [127, 0, 0, 1])
            .expect("Failed to create NAS-IP-Address"),
    );

    let response = pipeline.handle(&disconnect).await.unwrap();
    assert_eq!(response.code, Code::DisconnectAck);
    assert_eq!(seen.recv().await.unwrap().identifier, 6);
}
