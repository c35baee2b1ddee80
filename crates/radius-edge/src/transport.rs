//! RADIUS request/response exchange over UDP

use async_trait::async_trait;
use radius_proto::auth::{calculate_hashed_request_authenticator, verify_response_authenticator};
use radius_proto::{Packet, PacketError};
use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::time::Instant;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum ExchangeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Packet error: {0}")]
    Packet(#[from] PacketError),

    #[error("No reply from {address} within {timeout:?}")]
    Timeout {
        address: SocketAddr,
        timeout: Duration,
    },

    #[error("Invalid response authenticator from {0}")]
    InvalidResponseAuthenticator(SocketAddr),

    #[error("Cannot resolve address '{0}'")]
    Resolve(String),
}

/// Sends one request and waits for its reply
///
/// Implementations perform no retries. Callers bound the exchange with
/// [`exchange_with_timeout`].
#[async_trait]
pub trait Exchanger: Send + Sync {
    async fn exchange(
        &self,
        packet: &Packet,
        secret: &[u8],
        address: SocketAddr,
    ) -> Result<Packet, ExchangeError>;
}

/// [`Exchanger::exchange`] bounded by a deadline
///
/// Expiry surfaces as [`ExchangeError::Timeout`].
pub async fn exchange_with_timeout(
    exchanger: &dyn Exchanger,
    packet: &Packet,
    secret: &[u8],
    address: SocketAddr,
    timeout: Duration,
) -> Result<Packet, ExchangeError> {
    tokio::time::timeout(timeout, exchanger.exchange(packet, secret, address))
        .await
        .map_err(|_| ExchangeError::Timeout { address, timeout })?
}

/// Resolve `host` and exchange with it, both bounded by one deadline
///
/// A lookup still pending at the deadline fails with
/// [`ExchangeError::Resolve`]; an exchange still pending fails with
/// [`ExchangeError::Timeout`].
pub async fn exchange_host_with_timeout(
    exchanger: &dyn Exchanger,
    packet: &Packet,
    secret: &[u8],
    host: &str,
    timeout: Duration,
) -> Result<Packet, ExchangeError> {
    resolve_and_exchange(resolve(host), exchanger, packet, secret, host, timeout).await
}

async fn resolve_and_exchange<R>(
    resolving: R,
    exchanger: &dyn Exchanger,
    packet: &Packet,
    secret: &[u8],
    host: &str,
    timeout: Duration,
) -> Result<Packet, ExchangeError>
where
    R: Future<Output = Result<SocketAddr, ExchangeError>>,
{
    let deadline = Instant::now() + timeout;

    let address = tokio::time::timeout_at(deadline, resolving)
        .await
        .map_err(|_| ExchangeError::Resolve(format!("{}: no answer within {:?}", host, timeout)))??;

    tokio::time::timeout_at(deadline, exchanger.exchange(packet, secret, address))
        .await
        .map_err(|_| ExchangeError::Timeout { address, timeout })?
}

/// Resolve a `host:port` string, accepting DNS names
pub async fn resolve(host: &str) -> Result<SocketAddr, ExchangeError> {
    if let Ok(address) = host.parse::<SocketAddr>() {
        return Ok(address);
    }

    tokio::net::lookup_host(host)
        .await
        .map_err(|e| ExchangeError::Resolve(format!("{}: {}", host, e)))?
        .next()
        .ok_or_else(|| ExchangeError::Resolve(host.to_string()))
}

/// UDP exchanger using one ephemeral socket per exchange
///
/// Accounting, CoA and Disconnect requests are re-signed with the hashed
/// request authenticator for `secret`. Access-Request authenticators are sent
/// unchanged, so attributes hidden with the original authenticator
/// (User-Password) stay readable by a peer that shares the secret.
#[derive(Debug, Clone, Default)]
pub struct UdpExchanger;

impl UdpExchanger {
    pub fn new() -> Self {
        UdpExchanger
    }
}

fn unspecified_for(address: &SocketAddr) -> SocketAddr {
    let ip = match address {
        SocketAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        SocketAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
    };
    SocketAddr::new(ip, 0)
}

#[async_trait]
impl Exchanger for UdpExchanger {
    async fn exchange(
        &self,
        packet: &Packet,
        secret: &[u8],
        address: SocketAddr,
    ) -> Result<Packet, ExchangeError> {
        let mut request = packet.clone();
        if request.code.has_hashed_request_authenticator() {
            request.authenticator = calculate_hashed_request_authenticator(&request, secret);
        }

        let socket = UdpSocket::bind(unspecified_for(&address)).await?;
        socket.connect(address).await?;
        socket.send(&request.encode()?).await?;

        debug!(
            peer = %address,
            code = ?request.code,
            identifier = request.identifier,
            "Sent request"
        );

        let mut buf = vec![0u8; Packet::MAX_PACKET_SIZE];
        loop {
            let len = socket.recv(&mut buf).await?;
            let response = match Packet::decode(&buf[..len]) {
                Ok(response) => response,
                Err(e) => {
                    warn!(peer = %address, error = %e, "Discarding undecodable reply");
                    continue;
                }
            };

            if response.identifier != request.identifier {
                debug!(
                    peer = %address,
                    expected = request.identifier,
                    actual = response.identifier,
                    "Discarding reply for another identifier"
                );
                continue;
            }

            if !verify_response_authenticator(&response, &request.authenticator, secret) {
                return Err(ExchangeError::InvalidResponseAuthenticator(address));
            }

            debug!(
                peer = %address,
                code = ?response.code,
                identifier = response.identifier,
                "Received reply"
            );
            return Ok(response);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use radius_proto::auth::{calculate_response_authenticator, verify_hashed_request_authenticator};
    use radius_proto::{Attribute, AttributeType, Code};

    /// Answer one request with `reply_code`, signed with `secret`
    async fn spawn_peer(reply_code: Code, secret: &'static [u8]) -> SocketAddr {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let address = socket.local_addr().unwrap();

        tokio::spawn(async move {
            let mut buf = vec![0u8; 4096];
            let (len, from) = socket.recv_from(&mut buf).await.unwrap();
            let request = Packet::decode(&buf[..len]).unwrap();
            if request.code.has_hashed_request_authenticator() {
                assert!(verify_hashed_request_authenticator(&request, secret));
            }

            let mut reply = Packet::new(reply_code, request.identifier, [0u8; 16]);
            reply.authenticator =
                calculate_response_authenticator(&reply, &request.authenticator, secret);
            socket.send_to(&reply.encode().unwrap(), from).await.unwrap();
        });

        address
    }

    fn disconnect_request() -> Packet {
        let mut packet = Packet::new(Code::DisconnectRequest, 17, [0u8; 16]);
        packet.add_attribute(
            Attribute::string(AttributeType::CallingStationId as u8, "aa-bb").unwrap(),
        );
        packet
    }

    #[tokio::test]
    async fn test_exchange_disconnect() {
        let peer = spawn_peer(Code::DisconnectAck, b"secret").await;

        let reply = UdpExchanger::new()
            .exchange(&disconnect_request(), b"secret", peer)
            .await
            .unwrap();

        assert_eq!(reply.code, Code::DisconnectAck);
        assert_eq!(reply.identifier, 17);
    }

    #[tokio::test]
    async fn test_exchange_rejects_wrong_secret() {
        let peer = spawn_peer(Code::CoaAck, b"other").await;
        let mut request = disconnect_request();
        request.code = Code::AccessRequest;

        let result = UdpExchanger::new().exchange(&request, b"secret", peer).await;
        assert!(matches!(
            result,
            Err(ExchangeError::InvalidResponseAuthenticator(addr)) if addr == peer
        ));
    }

    #[tokio::test]
    async fn test_exchange_timeout() {
        // Bound but never answers
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let address = silent.local_addr().unwrap();

        let result = exchange_with_timeout(
            &UdpExchanger::new(),
            &disconnect_request(),
            b"secret",
            address,
            Duration::from_millis(100),
        )
        .await;

        match result {
            Err(ExchangeError::Timeout { address: a, timeout }) => {
                assert_eq!(a, address);
                assert_eq!(timeout, Duration::from_millis(100));
            }
            other => panic!("Expected Timeout, got {:?}", other),
        }
    }

    /// Replies after `delay`
    struct Slow {
        delay: Duration,
    }

    #[async_trait]
    impl Exchanger for Slow {
        async fn exchange(
            &self,
            packet: &Packet,
            _secret: &[u8],
            _address: SocketAddr,
        ) -> Result<Packet, ExchangeError> {
            tokio::time::sleep(self.delay).await;
            Ok(Packet::new(Code::AccessAccept, packet.identifier, [0u8; 16]))
        }
    }

    fn resolving_after(delay: Duration) -> impl Future<Output = Result<SocketAddr, ExchangeError>> {
        async move {
            tokio::time::sleep(delay).await;
            Ok("10.0.0.1:1812".parse().unwrap())
        }
    }

    #[tokio::test]
    async fn test_slow_lookup_bounded_by_deadline() {
        let started = std::time::Instant::now();
        let result = resolve_and_exchange(
            resolving_after(Duration::from_secs(5)),
            &Slow { delay: Duration::ZERO },
            &disconnect_request(),
            b"secret",
            "gw.example:1812",
            Duration::from_millis(100),
        )
        .await;

        assert!(matches!(result, Err(ExchangeError::Resolve(_))));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_lookup_and_exchange_share_deadline() {
        // Each half fits alone, together they overrun
        let result = resolve_and_exchange(
            resolving_after(Duration::from_millis(150)),
            &Slow { delay: Duration::from_millis(150) },
            &disconnect_request(),
            b"secret",
            "gw.example:1812",
            Duration::from_millis(250),
        )
        .await;
        assert!(matches!(result, Err(ExchangeError::Timeout { .. })));

        let reply = resolve_and_exchange(
            resolving_after(Duration::from_millis(10)),
            &Slow { delay: Duration::from_millis(10) },
            &disconnect_request(),
            b"secret",
            "gw.example:1812",
            Duration::from_secs(2),
        )
        .await
        .unwrap();
        assert_eq!(reply.code, Code::AccessAccept);
    }

    #[tokio::test]
    async fn test_resolve() {
        assert_eq!(
            resolve("10.0.0.1:1812").await.unwrap(),
            "10.0.0.1:1812".parse::<SocketAddr>().unwrap()
        );
        assert_eq!(resolve("localhost:1812").await.unwrap().port(), 1812);
        assert!(matches!(
            resolve("missing-port").await,
            Err(ExchangeError::Resolve(_))
        ));
    }
}
