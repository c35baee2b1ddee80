use crate::config::{Config, ConfigError};
use crate::dedup::{
    Admission, RequestCache, RequestFingerprint, DEFAULT_REQUEST_CACHE_MAX_ENTRIES,
    DEFAULT_REQUEST_CACHE_TTL,
};
use crate::filter::{run_filters, Filter, FilterError};
use crate::lb::{Allocator, LoadBalanceError};
use crate::module::{ModuleDeps, ModuleError, ModuleRegistry, Pipeline, Request};
use crate::session::{self, StorageError};
use crate::tracker::MemoryNasTracker;
use crate::transport::UdpExchanger;
use radius_proto::auth::verify_hashed_request_authenticator;
use radius_proto::{Packet, PacketError};
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Packet error: {0}")]
    Packet(#[from] PacketError),
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Module error: {0}")]
    Module(#[from] ModuleError),
    #[error("Filter error: {0}")]
    Filter(#[from] FilterError),
    #[error("Load balance error: {0}")]
    LoadBalance(#[from] LoadBalanceError),
    #[error("Session storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("Invalid request authenticator from {0}")]
    InvalidAuthenticator(SocketAddr),
    #[error("Duplicate request from {0} still in progress")]
    DuplicateRequest(SocketAddr),
}

/// State shared by the tasks of one listener
struct Shared {
    socket: UdpSocket,
    secret: Arc<[u8]>,
    pipeline: Pipeline,
    filters: Arc<[Arc<dyn Filter>]>,
    request_cache: RequestCache,
}

/// One UDP socket feeding one module pipeline
pub struct Listener {
    name: String,
    shared: Arc<Shared>,
}

impl Listener {
    /// Bind with no filters and a default retransmission cache
    pub async fn bind(
        name: impl Into<String>,
        addr: SocketAddr,
        secret: &[u8],
        pipeline: Pipeline,
    ) -> Result<Self, ServerError> {
        Self::bind_with(
            name,
            addr,
            secret,
            pipeline,
            Arc::from(Vec::new()),
            RequestCache::new(DEFAULT_REQUEST_CACHE_TTL, DEFAULT_REQUEST_CACHE_MAX_ENTRIES),
        )
        .await
    }

    pub async fn bind_with(
        name: impl Into<String>,
        addr: SocketAddr,
        secret: &[u8],
        pipeline: Pipeline,
        filters: Arc<[Arc<dyn Filter>]>,
        request_cache: RequestCache,
    ) -> Result<Self, ServerError> {
        let name = name.into();
        let socket = UdpSocket::bind(addr).await?;
        info!(listener = %name, address = %socket.local_addr()?, "Listening");

        Ok(Self {
            name,
            shared: Arc::new(Shared {
                socket,
                secret: Arc::from(secret),
                pipeline,
                filters,
                request_cache,
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.shared.socket.local_addr()?)
    }

    /// Retransmission cache of this listener
    pub fn request_cache(&self) -> &RequestCache {
        &self.shared.request_cache
    }

    /// Receive datagrams until the socket fails, one task per datagram
    pub async fn run(&self) -> Result<(), ServerError> {
        let mut buf = vec![0u8; Packet::MAX_PACKET_SIZE];

        loop {
            let (len, addr) = self.shared.socket.recv_from(&mut buf).await?;
            let data = buf[..len].to_vec();
            let shared = Arc::clone(&self.shared);

            tokio::spawn(async move {
                if let Err(e) = Self::handle_request(data, addr, shared).await {
                    debug!("Dropped request from {}: {}", addr, e);
                }
            });
        }
    }

    /// Handle a single datagram
    ///
    /// Retransmissions of a request still in progress are dropped; those of
    /// an answered request get the same reply again. Any filter or pipeline
    /// error drops the packet; the pipeline has already logged it with its
    /// kind.
    async fn handle_request(data: Vec<u8>, addr: SocketAddr, shared: Arc<Shared>) -> Result<(), ServerError> {
        let packet = Packet::decode(&data).inspect_err(|e| {
            warn!(remote = %addr, error = %e, "Malformed packet");
        })?;

        // RFC 2866 Section 3, RFC 5176 Section 2.3
        if packet.code.has_hashed_request_authenticator()
            && !verify_hashed_request_authenticator(&packet, &shared.secret)
        {
            warn!(
                remote = %addr,
                code = ?packet.code,
                identifier = packet.identifier,
                "Invalid request authenticator"
            );
            return Err(ServerError::InvalidAuthenticator(addr));
        }

        let fingerprint = RequestFingerprint::new(addr.ip(), packet.identifier, &packet.authenticator);
        match shared.request_cache.admit(fingerprint) {
            Admission::New => {}
            Admission::InFlight => {
                debug!(
                    listener = %shared.pipeline.listener(),
                    remote = %addr,
                    identifier = packet.identifier,
                    dropped = shared.request_cache.dropped_count(),
                    "Dropped retransmission of request in progress"
                );
                return Err(ServerError::DuplicateRequest(addr));
            }
            Admission::Replay(reply) => {
                shared.socket.send_to(&reply, addr).await?;
                debug!(
                    listener = %shared.pipeline.listener(),
                    remote = %addr,
                    identifier = packet.identifier,
                    "Replayed cached reply"
                );
                return Ok(());
            }
        }

        let request = Request::new(packet, addr, shared.secret.to_vec());
        let encoded = match Self::process(&request, &shared).await {
            Ok(encoded) => encoded,
            Err(e) => {
                shared.request_cache.abandon(&fingerprint);
                return Err(e);
            }
        };

        shared.request_cache.complete(fingerprint, &encoded);
        shared.socket.send_to(&encoded, addr).await?;
        Ok(())
    }

    /// Filters, then the pipeline, then the encoded reply
    async fn process(request: &Request, shared: &Shared) -> Result<Vec<u8>, ServerError> {
        let listener = shared.pipeline.listener();
        run_filters(&shared.filters, listener, request).await?;

        let response = shared.pipeline.handle(request).await?;
        let reply = response.into_reply(&request.packet, &shared.secret);
        let encoded = reply.encode()?;

        debug!(
            listener = %listener,
            remote = %request.remote_addr,
            code = ?reply.code,
            identifier = reply.identifier,
            "Sending reply"
        );
        Ok(encoded)
    }
}

/// Collaborators shared by the modules of every listener
pub async fn shared_deps(config: &Config) -> Result<ModuleDeps, ServerError> {
    Ok(ModuleDeps {
        storage: session::connect(&config.session_storage).await?,
        tracker: Arc::new(MemoryNasTracker::new()),
        allocator: Arc::new(Allocator::new(&config.load_balance)?),
        exchanger: Arc::new(UdpExchanger::new()),
    })
}

/// All listeners of one configuration
pub struct EdgeServer {
    listeners: Vec<Listener>,
}

impl EdgeServer {
    /// Build filters, connect storage, build every pipeline and bind every
    /// listener
    ///
    /// Filter and module configuration errors surface here, before any socket
    /// serves traffic.
    pub async fn from_config(config: &Config, registry: &ModuleRegistry) -> Result<Self, ServerError> {
        config.validate()?;
        let filters: Arc<[Arc<dyn Filter>]> = registry.build_filters(&config.filters)?.into();
        let deps = shared_deps(config).await?;

        let mut pipelines = Vec::with_capacity(config.listeners.len());
        for listener in &config.listeners {
            pipelines.push(registry.build_pipeline(&listener.name, &listener.modules, &deps)?);
        }

        let mut listeners = Vec::with_capacity(pipelines.len());
        for (listener, pipeline) in config.listeners.iter().zip(pipelines) {
            listeners.push(
                Listener::bind_with(
                    listener.name.clone(),
                    listener.socket_addr()?,
                    config.listener_secret(listener),
                    pipeline,
                    Arc::clone(&filters),
                    RequestCache::new(config.request_cache_ttl(), config.request_cache_max_entries()),
                )
                .await?,
            );
        }

        Ok(Self { listeners })
    }

    pub fn listeners(&self) -> &[Listener] {
        &self.listeners
    }

    /// Serve until a listener fails
    pub async fn run(self) -> Result<(), ServerError> {
        let mut tasks = JoinSet::new();
        for listener in self.listeners {
            tasks.spawn(async move { listener.run().await });
        }

        while let Some(joined) = tasks.join_next().await {
            joined.map_err(|e| ServerError::Io(std::io::Error::other(e)))??;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ListenerConfig;
    use crate::module::ModuleDescriptor;
    use radius_proto::auth::{calculate_hashed_request_authenticator, verify_response_authenticator};
    use radius_proto::{Attribute, AttributeType, Code};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn listener_config(name: &str, modules: Vec<ModuleDescriptor>) -> ListenerConfig {
        ListenerConfig {
            name: name.to_string(),
            address: "127.0.0.1".to_string(),
            port: 0,
            secret: None,
            modules,
        }
    }

    async fn send(socket: &UdpSocket, to: SocketAddr, packet: &Packet) -> Option<Packet> {
        socket.send_to(&packet.encode().unwrap(), to).await.unwrap();
        let mut buf = vec![0u8; 4096];
        match tokio::time::timeout(Duration::from_millis(300), socket.recv_from(&mut buf)).await {
            Ok(Ok((len, _))) => Some(Packet::decode(&buf[..len]).unwrap()),
            _ => None,
        }
    }

    /// Serve the first listener of `config` on an ephemeral port
    async fn start_with(config: &Config, registry: &ModuleRegistry) -> Arc<Listener> {
        let deps = shared_deps(config).await.unwrap();
        let filters = registry.build_filters(&config.filters).unwrap();
        let listener_config = &config.listeners[0];
        let pipeline = registry
            .build_pipeline(&listener_config.name, &listener_config.modules, &deps)
            .unwrap();
        let listener = Arc::new(
            Listener::bind_with(
                listener_config.name.clone(),
                "127.0.0.1:0".parse().unwrap(),
                config.listener_secret(listener_config),
                pipeline,
                filters.into(),
                RequestCache::new(config.request_cache_ttl(), config.request_cache_max_entries()),
            )
            .await
            .unwrap(),
        );
        let running = Arc::clone(&listener);
        tokio::spawn(async move { running.run().await });
        listener
    }

    async fn start(config: &Config) -> SocketAddr {
        start_with(config, &ModuleRegistry::new())
            .await
            .local_addr()
            .unwrap()
    }

    #[tokio::test]
    async fn test_coa_without_nas_is_dropped() {
        let config = Config {
            listeners: vec![listener_config(
                "coa",
                vec![ModuleDescriptor::new("coa_nas_attribute")],
            )],
            ..Config::default()
        };
        let addr = start(&config).await;
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        // No NAS-IP-Address and nothing after the module: no response
        let mut coa = Packet::new(Code::CoaRequest, 8, [0u8; 16]);
        coa.authenticator = calculate_hashed_request_authenticator(&coa, config.secret.as_bytes());
        assert!(send(&client, addr, &coa).await.is_none());
    }

    #[tokio::test]
    async fn test_bad_authenticator_is_dropped() {
        let config = Config {
            listeners: vec![listener_config(
                "coa",
                vec![ModuleDescriptor::new("coa_nas_attribute")],
            )],
            ..Config::default()
        };
        let addr = start(&config).await;
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        let mut disconnect = Packet::new(Code::DisconnectRequest, 9, [5u8; 16]);
        disconnect.add_attribute(
            Attribute::ipv4(AttributeType::NasIpAddress as u8, [127, 0, 0, 1]).unwrap(),
        );
        assert!(send(&client, addr, &disconnect).await.is_none());
    }

    #[tokio::test]
    async fn test_reply_forwarded_from_upstream() {
        // Upstream answering Access-Accept with the same secret
        let upstream = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let upstream_addr = upstream.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = vec![0u8; 4096];
            let (len, from) = upstream.recv_from(&mut buf).await.unwrap();
            let request = Packet::decode(&buf[..len]).unwrap();
            let mut reply = Packet::new(Code::AccessAccept, request.identifier, [0u8; 16]);
            reply.authenticator = radius_proto::auth::calculate_response_authenticator(
                &reply,
                &request.authenticator,
                b"testing123",
            );
            upstream.send_to(&reply.encode().unwrap(), from).await.unwrap();
        });

        let config = Config {
            load_balance: crate::lb::LoadBalanceConfig::new()
                .with_service_tier("gw", vec![upstream_addr.to_string()])
                .with_live_route("wifi", "gw")
                .with_default_tier(crate::lb::LIVE_TIER),
            listeners: vec![listener_config(
                "wifi",
                vec![
                    ModuleDescriptor::new("load_balance"),
                    ModuleDescriptor::new("lb_serve"),
                ],
            )],
            ..Config::default()
        };
        let addr = start(&config).await;
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        let mut request = Packet::new(Code::AccessRequest, 21, [9u8; 16]);
        request.add_attribute(Attribute::string(AttributeType::CalledStationId as u8, "ap").unwrap());
        request.add_attribute(Attribute::string(AttributeType::CallingStationId as u8, "sub").unwrap());

        let reply = send(&client, addr, &request).await.expect("reply");
        assert_eq!(reply.code, Code::AccessAccept);
        assert_eq!(reply.identifier, 21);
        assert!(verify_response_authenticator(&reply, &request.authenticator, b"testing123"));
    }

    #[tokio::test]
    async fn test_unknown_module_fails_startup() {
        let mut listener = listener_config("wifi", vec![ModuleDescriptor::new("eap")]);
        listener.port = 18120;
        let config = Config {
            listeners: vec![listener],
            ..Config::default()
        };
        let result = EdgeServer::from_config(&config, &ModuleRegistry::new()).await;
        assert!(matches!(result, Err(ServerError::Module(ModuleError::UnknownModule(_)))));
    }

    /// Upstream answering Access-Accept after `delay`, counting what it receives
    async fn spawn_slow_upstream(delay: Duration) -> (SocketAddr, Arc<AtomicUsize>) {
        let upstream = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let address = upstream.local_addr().unwrap();
        let received = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&received);

        tokio::spawn(async move {
            let mut buf = vec![0u8; 4096];
            loop {
                let Ok((len, from)) = upstream.recv_from(&mut buf).await else {
                    return;
                };
                counter.fetch_add(1, Ordering::SeqCst);
                let request = Packet::decode(&buf[..len]).unwrap();
                tokio::time::sleep(delay).await;

                let mut reply = Packet::new(Code::AccessAccept, request.identifier, [0u8; 16]);
                reply.authenticator = radius_proto::auth::calculate_response_authenticator(
                    &reply,
                    &request.authenticator,
                    b"testing123",
                );
                upstream.send_to(&reply.encode().unwrap(), from).await.unwrap();
            }
        });

        (address, received)
    }

    fn wifi_config(upstream: SocketAddr) -> Config {
        Config {
            load_balance: crate::lb::LoadBalanceConfig::new()
                .with_service_tier("gw", vec![upstream.to_string()])
                .with_live_route("wifi", "gw")
                .with_default_tier(crate::lb::LIVE_TIER),
            listeners: vec![listener_config(
                "wifi",
                vec![
                    ModuleDescriptor::new("load_balance"),
                    ModuleDescriptor::new("lb_serve"),
                ],
            )],
            ..Config::default()
        }
    }

    fn access_request(identifier: u8) -> Packet {
        let mut request = Packet::new(Code::AccessRequest, identifier, [7u8; 16]);
        request.add_attribute(Attribute::string(AttributeType::CalledStationId as u8, "ap").unwrap());
        request.add_attribute(Attribute::string(AttributeType::CallingStationId as u8, "sub").unwrap());
        request
    }

    async fn recv_reply(socket: &UdpSocket, wait: Duration) -> Option<Packet> {
        let mut buf = vec![0u8; 4096];
        match tokio::time::timeout(wait, socket.recv_from(&mut buf)).await {
            Ok(Ok((len, _))) => Some(Packet::decode(&buf[..len]).unwrap()),
            _ => None,
        }
    }

    #[tokio::test]
    async fn test_retransmission_reaches_upstream_once() {
        let (upstream, received) = spawn_slow_upstream(Duration::from_millis(200)).await;
        let listener = start_with(&wifi_config(upstream), &ModuleRegistry::new()).await;
        let addr = listener.local_addr().unwrap();
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let datagram = access_request(31).encode().unwrap();

        // Second copy arrives while the first waits on the upstream
        client.send_to(&datagram, addr).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        client.send_to(&datagram, addr).await.unwrap();

        let reply = recv_reply(&client, Duration::from_secs(2)).await.expect("reply");
        assert_eq!(reply.code, Code::AccessAccept);
        assert_eq!(reply.identifier, 31);
        assert!(recv_reply(&client, Duration::from_millis(300)).await.is_none());
        assert_eq!(listener.request_cache().dropped_count(), 1);

        // After the answer, a late copy gets the same reply from the cache
        client.send_to(&datagram, addr).await.unwrap();
        let replayed = recv_reply(&client, Duration::from_millis(300)).await.expect("replayed reply");
        assert_eq!(replayed, reply);
        assert_eq!(listener.request_cache().replayed_count(), 1);

        assert_eq!(received.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_new_identifier_is_not_a_retransmission() {
        let (upstream, received) = spawn_slow_upstream(Duration::ZERO).await;
        let addr = start(&wifi_config(upstream)).await;
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        assert!(send(&client, addr, &access_request(40)).await.is_some());
        assert!(send(&client, addr, &access_request(41)).await.is_some());
        assert_eq!(received.load(Ordering::SeqCst), 2);
    }

    /// Rejects everything and counts calls
    #[derive(Default)]
    struct Deny {
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl Filter for Deny {
        fn name(&self) -> &str {
            "deny"
        }

        async fn process(&self, _listener: &str, _request: &Request) -> Result<(), FilterError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(FilterError::rejected("deny", "failed to handle"))
        }
    }

    #[tokio::test]
    async fn test_filter_rejection_drops_packet() {
        let (upstream, received) = spawn_slow_upstream(Duration::ZERO).await;
        let deny = Arc::new(Deny::default());
        let mut registry = ModuleRegistry::new();
        let shared_deny = Arc::clone(&deny);
        registry.register_filter("deny", move |_| Ok(shared_deny.clone() as Arc<dyn Filter>));

        let config = Config {
            filters: vec![ModuleDescriptor::new("deny")],
            ..wifi_config(upstream)
        };
        let addr = start_with(&config, &registry).await.local_addr().unwrap();
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        assert!(send(&client, addr, &access_request(50)).await.is_none());
        assert_eq!(deny.calls.load(Ordering::SeqCst), 1);
        assert_eq!(received.load(Ordering::SeqCst), 0);

        // Rejected requests are not cached: a retransmission is filtered again
        assert!(send(&client, addr, &access_request(50)).await.is_none());
        assert_eq!(deny.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_filter_init_failure_stops_startup() {
        let mut listener = listener_config("wifi", vec![ModuleDescriptor::new("load_balance")]);
        listener.port = 18121;

        let mut rate_limit = crate::module::ModuleConfig::new();
        rate_limit.insert("burst".to_string(), 0.into());
        let config = Config {
            filters: vec![ModuleDescriptor::new("rate_limit").with_config(rate_limit)],
            listeners: vec![listener.clone()],
            ..Config::default()
        };
        let result = EdgeServer::from_config(&config, &ModuleRegistry::new()).await;
        assert!(matches!(
            result,
            Err(ServerError::Filter(FilterError::Config { filter, .. })) if filter == "rate_limit"
        ));

        let config = Config {
            filters: vec![ModuleDescriptor::new("geo_block")],
            listeners: vec![listener],
            ..Config::default()
        };
        let result = EdgeServer::from_config(&config, &ModuleRegistry::new()).await;
        assert!(matches!(result, Err(ServerError::Filter(FilterError::UnknownFilter(_)))));
    }
}
