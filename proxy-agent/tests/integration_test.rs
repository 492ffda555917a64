// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use bytes::Bytes;
use http_body_util::{BodyExt, Empty};
use proxy_agent::{
    Accounting, Agent, AgentConfig, Dialer, Error, SecureAgent, TargetDescriptor, TrafficCounter,
};
use rustls::pki_types::{PrivateKeyDer, PrivatePkcs8KeyDer};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;

/// Echo server that serves connections until the test ends.
async fn echo_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let (mut stream, _) = listener.accept().await.unwrap();
            tokio::spawn(async move {
                let (mut reader, mut writer) = stream.split();
                let _ = tokio::io::copy(&mut reader, &mut writer).await;
            });
        }
    });
    addr
}

async fn read_request_header(stream: &mut TcpStream) -> String {
    let mut header = Vec::new();
    let mut byte = [0u8; 1];
    while !header.ends_with(b"\r\n\r\n") {
        if stream.read(&mut byte).await.unwrap() == 0 {
            break;
        }
        header.push(byte[0]);
    }
    String::from_utf8(header).unwrap()
}

/// HTTP proxy that answers CONNECT with `response` and, on `200`,
/// relays the tunnel to `upstream`. Returns the CONNECT request it saw.
async fn http_proxy(
    response: &'static [u8],
    upstream: Option<SocketAddr>,
) -> (u16, JoinHandle<(String, TcpStream)>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let handle = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let request = read_request_header(&mut stream).await;
        stream.write_all(response).await.unwrap();
        if let Some(upstream) = upstream {
            let mut upstream = TcpStream::connect(upstream).await.unwrap();
            let _ = tokio::io::copy_bidirectional(&mut stream, &mut upstream).await;
        }
        (request, stream)
    });
    (port, handle)
}

/// Minimal SOCKS5 server (no authentication, CONNECT only) that relays
/// to `upstream` whatever destination was requested. Returns the
/// requested destination as `(atyp, host bytes, port)`.
async fn socks5_proxy(upstream: SocketAddr) -> (u16, JoinHandle<(u8, Vec<u8>, u16)>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let handle = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();

        let mut greeting = [0u8; 2];
        stream.read_exact(&mut greeting).await.unwrap();
        assert_eq!(greeting[0], 5);
        let mut methods = vec![0u8; greeting[1] as usize];
        stream.read_exact(&mut methods).await.unwrap();
        assert!(methods.contains(&0));
        stream.write_all(&[5, 0]).await.unwrap();

        let mut request = [0u8; 4];
        stream.read_exact(&mut request).await.unwrap();
        assert_eq!(request[..3], [5, 1, 0]);
        let host = match request[3] {
            1 => {
                let mut addr = vec![0u8; 4];
                stream.read_exact(&mut addr).await.unwrap();
                addr
            }
            3 => {
                let mut len = [0u8; 1];
                stream.read_exact(&mut len).await.unwrap();
                let mut name = vec![0u8; len[0] as usize];
                stream.read_exact(&mut name).await.unwrap();
                name
            }
            4 => {
                let mut addr = vec![0u8; 16];
                stream.read_exact(&mut addr).await.unwrap();
                addr
            }
            other => panic!("unexpected address type {}", other),
        };
        let dest_port = stream.read_u16().await.unwrap();
        stream.write_all(&[5, 0, 0, 1, 127, 0, 0, 1, 0, 0]).await.unwrap();

        let mut upstream = TcpStream::connect(upstream).await.unwrap();
        let _ = tokio::io::copy_bidirectional(&mut stream, &mut upstream).await;
        (request[3], host, dest_port)
    });
    (port, handle)
}

fn proxied_config(proxy: &str) -> AgentConfig {
    AgentConfig::new().with_proxy_url(Some(proxy)).unwrap()
}

#[tokio::test]
async fn direct_traffic_is_counted_exactly() {
    let echo = echo_server().await;
    let counter = Arc::new(TrafficCounter::new());
    let agent = Agent::new(&AgentConfig::default(), counter.clone());

    let mut stream = agent.dial(TargetDescriptor::new("127.0.0.1", echo.port())).await.unwrap();
    let payload = vec![0x5au8; 3000];
    stream.write_all(&payload).await.unwrap();
    assert_eq!(counter.tx(), 3000);

    let mut echoed = vec![0u8; 3000];
    stream.read_exact(&mut echoed).await.unwrap();
    assert_eq!(echoed, payload);
    assert_eq!(counter.rx(), 3000);
}

#[tokio::test]
async fn http_tunnel_established() {
    let echo = echo_server().await;
    let (proxy_port, proxy) =
        http_proxy(b"HTTP/1.1 200 Connection established\r\n\r\n", Some(echo)).await;
    let counter = Arc::new(TrafficCounter::new());
    let config = proxied_config(&format!("http://127.0.0.1:{}", proxy_port));
    let agent = Agent::new(&config, counter.clone());

    let mut stream = agent.dial(TargetDescriptor::new("echo.internal", 7)).await.unwrap();
    stream.write_all(b"through the tunnel").await.unwrap();
    let mut echoed = [0u8; 18];
    stream.read_exact(&mut echoed).await.unwrap();
    assert_eq!(&echoed, b"through the tunnel");

    // Only bytes on the established tunnel are counted.
    assert_eq!(counter.tx(), 18);
    assert_eq!(counter.rx(), 18);

    drop(stream);
    let (request, _) = proxy.await.unwrap();
    assert_eq!(request, "CONNECT echo.internal:7 HTTP/1.1\r\nHost: echo.internal:7\r\n\r\n");
}

#[tokio::test]
async fn http_tunnel_replays_early_bytes() {
    let (proxy_port, proxy) =
        http_proxy(b"HTTP/1.1 200 Connection established\r\n\r\nSSH-2.0-banner\r\n", None).await;
    let counter = Arc::new(TrafficCounter::new());
    let agent = Agent::new(&proxied_config(&format!("127.0.0.1:{}", proxy_port)), counter.clone());

    let mut stream = agent.dial(TargetDescriptor::new("git.internal", 22)).await.unwrap();
    let (_, proxy_side) = proxy.await.unwrap();
    drop(proxy_side);

    let mut banner = String::new();
    stream.read_to_string(&mut banner).await.unwrap();
    assert_eq!(banner, "SSH-2.0-banner\r\n");
    assert_eq!(counter.rx(), 16);
}

#[tokio::test]
async fn http_tunnel_rejected() {
    let (proxy_port, proxy) = http_proxy(b"HTTP/1.1 403 Forbidden\r\n\r\n", None).await;
    let counter = Arc::new(TrafficCounter::new());
    let config = proxied_config(&format!("http://127.0.0.1:{}", proxy_port));
    let agent = Agent::new(&config, counter.clone());

    let result = agent.dial(TargetDescriptor::new("blocked.example", 443)).await;
    match result {
        Err(Error::TunnelRejected { target, response }) => {
            assert_eq!(target, "blocked.example:443");
            assert_eq!(response, "HTTP/1.1 403 Forbidden\r\n\r\n");
        }
        other => panic!("unexpected result {:?}", other.map(|_| ())),
    }

    // The client side is gone: the proxy sees end of stream.
    let (_, mut proxy_side) = proxy.await.unwrap();
    let mut buf = [0u8; 16];
    assert!(matches!(proxy_side.read(&mut buf).await, Ok(0) | Err(_)));
    assert_eq!(counter.snapshot().tx, 0);
    assert_eq!(counter.snapshot().rx, 0);
}

#[tokio::test]
async fn http_tunnel_closed_before_headers() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let proxy_port = listener.local_addr().unwrap().port();
    let proxy = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        read_request_header(&mut stream).await;
        stream.write_all(b"HTTP/1.1 2").await.unwrap();
    });

    let counter = Arc::new(TrafficCounter::new());
    let agent = Agent::new(&proxied_config(&format!("http://127.0.0.1:{}", proxy_port)), counter);
    let result = agent.dial(TargetDescriptor::new("example.com", 80)).await;
    assert!(matches!(result, Err(Error::TunnelClosed)));
    proxy.await.unwrap();
}

#[tokio::test]
async fn socks5_tunnel() {
    let echo = echo_server().await;
    let (proxy_port, proxy) = socks5_proxy(echo).await;
    let counter = Arc::new(TrafficCounter::new());
    let agent =
        Agent::new(&proxied_config(&format!("socks5://127.0.0.1:{}", proxy_port)), counter.clone());

    let mut stream = agent.dial(TargetDescriptor::new("echo.internal", 7007)).await.unwrap();
    stream.write_all(b"socks").await.unwrap();
    let mut echoed = [0u8; 5];
    stream.read_exact(&mut echoed).await.unwrap();
    assert_eq!(&echoed, b"socks");
    assert_eq!(counter.tx(), 5);
    assert_eq!(counter.rx(), 5);

    drop(stream);
    let (atyp, host, port) = proxy.await.unwrap();
    assert_eq!(atyp, 3);
    assert_eq!(host, b"echo.internal");
    assert_eq!(port, 7007);
}

#[tokio::test]
async fn concurrent_streams_share_counter() {
    let echo = echo_server().await;
    let (proxy_port, _proxy) =
        http_proxy(b"HTTP/1.1 200 Connection established\r\n\r\n", Some(echo)).await;
    let counter = Arc::new(TrafficCounter::new());
    let direct = Agent::new(&AgentConfig::default(), counter.clone());
    let proxied =
        Agent::new(&proxied_config(&format!("http://127.0.0.1:{}", proxy_port)), counter.clone());

    async fn exchange<D: Dialer>(dialer: D, target: TargetDescriptor, len: usize) {
        let mut stream = dialer.dial(target).await.unwrap();
        let payload = vec![1u8; len];
        stream.write_all(&payload).await.unwrap();
        let mut echoed = vec![0u8; len];
        stream.read_exact(&mut echoed).await.unwrap();
    }

    let target = TargetDescriptor::new("127.0.0.1", echo.port());
    let (first, second) = tokio::join!(
        tokio::spawn(exchange(direct, target.clone(), 1000)),
        tokio::spawn(exchange(proxied, target, 2500)),
    );
    first.unwrap();
    second.unwrap();

    assert_eq!(counter.tx(), 3500);
    assert_eq!(counter.rx(), 3500);
}

async fn tls_echo_server() -> SocketAddr {
    let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(certified.key_pair.serialize_der()));
    let config = rustls::ServerConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .unwrap()
    .with_no_client_auth()
    .with_single_cert(vec![certified.cert.der().clone()], key)
    .unwrap();
    let acceptor = TlsAcceptor::from(Arc::new(config));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let (stream, _) = listener.accept().await.unwrap();
            let acceptor = acceptor.clone();
            tokio::spawn(async move {
                let Ok(stream) = acceptor.accept(stream).await else {
                    return;
                };
                let (mut reader, mut writer) = tokio::io::split(stream);
                let _ = tokio::io::copy(&mut reader, &mut writer).await;
            });
        }
    });
    addr
}

#[tokio::test]
async fn secure_stream_counts_transport_bytes_on_close() {
    let tls = tls_echo_server().await;
    let counter = Arc::new(TrafficCounter::new());
    let agent = SecureAgent::new(&AgentConfig::default(), counter.clone()).unwrap();

    // Self-signed certificate: accepted because verification is relaxed.
    let target = TargetDescriptor::new("127.0.0.1", tls.port()).with_server_name("localhost");
    let mut stream = agent.dial(target).await.unwrap();
    assert_eq!(stream.transport().accounting(), Accounting::OnClose);
    let (_, session) = stream.get_ref().get_ref();
    assert!(session.protocol_version().is_some());
    stream.write_all(b"encrypted ping").await.unwrap();
    let mut echoed = [0u8; 14];
    stream.read_exact(&mut echoed).await.unwrap();
    assert_eq!(&echoed, b"encrypted ping");

    // Nothing is reported while the stream is open.
    assert_eq!(counter.snapshot().tx, 0);
    assert_eq!(counter.snapshot().rx, 0);

    stream.shutdown().await.unwrap();
    let written = stream.transport().bytes_written();
    let read = stream.transport().bytes_read();
    // Handshake and record overhead are part of the transport count.
    assert!(written > 14);
    assert!(read > 14);
    assert_eq!(counter.tx(), written);

    drop(stream);
    assert_eq!(counter.tx(), written);
    assert_eq!(counter.rx(), read);
}

#[tokio::test]
async fn secure_stream_through_http_tunnel() {
    let tls = tls_echo_server().await;
    let (proxy_port, _proxy) =
        http_proxy(b"HTTP/1.1 200 Connection established\r\n\r\n", Some(tls)).await;
    let counter = Arc::new(TrafficCounter::new());
    let config = proxied_config(&format!("http://127.0.0.1:{}", proxy_port));
    let agent = SecureAgent::new(&config, counter.clone()).unwrap();

    let mut stream = agent.dial(TargetDescriptor::new("localhost", 443)).await.unwrap();
    stream.write_all(b"hi").await.unwrap();
    let mut echoed = [0u8; 2];
    stream.read_exact(&mut echoed).await.unwrap();
    assert_eq!(&echoed, b"hi");
    drop(stream);

    assert!(counter.tx() > 2);
    assert!(counter.rx() > 2);
}

const HTTP_RESPONSE: &[u8] = b"HTTP/1.1 200 OK\r\ncontent-length: 2\r\nconnection: close\r\n\r\nok";

#[tokio::test]
async fn pooling_client_uses_agent() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let request = read_request_header(&mut stream).await;
        stream.write_all(HTTP_RESPONSE).await.unwrap();
        request
    });

    let config = AgentConfig::default()
        .with_pool_idle_timeout(Some(Duration::from_secs(5)))
        .with_pool_max_idle_per_host(1);
    let counter = Arc::new(TrafficCounter::new());
    let client =
        config.client_builder().build::<_, Empty<Bytes>>(Agent::new(&config, counter.clone()));

    let uri = format!("http://127.0.0.1:{}/status", port).parse().unwrap();
    let response = client.get(uri).await.unwrap();
    assert_eq!(response.status(), 200);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"ok");

    let request = server.await.unwrap();
    assert!(request.starts_with("GET /status HTTP/1.1\r\n"));
    assert_eq!(counter.tx(), request.len() as u64);
    assert_eq!(counter.rx(), HTTP_RESPONSE.len() as u64);
}
