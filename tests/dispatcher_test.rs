//! Integration tests for the rule dispatcher

use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::time::{timeout, Duration};

use rustfwd::{Config, Protocol, Rule, RuleDispatcher};

async fn free_tcp_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

async fn free_udp_port() -> u16 {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    socket.local_addr().unwrap().port()
}

async fn spawn_tcp_echo() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        loop {
            let (mut stream, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            tokio::spawn(async move {
                let (mut reader, mut writer) = stream.split();
                let _ = tokio::io::copy(&mut reader, &mut writer).await;
            });
        }
    });
    port
}

async fn spawn_udp_echo() -> u16 {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let port = socket.local_addr().unwrap().port();
    tokio::spawn(async move {
        let mut buf = [0u8; 2048];
        while let Ok((len, peer)) = socket.recv_from(&mut buf).await {
            let _ = socket.send_to(&buf[..len], peer).await;
        }
    });
    port
}

fn rule(local_port: u16, remote_port: u16, protocol: Protocol) -> Rule {
    Rule {
        local_port,
        remote_port,
        remote_host: "127.0.0.1".to_string(),
        protocol,
    }
}

async fn echo_roundtrip_tcp(local_port: u16, payload: &[u8]) -> Vec<u8> {
    let mut client = TcpStream::connect(("127.0.0.1", local_port)).await.unwrap();
    client.write_all(payload).await.unwrap();
    let mut buf = vec![0u8; payload.len()];
    timeout(Duration::from_secs(2), client.read_exact(&mut buf))
        .await
        .expect("read timed out")
        .unwrap();
    buf
}

#[tokio::test]
async fn test_empty_configuration_is_startup_fatal() {
    let dispatcher = RuleDispatcher::new(Arc::new(Config::default()));
    let err = dispatcher.run().await.unwrap_err();
    assert!(err.to_string().contains("no forwarding rules"));
}

#[tokio::test]
async fn test_dispatcher_runs_tcp_and_udp_rules_together() {
    let tcp_target = spawn_tcp_echo().await;
    let udp_target = spawn_udp_echo().await;
    let tcp_local = free_tcp_port().await;
    let udp_local = free_udp_port().await;

    let config = Config {
        debug: false,
        rules: vec![
            rule(tcp_local, tcp_target, Protocol::Tcp),
            rule(udp_local, udp_target, Protocol::Udp),
        ],
    };

    let dispatcher = Arc::new(RuleDispatcher::new(Arc::new(config)));
    let runner = Arc::clone(&dispatcher);
    let handle = tokio::spawn(async move { runner.run().await });
    tokio::time::sleep(Duration::from_millis(150)).await;

    assert_eq!(echo_roundtrip_tcp(tcp_local, b"over tcp").await, b"over tcp");

    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    client
        .send_to(b"over udp", ("127.0.0.1", udp_local))
        .await
        .unwrap();
    let mut buf = [0u8; 64];
    let (len, _) = timeout(Duration::from_secs(2), client.recv_from(&mut buf))
        .await
        .expect("udp reply timed out")
        .unwrap();
    assert_eq!(&buf[..len], b"over udp");

    dispatcher.initiate_shutdown();
    timeout(Duration::from_secs(2), handle)
        .await
        .expect("dispatcher did not stop")
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_bind_conflict_fails_one_rule_only() {
    // Occupy the first rule's port so its relay cannot start; the second
    // rule must still come up and forward traffic.
    let occupied = TcpListener::bind("0.0.0.0:0").await.unwrap();
    let conflicted_port = occupied.local_addr().unwrap().port();

    let echo_target = spawn_tcp_echo().await;
    let healthy_local = free_tcp_port().await;

    let config = Config {
        debug: false,
        rules: vec![
            rule(conflicted_port, echo_target, Protocol::Tcp),
            rule(healthy_local, echo_target, Protocol::Tcp),
        ],
    };

    let dispatcher = Arc::new(RuleDispatcher::new(Arc::new(config)));
    let runner = Arc::clone(&dispatcher);
    let handle = tokio::spawn(async move { runner.run().await });
    tokio::time::sleep(Duration::from_millis(150)).await;

    assert_eq!(
        echo_roundtrip_tcp(healthy_local, b"still running").await,
        b"still running"
    );

    dispatcher.initiate_shutdown();
    timeout(Duration::from_secs(2), handle)
        .await
        .expect("dispatcher did not stop")
        .unwrap()
        .unwrap();
}
