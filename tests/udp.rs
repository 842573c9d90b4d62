// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end scenarios over UDP datagrams

#![cfg(all(feature = "udp", feature = "server"))]

use std::{net::SocketAddr, sync::Arc, time::Duration};

use modbus_engine::{client, prelude::*, server::udp::Server};

async fn spawn_server() -> (SocketAddr, Arc<InMemoryStore>) {
    let server = Server::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
    let socket_addr = server.local_addr().unwrap();
    let store = Arc::new(InMemoryStore::with_capacity(64, 64, 128, 64));
    let service = StoreService::new(Arc::clone(&store));
    tokio::spawn(async move { server.serve(service).await });
    tokio::time::sleep(Duration::from_millis(20)).await;
    (socket_addr, store)
}

#[tokio::test]
async fn register_roundtrip() {
    let (socket_addr, _store) = spawn_server().await;

    let mut ctx = client::udp::connect_slave(socket_addr, Slave(1)).await.unwrap();
    ctx.write_multiple_registers(10, &[1, 2, 3]).await.unwrap();
    assert_eq!(
        ctx.read_holding_registers(10, 3).await.unwrap(),
        vec![1, 2, 3]
    );
}

#[tokio::test]
async fn broadcast_write_without_read() {
    let (socket_addr, store) = spawn_server().await;

    let config = Config {
        slave: Slave::BROADCAST,
        response_timeout: Some(Duration::from_secs(10)),
        ..Config::default()
    };
    let mut ctx = client::udp::connect_with(socket_addr, &config).await.unwrap();
    let started = std::time::Instant::now();
    ctx.write_single_register(7, 0x1234).await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(1));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(store.read_holding_registers(7, 1).unwrap(), vec![0x1234]);
}

#[tokio::test]
async fn timeout_without_server() {
    // A socket nobody answers on.
    let unused = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let socket_addr = unused.local_addr().unwrap();
    drop(unused);

    let config = Config {
        slave: Slave(1),
        response_timeout: Some(Duration::from_millis(50)),
        retry_count: 0,
        ..Config::default()
    };
    let mut ctx = client::udp::connect_with(socket_addr, &config).await.unwrap();
    let err = ctx.read_holding_registers(0, 1).await.unwrap_err();
    let Error::RequestFailed { attempts, source } = err else {
        panic!("unexpected error: {err}");
    };
    assert_eq!(attempts, 1);
    assert!(matches!(*source, Error::Timeout | Error::Transport(_)));
}
