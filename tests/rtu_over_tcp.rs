// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end scenarios over RTU-framed TCP streams

#![cfg(all(feature = "rtu", feature = "tcp", feature = "server"))]

use std::{net::SocketAddr, sync::Arc, time::Duration};

use tokio::net::TcpListener;

use modbus_engine::{
    client,
    prelude::*,
    server::rtu_over_tcp::{accept_tcp_connection, Server},
};

async fn spawn_server() -> (SocketAddr, Arc<InMemoryStore>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let socket_addr = listener.local_addr().unwrap();
    let store = Arc::new(InMemoryStore::with_capacity(64, 64, 128, 64));
    let service = StoreService::new(Arc::clone(&store));
    let server = Server::new(listener);
    tokio::spawn(async move {
        let on_connected = move |stream, socket_addr| {
            let service = service.clone();
            async move {
                accept_tcp_connection(stream, socket_addr, move |_| Ok(Some(service.clone())))
            }
        };
        server
            .serve(&on_connected, |err| eprintln!("server error: {err}"))
            .await
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    (socket_addr, store)
}

#[tokio::test]
async fn register_roundtrip() {
    let (socket_addr, _store) = spawn_server().await;

    let mut ctx = client::rtu::connect_tcp_slave(socket_addr, Slave(0x11))
        .await
        .unwrap();
    ctx.write_single_register(0x01, 0x0003).await.unwrap();
    assert_eq!(
        ctx.read_holding_registers(0x01, 1).await.unwrap(),
        vec![0x0003]
    );
}

#[tokio::test]
async fn coil_roundtrip() {
    let (socket_addr, _store) = spawn_server().await;

    let mut ctx = client::rtu::connect_tcp_slave(socket_addr, Slave(1)).await.unwrap();
    ctx.write_multiple_coils(0, &[true, false, true]).await.unwrap();
    assert_eq!(
        ctx.read_coils(0, 3).await.unwrap(),
        vec![true, false, true]
    );
}

#[tokio::test]
async fn broadcast_returns_immediately() {
    let (socket_addr, store) = spawn_server().await;

    let config = Config {
        slave: Slave::BROADCAST,
        // A broadcast must not wait for this timeout: no read is
        // attempted at all.
        response_timeout: Some(Duration::from_secs(10)),
        ..Config::default()
    };
    let mut ctx = client::rtu::connect_tcp_with(socket_addr, &config).await.unwrap();

    let started = std::time::Instant::now();
    ctx.write_single_coil(5, true).await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(1));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(store.read_coils(5, 1).unwrap(), vec![true]);
}

#[tokio::test]
async fn exception_passthrough() {
    let (socket_addr, _store) = spawn_server().await;

    let mut ctx = client::rtu::connect_tcp_slave(socket_addr, Slave(1)).await.unwrap();
    let err = ctx.read_holding_registers(120, 10).await.unwrap_err();
    assert_eq!(err.exception_code(), Some(ExceptionCode::IllegalDataAddress));
}
