// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Retry and auto-reconnect behavior of the client engine

#![cfg(feature = "tcp")]

use std::time::{Duration, Instant};

use tokio::net::TcpListener;

use modbus_engine::{client, prelude::*};

/// A server that accepts connections and immediately drops them, so
/// every exchange fails at the transport level.
async fn spawn_dropping_server() -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let socket_addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            drop(stream);
        }
    });
    socket_addr
}

#[tokio::test]
async fn persistent_failure_reports_all_attempts() {
    let socket_addr = spawn_dropping_server().await;

    let config = Config {
        slave: Slave::TCP_DEVICE,
        retry_count: 2,
        retry_delay: Duration::from_millis(50),
        response_timeout: Some(Duration::from_millis(200)),
        ..Config::default()
    };
    let mut ctx = client::tcp::connect_with(socket_addr, &config).await.unwrap();

    let started = Instant::now();
    let err = ctx.read_holding_registers(0, 1).await.unwrap_err();
    let elapsed = started.elapsed();

    let Error::RequestFailed { attempts, source } = err else {
        panic!("unexpected error: {err}");
    };
    assert_eq!(attempts, 3);
    assert!(source.is_retryable());
    // Two retry delays between the three attempts.
    assert!(elapsed >= Duration::from_millis(100));
}

#[tokio::test]
async fn no_reconnect_when_disabled() {
    let socket_addr = spawn_dropping_server().await;

    let config = Config {
        slave: Slave::TCP_DEVICE,
        retry_count: 2,
        retry_delay: Duration::from_millis(10),
        response_timeout: Some(Duration::from_millis(100)),
        auto_reconnect: false,
        ..Config::default()
    };
    let mut ctx = client::tcp::connect_with(socket_addr, &config).await.unwrap();

    // The first attempt fails and closes the connection; without
    // auto-reconnect the retry loop stops right away.
    let err = ctx.read_holding_registers(0, 1).await.unwrap_err();
    assert!(matches!(err, Error::NotConnected | Error::RequestFailed { .. }));
    let err = ctx.read_holding_registers(0, 1).await.unwrap_err();
    assert!(matches!(err, Error::NotConnected));
}

#[tokio::test]
async fn invalid_request_fails_without_io() {
    // No server at all: local validation must reject the request
    // before any connection attempt.
    let socket_addr = spawn_dropping_server().await;
    let mut ctx = client::tcp::connect(socket_addr).await.unwrap();
    let err = ctx.read_holding_registers(0, 126).await.unwrap_err();
    assert!(matches!(err, Error::InvalidRequest(_)));
}
