// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Every exception code must pass through the RTU-over-TCP transport
//! unchanged.

#![cfg(all(feature = "rtu", feature = "tcp", feature = "server"))]

mod exception;

use std::time::Duration;

use tokio::net::TcpListener;

use exception::{check_client_context, TestService};
use modbus_engine::{
    client,
    server::rtu_over_tcp::{accept_tcp_connection, Server},
    Slave,
};

#[tokio::test]
async fn all_exceptions() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let socket_addr = listener.local_addr().unwrap();
    let server = Server::new(listener);

    tokio::spawn(async move {
        let new_service = |_socket_addr| Ok(Some(TestService {}));
        let on_connected = |stream, socket_addr| async move {
            accept_tcp_connection(stream, socket_addr, new_service)
        };
        let on_process_error = |err| {
            eprintln!("{err}");
        };
        server.serve(&on_connected, on_process_error).await
    });
    tokio::time::sleep(Duration::from_millis(20)).await;

    let ctx = client::rtu::connect_tcp_slave(socket_addr, Slave(0x2A))
        .await
        .unwrap();
    check_client_context(ctx).await;
}
