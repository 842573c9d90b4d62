// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! UDP client connections

use std::net::SocketAddr;

use crate::{error::Result, service, slave::Slave};

use super::{Config, Context};

/// Create a datagram socket with a cached peer address for a directly
/// addressed device.
pub async fn connect(socket_addr: SocketAddr) -> Result<Context> {
    connect_slave(socket_addr, Slave::TCP_DEVICE).await
}

/// Create a datagram socket with a cached peer address for a slave
/// device.
pub async fn connect_slave(socket_addr: SocketAddr, slave: Slave) -> Result<Context> {
    let config = Config {
        slave,
        ..Config::default()
    };
    connect_with(socket_addr, &config).await
}

/// Create a datagram socket with an explicit client configuration.
pub async fn connect_with(socket_addr: SocketAddr, config: &Config) -> Result<Context> {
    config.validate()?;
    let mut client = service::udp::Client::new(socket_addr, config.slave);
    client.set_response_timeout(config.response_timeout);
    client.connect().await?;
    Ok(Context::new(Box::new(client), config))
}
