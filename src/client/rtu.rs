// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! RTU client connections, over serial lines or TCP streams

use std::net::SocketAddr;

use crate::{error::Result, service, slave::Slave};

use super::{Config, Context, SerialConfig};

/// Open a serial line to the default slave device.
pub async fn connect(serial: &SerialConfig) -> Result<Context> {
    connect_slave(serial, Slave::MIN_DEVICE).await
}

/// Open a serial line to a slave device.
pub async fn connect_slave(serial: &SerialConfig, slave: Slave) -> Result<Context> {
    let config = Config {
        slave,
        ..Config::default()
    };
    connect_with(serial, &config).await
}

/// Open a serial line with an explicit client configuration.
pub async fn connect_with(serial: &SerialConfig, config: &Config) -> Result<Context> {
    config.validate()?;
    let endpoint = service::rtu::Endpoint::Serial(serial.clone());
    connect_endpoint(endpoint, config).await
}

/// Connect to a device that speaks RTU framing over a TCP stream.
pub async fn connect_tcp(socket_addr: SocketAddr) -> Result<Context> {
    connect_tcp_slave(socket_addr, Slave::MIN_DEVICE).await
}

/// Connect to a slave device that speaks RTU framing over a TCP
/// stream.
pub async fn connect_tcp_slave(socket_addr: SocketAddr, slave: Slave) -> Result<Context> {
    let config = Config {
        slave,
        ..Config::default()
    };
    connect_tcp_with(socket_addr, &config).await
}

/// Connect over RTU-over-TCP with an explicit client configuration.
pub async fn connect_tcp_with(socket_addr: SocketAddr, config: &Config) -> Result<Context> {
    config.validate()?;
    let endpoint = service::rtu::Endpoint::Tcp(socket_addr);
    connect_endpoint(endpoint, config).await
}

async fn connect_endpoint(endpoint: service::rtu::Endpoint, config: &Config) -> Result<Context> {
    let mut client = service::rtu::Client::new(endpoint, config.slave);
    client.set_connect_timeout(config.connect_timeout);
    client.set_response_timeout(config.response_timeout);
    client.connect().await?;
    Ok(Context::new(Box::new(client), config))
}
