// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Synchronous RTU client connections

use std::net::SocketAddr;

use crate::{
    client::{self, Config, SerialConfig},
    error::Result,
    slave::Slave,
};

use super::Context;

/// Open a serial line to the default slave device.
pub fn connect(serial: &SerialConfig) -> Result<Context> {
    connect_slave(serial, Slave::MIN_DEVICE)
}

/// Open a serial line to a slave device.
pub fn connect_slave(serial: &SerialConfig, slave: Slave) -> Result<Context> {
    let config = Config {
        slave,
        ..Config::default()
    };
    connect_with(serial, &config)
}

/// Open a serial line with an explicit client configuration.
pub fn connect_with(serial: &SerialConfig, config: &Config) -> Result<Context> {
    let runtime = super::new_runtime()?;
    let async_ctx = runtime.block_on(client::rtu::connect_with(serial, config))?;
    Ok(Context::new(runtime, async_ctx))
}

/// Connect to a device that speaks RTU framing over a TCP stream.
pub fn connect_tcp(socket_addr: SocketAddr) -> Result<Context> {
    connect_tcp_slave(socket_addr, Slave::MIN_DEVICE)
}

/// Connect to a slave device over RTU-over-TCP.
pub fn connect_tcp_slave(socket_addr: SocketAddr, slave: Slave) -> Result<Context> {
    let config = Config {
        slave,
        ..Config::default()
    };
    connect_tcp_with(socket_addr, &config)
}

/// Connect over RTU-over-TCP with an explicit client configuration.
pub fn connect_tcp_with(socket_addr: SocketAddr, config: &Config) -> Result<Context> {
    let runtime = super::new_runtime()?;
    let async_ctx = runtime.block_on(client::rtu::connect_tcp_with(socket_addr, config))?;
    Ok(Context::new(runtime, async_ctx))
}
