// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Synchronous TCP client connections

use std::net::SocketAddr;

use crate::{
    client::{self, Config},
    error::Result,
    slave::Slave,
};

use super::Context;

/// Establish a direct connection to a Modbus TCP coupler.
pub fn connect(socket_addr: SocketAddr) -> Result<Context> {
    connect_slave(socket_addr, Slave::TCP_DEVICE)
}

/// Connect to a slave device, probably through a Modbus TCP gateway.
pub fn connect_slave(socket_addr: SocketAddr, slave: Slave) -> Result<Context> {
    let config = Config {
        slave,
        ..Config::default()
    };
    connect_with(socket_addr, &config)
}

/// Connect with an explicit client configuration.
pub fn connect_with(socket_addr: SocketAddr, config: &Config) -> Result<Context> {
    let runtime = super::new_runtime()?;
    let async_ctx = runtime.block_on(client::tcp::connect_with(socket_addr, config))?;
    Ok(Context::new(runtime, async_ctx))
}
