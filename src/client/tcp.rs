// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! TCP and TLS client connections

use std::net::SocketAddr;

use crate::{error::Result, service, slave::Slave};

use super::{Config, Context};

/// Establish a direct connection to a Modbus TCP coupler.
pub async fn connect(socket_addr: SocketAddr) -> Result<Context> {
    connect_slave(socket_addr, Slave::TCP_DEVICE).await
}

/// Connect to a physical, broadcast, or custom Modbus device,
/// probably through a Modbus TCP gateway that is forwarding
/// messages to/from the corresponding slave device.
pub async fn connect_slave(socket_addr: SocketAddr, slave: Slave) -> Result<Context> {
    let config = Config {
        slave,
        ..Config::default()
    };
    connect_with(socket_addr, &config).await
}

/// Connect with an explicit client configuration.
pub async fn connect_with(socket_addr: SocketAddr, config: &Config) -> Result<Context> {
    config.validate()?;
    let mut client = service::tcp::Client::new(socket_addr, config.slave);
    client.set_connect_timeout(config.connect_timeout);
    client.set_idle_timeout(config.idle_timeout);
    client.set_response_timeout(config.response_timeout);
    client.connect().await?;
    Ok(Context::new(Box::new(client), config))
}

/// Establish a TLS-wrapped connection to a directly addressed device.
///
/// The connector carries the TLS configuration (trust anchors, an
/// optional client certificate, TLS 1.2 as the minimum version).
#[cfg(feature = "tls")]
pub async fn connect_tls(
    socket_addr: SocketAddr,
    domain: &str,
    tls_connector: tokio_rustls::TlsConnector,
) -> Result<Context> {
    connect_tls_slave(socket_addr, domain, tls_connector, Slave::TCP_DEVICE).await
}

/// Establish a TLS-wrapped connection to a slave device.
#[cfg(feature = "tls")]
pub async fn connect_tls_slave(
    socket_addr: SocketAddr,
    domain: &str,
    tls_connector: tokio_rustls::TlsConnector,
    slave: Slave,
) -> Result<Context> {
    let config = Config {
        slave,
        ..Config::default()
    };
    connect_tls_with(socket_addr, domain, tls_connector, &config).await
}

/// Establish a TLS-wrapped connection with an explicit client
/// configuration.
#[cfg(feature = "tls")]
pub async fn connect_tls_with(
    socket_addr: SocketAddr,
    domain: &str,
    tls_connector: tokio_rustls::TlsConnector,
    config: &Config,
) -> Result<Context> {
    use crate::error::Error;

    config.validate()?;
    let server_name = pki_types::ServerName::try_from(domain.to_owned())
        .map_err(|err| Error::Configuration(format!("invalid server name: {err}")))?;
    let mut client = service::tcp::Client::new(socket_addr, config.slave);
    client.set_tls(service::tcp::TlsSetup {
        connector: tls_connector,
        server_name,
    });
    client.set_connect_timeout(config.connect_timeout);
    client.set_idle_timeout(config.idle_timeout);
    client.set_response_timeout(config.response_timeout);
    client.connect().await?;
    Ok(Context::new(Box::new(client), config))
}
