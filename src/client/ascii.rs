// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! ASCII client connections over serial lines

use crate::{
    error::{Error, Result},
    service,
    slave::Slave,
};

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
///
/// ASCII framing transfers two hex characters per byte, the serial
/// port must be configured for 7 data bits.
pub async fn connect_with(serial: &SerialConfig, config: &Config) -> Result<Context> {
    config.validate()?;
    if serial.data_bits != tokio_serial::DataBits::Seven {
        return Err(Error::Configuration(
            "ASCII framing requires 7 data bits".into(),
        ));
    }
    let mut client = service::ascii::Client::new(serial.clone(), config.slave);
    client.set_response_timeout(config.response_timeout);
    client.connect().await?;
    Ok(Context::new(Box::new(client), config))
}
