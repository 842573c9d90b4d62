// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Modbus device addressing
//!
//! A request carries a single address byte selecting the slave device
//! it is meant for. `0` broadcasts to every device on the bus without
//! expecting a response, `1..=247` select individual devices, and
//! `248..=255` are reserved by the protocol. On TCP the byte doubles
//! as the MBAP *unit id*, where `255` addresses a directly connected
//! device that is not behind a TCP/RTU gateway.

use std::fmt;

use crate::error::Error;

/// Slave identifier
pub type SlaveId = u8;

/// A single byte for addressing Modbus slave devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Slave(pub SlaveId);

impl Slave {
    /// The one-way broadcast address: every device on the bus performs
    /// the request, none of them responds.
    pub const BROADCAST: Self = Slave(0);

    /// The lowest address of an individual slave device.
    pub const MIN_DEVICE: Self = Slave(1);

    /// The highest address of an individual slave device.
    pub const MAX_DEVICE: Self = Slave(247);

    /// The reserved unit id for a directly connected Modbus TCP
    /// device.
    ///
    /// [Modbus Messaging on TCP/IP Implementation Guide](http://www.modbus.org/docs/Modbus_Messaging_Implementation_Guide_V1_0b.pdf), page 23
    /// "On TCP/IP, the Modbus server is addressed using its IP address; therefore,
    /// the Modbus Unit Identifier is useless. The value 0xFF has to be used."
    pub const TCP_DEVICE: Self = Slave(255);

    /// Construct a checked address of an individual device.
    ///
    /// Rejects the broadcast address and the reserved range.
    pub fn device(slave_id: SlaveId) -> Result<Self, Error> {
        let slave = Slave(slave_id);
        if !slave.is_device() {
            return Err(Error::Configuration(format!(
                "not an individual device address: {slave}"
            )));
        }
        Ok(slave)
    }

    /// Whether this is the broadcast address.
    #[must_use]
    pub const fn is_broadcast(self) -> bool {
        self.0 == Self::BROADCAST.0
    }

    /// Whether this address selects an individual device.
    #[must_use]
    pub const fn is_device(self) -> bool {
        self.0 >= Self::MIN_DEVICE.0 && self.0 <= Self::MAX_DEVICE.0
    }

    /// Whether this address falls into the reserved range `248..=255`.
    #[must_use]
    pub const fn is_reserved(self) -> bool {
        self.0 > Self::MAX_DEVICE.0
    }

    /// Ensure the address is usable as the target of client requests:
    /// an individual device, the broadcast address, or the direct TCP
    /// device address. The rest of the reserved range is refused.
    pub(crate) fn ensure_request_target(self) -> Result<Self, Error> {
        if self.is_reserved() && self.0 != Self::TCP_DEVICE.0 {
            return Err(Error::Configuration(format!(
                "reserved slave address: {self}"
            )));
        }
        Ok(self)
    }
}

impl From<SlaveId> for Slave {
    fn from(from: SlaveId) -> Self {
        Slave(from)
    }
}

impl From<Slave> for SlaveId {
    fn from(from: Slave) -> Self {
        from.0
    }
}

impl fmt::Display for Slave {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02X}", self.0)
    }
}

/// Stateful management of the currently addressed device.
///
/// Serial devices are always addressed by their assigned *slave id*.
/// TCP devices default to the implicit [`Slave::TCP_DEVICE`] unit id
/// and only need an explicit id when a TCP/RTU gateway forwards the
/// request to a serial bus behind it.
///
/// The names *slave id* and *unit id* are used synonymously depending
/// on the context. This library consistently adopted the term *slave*.
pub trait SlaveContext {
    /// Select a slave device for all subsequent outgoing requests.
    fn set_slave(&mut self, slave: Slave);
}
