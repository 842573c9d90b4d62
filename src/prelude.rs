// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Common imports for client and server code

pub use crate::{
    client::{ByteOrder, Client, Config, Context, Reader, TransportType, WordOrder, Writer},
    slave::{Slave, SlaveContext, SlaveId},
    Address, Coil, CommEventLog, DeviceIdObject, DeviceIdResponse, DiagnosticSubFunction, Error,
    ExceptionCode, ExceptionResponse, FileRecord, FileRecordRef, FunctionCode, Quantity,
    ReadDeviceIdCode, Request, Response, Result, ServerId, SlaveRequest, Word,
};

#[cfg(feature = "rtu")]
pub use crate::client::SerialConfig;

#[cfg(feature = "ascii")]
pub use crate::client::ascii;

#[cfg(feature = "rtu")]
pub use crate::client::rtu;

#[cfg(feature = "tcp")]
pub use crate::client::tcp;

#[cfg(feature = "udp")]
pub use crate::client::udp;

#[cfg(feature = "server")]
pub use crate::{
    server::{DeviceIdentification, Service, StoreService, Terminated},
    store::{CounterEvent, DataStore, InMemoryStore, StoreResult},
};

/// The synchronous counterparts, kept in their own namespace to avoid
/// clashing with the asynchronous types.
#[cfg(feature = "sync")]
pub mod sync {
    pub use crate::client::sync::{Context, Reader, Writer};

    #[cfg(feature = "ascii")]
    pub use crate::client::sync::ascii;

    #[cfg(feature = "rtu")]
    pub use crate::client::sync::rtu;

    #[cfg(feature = "tcp")]
    pub use crate::client::sync::tcp;

    #[cfg(feature = "udp")]
    pub use crate::client::sync::udp;
}
