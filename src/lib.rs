// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(rust_2018_idioms)]
#![warn(rust_2021_compatibility)]
#![warn(missing_debug_implementations)]
#![warn(unreachable_pub)]
#![cfg_attr(not(test), warn(unsafe_code))]
#![warn(clippy::all)]
#![warn(clippy::cast_lossless)]
#![warn(clippy::explicit_deref_methods)]
#![warn(clippy::explicit_into_iter_loop)]
#![warn(clippy::explicit_iter_loop)]
#![warn(rustdoc::broken_intra_doc_links)]
#![doc = include_str!("../README.md")]

pub mod prelude;

pub mod client;

pub mod slave;

#[cfg(feature = "server")]
pub mod server;

#[cfg(feature = "server")]
pub mod store;

mod codec;
mod error;
mod frame;

#[cfg(any(feature = "tcp", feature = "rtu"))]
mod service;

// Re-export for the payload type of custom function codes.
pub use bytes;

pub use crate::{
    error::{Error, FrameError, Result},
    frame::{
        device_id_object, Address, Coil, CommEventLog, DeviceIdObject, DeviceIdResponse,
        DiagnosticSubFunction, ExceptionCode, ExceptionResponse, FileRecord, FileRecordRef,
        FunctionCode, Quantity, ReadDeviceIdCode, Request, Response, ServerId, SlaveRequest,
        Word,
    },
    slave::{Slave, SlaveId},
};
