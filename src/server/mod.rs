// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Modbus server engines
//!
//! One accept/serve loop per transport, all dispatching inbound
//! requests through a [`Service`]. The [`StoreService`] implements the
//! standard function codes on top of a
//! [`DataStore`](crate::store::DataStore).

#[cfg(feature = "rtu")]
pub mod rtu;

#[cfg(all(feature = "rtu", feature = "tcp"))]
pub mod rtu_over_tcp;

#[cfg(feature = "tcp")]
pub mod tcp;

#[cfg(feature = "udp")]
pub mod udp;

mod dispatch;

pub use self::dispatch::StoreService;

use std::{collections::BTreeMap, future::Future};

use crate::frame::{device_id_object, ExceptionCode, Response, SlaveRequest};

/// A Modbus server service.
pub trait Service: Send + Sync {
    /// The future response value.
    type Future: Future<Output = Result<Option<Response>, ExceptionCode>> + Send;

    /// Process the request asynchronously.
    ///
    /// `Ok(None)` suppresses the response on the wire, as required for
    /// broadcasts and listen-only mode. An `Err` is answered with the
    /// corresponding exception response.
    fn call(&self, req: SlaveRequest<'static>) -> Self::Future;
}

/// How a serve loop has ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terminated {
    /// The transport is exhausted, e.g. the serial stream has ended.
    Finished,
    /// The abort signal fired and all connection tasks have been
    /// joined.
    Aborted,
}

/// The device-identification record served for function code
/// `0x2B`/`0x0E`.
///
/// Objects are kept in ascending object-id order. The defaults carry
/// the mandatory basic objects of this crate; override them per server
/// instance.
#[derive(Debug, Clone)]
pub struct DeviceIdentification {
    pub(crate) conformity_level: u8,
    pub(crate) objects: BTreeMap<u8, Vec<u8>>,
}

impl Default for DeviceIdentification {
    fn default() -> Self {
        let mut objects = BTreeMap::new();
        objects.insert(
            device_id_object::VENDOR_NAME,
            b"slowtec GmbH".to_vec(),
        );
        objects.insert(
            device_id_object::PRODUCT_CODE,
            env!("CARGO_PKG_NAME").as_bytes().to_vec(),
        );
        objects.insert(
            device_id_object::MAJOR_MINOR_REVISION,
            env!("CARGO_PKG_VERSION").as_bytes().to_vec(),
        );
        Self {
            // Basic identification, stream and individual access.
            conformity_level: 0x81,
            objects,
        }
    }
}

impl DeviceIdentification {
    /// Replace the vendor name (object `0x00`).
    #[must_use]
    pub fn vendor_name(self, value: impl Into<Vec<u8>>) -> Self {
        self.object(device_id_object::VENDOR_NAME, value)
    }

    /// Replace the product code (object `0x01`).
    #[must_use]
    pub fn product_code(self, value: impl Into<Vec<u8>>) -> Self {
        self.object(device_id_object::PRODUCT_CODE, value)
    }

    /// Replace the major/minor revision (object `0x02`).
    #[must_use]
    pub fn revision(self, value: impl Into<Vec<u8>>) -> Self {
        self.object(device_id_object::MAJOR_MINOR_REVISION, value)
    }

    /// Replace the vendor URL (object `0x03`).
    #[must_use]
    pub fn vendor_url(self, value: impl Into<Vec<u8>>) -> Self {
        self.object(device_id_object::VENDOR_URL, value)
    }

    /// Replace the product name (object `0x04`).
    #[must_use]
    pub fn product_name(self, value: impl Into<Vec<u8>>) -> Self {
        self.object(device_id_object::PRODUCT_NAME, value)
    }

    /// Replace the model name (object `0x05`).
    #[must_use]
    pub fn model_name(self, value: impl Into<Vec<u8>>) -> Self {
        self.object(device_id_object::MODEL_NAME, value)
    }

    /// Replace the user application name (object `0x06`).
    #[must_use]
    pub fn user_application_name(self, value: impl Into<Vec<u8>>) -> Self {
        self.object(device_id_object::USER_APPLICATION_NAME, value)
    }

    /// Insert or replace an arbitrary object.
    #[must_use]
    pub fn object(mut self, object_id: u8, value: impl Into<Vec<u8>>) -> Self {
        self.objects.insert(object_id, value.into());
        self
    }

    /// Replace the reported conformity level.
    #[must_use]
    pub fn conformity_level(mut self, conformity_level: u8) -> Self {
        self.conformity_level = conformity_level;
        self
    }
}
