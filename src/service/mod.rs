// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-transport client machinery
//!
//! Each submodule owns exactly one logical connection and implements
//! the [`Client`](crate::client::Client) driver contract for its
//! framing and transport combination.

#[cfg(feature = "ascii")]
pub(crate) mod ascii;

#[cfg(feature = "rtu")]
pub(crate) mod rtu;

#[cfg(feature = "tcp")]
pub(crate) mod tcp;

#[cfg(feature = "udp")]
pub(crate) mod udp;

use std::{future::Future, time::Duration};

use crate::error::{Error, Result};

/// Bound a driver operation by the configured deadline.
///
/// Without a deadline the operation may block indefinitely.
pub(crate) async fn with_timeout<T>(
    timeout: Option<Duration>,
    task: impl Future<Output = Result<T>>,
) -> Result<T> {
    match timeout {
        Some(duration) => tokio::time::timeout(duration, task)
            .await
            .map_err(|_elapsed| Error::Timeout)?,
        None => task.await,
    }
}
