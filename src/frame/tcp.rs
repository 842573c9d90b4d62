// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! MBAP-framed application data units (TCP and UDP)

use super::*;

/// Correlates an MBAP response with its request.
///
/// `0` is reserved as the "uninitialized" sentinel and never assigned
/// to an outgoing request.
pub(crate) type TransactionId = u16;

/// The slave address within an MBAP frame.
pub(crate) type UnitId = u8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Header {
    pub(crate) transaction_id: TransactionId,
    pub(crate) unit_id: UnitId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RequestAdu<'a> {
    pub(crate) hdr: Header,
    pub(crate) pdu: RequestPdu<'a>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ResponseAdu {
    pub(crate) hdr: Header,
    pub(crate) pdu: ResponsePdu,
}

/// An inbound request as seen by the server.
///
/// Requests that are structurally sound but violate a protocol
/// constraint are decoded into the exception response to send back,
/// so that a malformed request never tears down the connection.
#[cfg(feature = "server")]
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ServerRequestAdu {
    pub(crate) hdr: Header,
    pub(crate) pdu: Result<RequestPdu<'static>, ExceptionResponse>,
}

#[cfg(feature = "server")]
impl From<ServerRequestAdu> for Result<SlaveRequest<'static>, ExceptionResponse> {
    fn from(from: ServerRequestAdu) -> Self {
        let ServerRequestAdu { hdr, pdu } = from;
        pdu.map(|pdu| SlaveRequest {
            slave: hdr.unit_id,
            request: pdu.into(),
        })
    }
}
