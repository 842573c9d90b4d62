// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Serial application data units, shared by the RTU and ASCII framings

use super::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Header {
    pub(crate) slave_id: SlaveId,
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
/// See [`tcp::ServerRequestAdu`](super::tcp::ServerRequestAdu) for the
/// rationale of the embedded `Result`.
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
            slave: hdr.slave_id,
            request: pdu.into(),
        })
    }
}
