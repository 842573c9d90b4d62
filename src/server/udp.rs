// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Modbus UDP server

use std::{future::Future, io, net::SocketAddr};

use bytes::BytesMut;
use tokio::net::UdpSocket;
use tokio_util::codec::{Decoder as _, Encoder as _};

use crate::{
    codec,
    error::Result,
    frame::{tcp::*, *},
    server::{Service, Terminated},
};

// An MBAP frame never exceeds 260 bytes, one datagram carries exactly
// one frame.
const MAX_DATAGRAM_SIZE: usize = 512;

/// A Modbus UDP server.
///
/// Datagram-oriented: one request per datagram, one response per
/// datagram. Malformed datagrams are logged and dropped.
#[derive(Debug)]
pub struct Server {
    socket: UdpSocket,
}

impl Server {
    /// Attach the server to a bound datagram socket.
    #[must_use]
    pub fn new(socket: UdpSocket) -> Self {
        Self { socket }
    }

    /// Bind a datagram socket and attach to it.
    pub async fn bind(socket_addr: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind(socket_addr).await?;
        Ok(Self { socket })
    }

    /// The local address the server is listening on.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Serve datagrams until a socket error occurs.
    pub async fn serve<S>(&self, service: S) -> Result<()>
    where
        S: Service,
    {
        let mut datagram = [0; MAX_DATAGRAM_SIZE];
        loop {
            let (len, peer) = self.socket.recv_from(&mut datagram).await?;
            self.process_datagram(&datagram[..len], peer, &service).await?;
        }
    }

    /// Serve datagrams until the abort signal fires.
    pub async fn serve_until<S, A>(self, service: S, abort_signal: A) -> Result<Terminated>
    where
        S: Service,
        A: Future<Output = ()> + Send + Unpin,
    {
        tokio::select! {
            res = self.serve(service) => {
                res?;
                Ok(Terminated::Finished)
            }
            () = abort_signal => {
                log::trace!("Abort signal received");
                Ok(Terminated::Aborted)
            }
        }
    }

    async fn process_datagram<S>(&self, datagram: &[u8], peer: SocketAddr, service: &S) -> Result<()>
    where
        S: Service,
    {
        let mut codec = codec::tcp::ServerCodec::default();
        let mut buf = BytesMut::from(datagram);
        let adu = match codec.decode(&mut buf) {
            Ok(Some(adu)) => adu,
            Ok(None) => {
                log::debug!("Ignoring truncated datagram from {peer}");
                return Ok(());
            }
            Err(err) => {
                log::warn!("Ignoring malformed datagram from {peer}: {err}");
                return Ok(());
            }
        };
        let ServerRequestAdu { hdr, pdu } = adu;
        let is_broadcast = hdr.unit_id == 0;

        let response_pdu = match pdu {
            Err(exc_rsp) => (!is_broadcast).then_some(ResponsePdu(Err(exc_rsp))),
            Ok(request_pdu) => {
                let slave_request = SlaveRequest {
                    slave: hdr.unit_id,
                    request: request_pdu.into(),
                };
                let function = slave_request.request.function_code();
                match service.call(slave_request).await {
                    Ok(Some(rsp)) => Some(ResponsePdu(Ok(rsp))),
                    Ok(None) => None,
                    Err(exception) => (!is_broadcast).then_some(ResponsePdu(Err(
                        ExceptionResponse {
                            function,
                            exception,
                        },
                    ))),
                }
            }
        };
        if let Some(pdu) = response_pdu {
            let mut response_data = BytesMut::new();
            codec.encode(ResponseAdu { hdr, pdu }, &mut response_data)?;
            self.socket.send_to(&response_data, peer).await?;
        }
        Ok(())
    }
}
