// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! MBAP client driver for UDP datagrams

use std::{
    fmt, io,
    net::SocketAddr,
    sync::atomic::{AtomicU16, Ordering},
    time::Duration,
};

use bytes::BytesMut;
use tokio::net::UdpSocket;
use tokio_util::codec::{Decoder as _, Encoder as _};

use crate::{
    client::TransportType,
    codec,
    error::{Error, Result},
    frame::{tcp::*, *},
    slave::*,
};

use super::with_timeout;

// An MBAP frame never exceeds 260 bytes, one datagram carries exactly
// one frame.
const MAX_DATAGRAM_SIZE: usize = 512;

/// Modbus UDP client driver
///
/// The socket is connectionless; "connected" means a bound socket with
/// the resolved peer address cached. One datagram carries one request,
/// one datagram one response. There is no retransmission at this layer.
pub(crate) struct Client {
    socket_addr: SocketAddr,
    socket: Option<UdpSocket>,
    unit_id: UnitId,
    transaction_id: AtomicU16,
    response_timeout: Option<Duration>,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("socket_addr", &self.socket_addr)
            .field("unit_id", &self.unit_id)
            .field("connected", &self.socket.is_some())
            .finish_non_exhaustive()
    }
}

impl Client {
    pub(crate) fn new(socket_addr: SocketAddr, slave: Slave) -> Self {
        Self {
            socket_addr,
            socket: None,
            unit_id: slave.into(),
            transaction_id: AtomicU16::new(0),
            response_timeout: None,
        }
    }

    pub(crate) fn set_response_timeout(&mut self, timeout: Option<Duration>) {
        self.response_timeout = timeout;
    }

    fn next_transaction_id(&self) -> TransactionId {
        let mut next = self
            .transaction_id
            .load(Ordering::Relaxed)
            .wrapping_add(1);
        if next == 0 {
            next = 1;
        }
        self.transaction_id.store(next, Ordering::Relaxed);
        next
    }

    fn next_request_adu<'a, R>(&self, req: R) -> RequestAdu<'a>
    where
        R: Into<RequestPdu<'a>>,
    {
        RequestAdu {
            hdr: Header {
                transaction_id: self.next_transaction_id(),
                unit_id: self.unit_id,
            },
            pdu: req.into(),
        }
    }

    pub(crate) async fn connect(&mut self) -> Result<()> {
        self.socket = None;
        let bind_addr = if self.socket_addr.is_ipv4() {
            SocketAddr::from((std::net::Ipv4Addr::UNSPECIFIED, 0))
        } else {
            SocketAddr::from((std::net::Ipv6Addr::UNSPECIFIED, 0))
        };
        let socket = UdpSocket::bind(bind_addr).await?;
        socket.connect(self.socket_addr).await?;
        self.socket = Some(socket);
        Ok(())
    }

    pub(crate) async fn call(&mut self, req: Request<'_>) -> Result<Response> {
        log::debug!("Call {req:?}");
        let response_timeout = self.response_timeout;
        let req_adu = self.next_request_adu(req);
        let req_hdr = req_adu.hdr;

        let Some(socket) = &self.socket else {
            return Err(Error::NotConnected);
        };

        let mut request_data = BytesMut::new();
        codec::tcp::ClientCodec::default().encode(req_adu, &mut request_data)?;

        let exchange = async {
            socket.send(&request_data).await?;
            let mut datagram = [0; MAX_DATAGRAM_SIZE];
            loop {
                let len = socket.recv(&mut datagram).await?;
                let mut buf = BytesMut::from(&datagram[..len]);
                let res_adu = match codec::tcp::ClientCodec::default().decode(&mut buf) {
                    Ok(Some(res_adu)) => res_adu,
                    Ok(None) => {
                        log::debug!("Ignoring truncated datagram");
                        continue;
                    }
                    Err(err) => {
                        log::warn!("Ignoring malformed datagram: {err}");
                        continue;
                    }
                };
                // Datagrams with a foreign transaction id belong to an
                // earlier, timed-out exchange and are dropped.
                if res_adu.hdr != req_hdr {
                    log::debug!(
                        "Ignoring datagram with unexpected header: {:?}",
                        res_adu.hdr
                    );
                    continue;
                }
                return Ok(res_adu);
            }
        };
        let res_adu = with_timeout(response_timeout, exchange).await?;

        match res_adu.pdu {
            ResponsePdu(Ok(res)) => Ok(res),
            ResponsePdu(Err(exc_rsp)) => Err(Error::Exception(exc_rsp)),
        }
    }

    /// Send a broadcast request. No response is expected and no read
    /// is attempted.
    pub(crate) async fn broadcast(&mut self, req: Request<'_>) -> Result<()> {
        log::debug!("Broadcast {req:?}");
        let req_adu = self.next_request_adu(req);
        let Some(socket) = &self.socket else {
            return Err(Error::NotConnected);
        };
        let mut request_data = BytesMut::new();
        codec::tcp::ClientCodec::default().encode(req_adu, &mut request_data)?;
        socket.send(&request_data).await?;
        Ok(())
    }
}

impl SlaveContext for Client {
    fn set_slave(&mut self, slave: Slave) {
        self.unit_id = slave.into();
    }
}

#[async_trait::async_trait]
impl crate::client::Client for Client {
    async fn call(&mut self, req: Request<'_>) -> Result<Response> {
        Client::call(self, req).await
    }

    async fn broadcast(&mut self, req: Request<'_>) -> Result<()> {
        Client::broadcast(self, req).await
    }

    async fn connect(&mut self) -> Result<()> {
        Client::connect(self).await
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.socket = None;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.socket.is_some()
    }

    fn set_response_timeout(&mut self, timeout: Option<Duration>) {
        Client::set_response_timeout(self, timeout);
    }

    fn transport_type(&self) -> TransportType {
        TransportType::Udp
    }
}
