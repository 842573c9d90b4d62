// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! MBAP client driver for TCP, optionally wrapped in TLS

use std::{
    fmt, io,
    net::SocketAddr,
    pin::Pin,
    sync::atomic::{AtomicU16, Ordering},
    task::{Context as TaskContext, Poll},
    time::{Duration, Instant},
};

use futures_util::{sink::SinkExt as _, stream::StreamExt as _};
use tokio::{
    io::{AsyncRead, AsyncWrite, ReadBuf},
    net::TcpStream,
};
use tokio_util::codec::Framed;

use crate::{
    client::TransportType,
    codec,
    error::{Error, Result},
    frame::{tcp::*, *},
    slave::*,
};

use super::with_timeout;

const INITIAL_TRANSACTION_ID: TransactionId = 0;

/// TLS parameters of a client connection.
#[cfg(feature = "tls")]
pub(crate) struct TlsSetup {
    pub(crate) connector: tokio_rustls::TlsConnector,
    pub(crate) server_name: pki_types::ServerName<'static>,
}

enum Transport {
    Plain(TcpStream),
    #[cfg(feature = "tls")]
    Tls(Box<tokio_rustls::client::TlsStream<TcpStream>>),
}

impl AsyncRead for Transport {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            #[cfg(feature = "tls")]
            Self::Tls(stream) => Pin::new(stream.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Transport {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            #[cfg(feature = "tls")]
            Self::Tls(stream) => Pin::new(stream.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_flush(cx),
            #[cfg(feature = "tls")]
            Self::Tls(stream) => Pin::new(stream.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            #[cfg(feature = "tls")]
            Self::Tls(stream) => Pin::new(stream.as_mut()).poll_shutdown(cx),
        }
    }
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Plain(stream) => f.debug_tuple("Plain").field(stream).finish(),
            #[cfg(feature = "tls")]
            Self::Tls(_) => f.debug_tuple("Tls").finish(),
        }
    }
}

/// Modbus TCP client driver
///
/// Owns exactly one logical connection. The full request/response
/// exchange runs under `&mut self`, so concurrent callers serialize
/// naturally and transaction ids cannot interleave.
pub(crate) struct Client {
    socket_addr: SocketAddr,
    #[cfg(feature = "tls")]
    tls: Option<TlsSetup>,
    framed: Option<Framed<Transport, codec::tcp::ClientCodec>>,
    unit_id: UnitId,
    transaction_id: AtomicU16,
    response_timeout: Option<Duration>,
    connect_timeout: Option<Duration>,
    idle_timeout: Option<Duration>,
    last_activity: Instant,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("socket_addr", &self.socket_addr)
            .field("unit_id", &self.unit_id)
            .field("connected", &self.framed.is_some())
            .finish_non_exhaustive()
    }
}

impl Client {
    pub(crate) fn new(socket_addr: SocketAddr, slave: Slave) -> Self {
        Self {
            socket_addr,
            #[cfg(feature = "tls")]
            tls: None,
            framed: None,
            unit_id: slave.into(),
            transaction_id: AtomicU16::new(INITIAL_TRANSACTION_ID),
            response_timeout: None,
            connect_timeout: None,
            idle_timeout: None,
            last_activity: Instant::now(),
        }
    }

    #[cfg(feature = "tls")]
    pub(crate) fn set_tls(&mut self, tls: TlsSetup) {
        self.tls = Some(tls);
    }

    pub(crate) fn set_connect_timeout(&mut self, timeout: Option<Duration>) {
        self.connect_timeout = timeout;
    }

    pub(crate) fn set_idle_timeout(&mut self, timeout: Option<Duration>) {
        self.idle_timeout = timeout;
    }

    pub(crate) fn set_response_timeout(&mut self, timeout: Option<Duration>) {
        self.response_timeout = timeout;
    }

    /// Allocate the next transaction id, skipping the reserved `0`.
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
        self.framed = None;
        let socket_addr = self.socket_addr;
        let stream = with_timeout(self.connect_timeout, async {
            TcpStream::connect(socket_addr).await.map_err(Error::from)
        })
        .await?;
        let transport = self.wrap_stream(stream).await?;
        self.framed = Some(Framed::new(transport, codec::tcp::ClientCodec::default()));
        self.last_activity = Instant::now();
        Ok(())
    }

    #[cfg(feature = "tls")]
    async fn wrap_stream(&self, stream: TcpStream) -> Result<Transport> {
        let Some(tls) = &self.tls else {
            return Ok(Transport::Plain(stream));
        };
        let connect = tls.connector.connect(tls.server_name.clone(), stream);
        let tls_stream = with_timeout(self.connect_timeout, async {
            connect.await.map_err(Error::from)
        })
        .await?;
        Ok(Transport::Tls(Box::new(tls_stream)))
    }

    #[cfg(not(feature = "tls"))]
    #[allow(clippy::unused_async)]
    async fn wrap_stream(&self, stream: TcpStream) -> Result<Transport> {
        Ok(Transport::Plain(stream))
    }

    /// An expired idle timeout transparently reconnects before the
    /// next exchange.
    async fn reconnect_if_idle(&mut self) -> Result<()> {
        let Some(idle_timeout) = self.idle_timeout else {
            return Ok(());
        };
        if self.framed.is_some() && self.last_activity.elapsed() > idle_timeout {
            log::debug!("Connection idle for {idle_timeout:?}, reconnecting");
            self.connect().await?;
        }
        Ok(())
    }

    fn disconnect_on_mismatch(&mut self, err: Error) -> Error {
        // The connection is desynchronized, trying to resync is
        // hopeless.
        self.framed = None;
        err
    }

    pub(crate) async fn call(&mut self, req: Request<'_>) -> Result<Response> {
        log::debug!("Call {req:?}");
        self.reconnect_if_idle().await?;
        let response_timeout = self.response_timeout;
        let req_adu = self.next_request_adu(req);
        let req_hdr = req_adu.hdr;

        let Some(framed) = &mut self.framed else {
            return Err(Error::NotConnected);
        };
        framed.read_buffer_mut().clear();

        let exchange = async {
            framed.send(req_adu).await?;
            framed
                .next()
                .await
                .unwrap_or_else(|| Err(Error::from(io::Error::from(io::ErrorKind::BrokenPipe))))
        };
        let res_adu = match with_timeout(response_timeout, exchange).await {
            Ok(res_adu) => res_adu,
            Err(err @ (Error::Frame(_) | Error::Transport(_))) => {
                return Err(self.disconnect_on_mismatch(err));
            }
            Err(err) => return Err(err),
        };
        self.last_activity = Instant::now();

        if let Err(err) = verify_response_header(req_hdr, res_adu.hdr) {
            return Err(self.disconnect_on_mismatch(err));
        }
        match res_adu.pdu {
            ResponsePdu(Ok(res)) => Ok(res),
            ResponsePdu(Err(exc_rsp)) => Err(Error::Exception(exc_rsp)),
        }
    }

    /// Send a broadcast request and discard whatever arrives in return.
    ///
    /// On TCP a read cannot be avoided, so any speculative response and
    /// every read error including the inevitable timeout is swallowed.
    pub(crate) async fn broadcast(&mut self, req: Request<'_>) -> Result<()> {
        log::debug!("Broadcast {req:?}");
        self.reconnect_if_idle().await?;
        let response_timeout = self.response_timeout;
        let req_adu = self.next_request_adu(req);

        let Some(framed) = &mut self.framed else {
            return Err(Error::NotConnected);
        };
        framed.read_buffer_mut().clear();

        with_timeout(response_timeout, async {
            framed.send(req_adu).await
        })
        .await?;

        let discard = with_timeout(response_timeout, async {
            framed
                .next()
                .await
                .unwrap_or_else(|| Err(Error::from(io::Error::from(io::ErrorKind::BrokenPipe))))
        })
        .await;
        if let Err(err) = discard {
            log::debug!("Ignoring broadcast read outcome: {err}");
        }
        self.last_activity = Instant::now();
        Ok(())
    }
}

fn verify_response_header(req_hdr: Header, rsp_hdr: Header) -> Result<()> {
    if req_hdr != rsp_hdr {
        return Err(Error::HeaderMismatch {
            request: format!("{req_hdr:?}"),
            response: format!("{rsp_hdr:?}"),
        });
    }
    Ok(())
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
        self.framed = None;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.framed.is_some()
    }

    fn set_response_timeout(&mut self, timeout: Option<Duration>) {
        Client::set_response_timeout(self, timeout);
    }

    fn transport_type(&self) -> TransportType {
        #[cfg(feature = "tls")]
        if self.tls.is_some() {
            return TransportType::Tls;
        }
        TransportType::Tcp
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transaction_id_skips_zero_on_wrap() {
        let client = Client::new("127.0.0.1:502".parse().unwrap(), Slave::TCP_DEVICE);
        assert_eq!(client.next_transaction_id(), 1);
        assert_eq!(client.next_transaction_id(), 2);
        client.transaction_id.store(0xFFFF, Ordering::Relaxed);
        assert_eq!(client.next_transaction_id(), 1);
    }

    #[test]
    fn header_verification() {
        let hdr = Header {
            transaction_id: 7,
            unit_id: 1,
        };
        assert!(verify_response_header(hdr, hdr).is_ok());
        let other = Header {
            transaction_id: 8,
            unit_id: 1,
        };
        assert!(matches!(
            verify_response_header(hdr, other),
            Err(Error::HeaderMismatch { .. })
        ));
        let other = Header {
            transaction_id: 7,
            unit_id: 2,
        };
        assert!(verify_response_header(hdr, other).is_err());
    }
}
