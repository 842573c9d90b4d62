// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! RTU client driver for serial lines and RTU-over-TCP

use std::{fmt, net::SocketAddr, time::Duration};

use bytes::BytesMut;
use futures_util::{sink::SinkExt as _, stream::StreamExt as _};
use tokio::{io::AsyncWriteExt as _, net::TcpStream, time::Instant};
use tokio_serial::SerialStream;
use tokio_util::codec::{Encoder as _, Framed};

use crate::{
    client::{SerialConfig, TransportType},
    codec::rtu::{
        parse_response_frame, read_frame_by_silence, ClientCodec, SerialTiming,
    },
    error::{Error, Result},
    frame::{rtu::*, *},
    slave::*,
};

use super::with_timeout;

#[derive(Debug, Clone)]
pub(crate) enum Endpoint {
    Serial(SerialConfig),
    Tcp(SocketAddr),
}

/// The two wire attachments of this driver.
///
/// A serial line carries timing information, so frames are delimited
/// by the inter-frame silence. A TCP stream does not, so frames are
/// delimited by the expected length derived from their content.
enum Connection {
    Serial {
        port: SerialStream,
        timing: SerialTiming,
    },
    Tcp(Framed<TcpStream, ClientCodec>),
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Serial { timing, .. } => f.debug_struct("Serial").field("timing", timing).finish(),
            Self::Tcp(framed) => f.debug_tuple("Tcp").field(framed.get_ref()).finish(),
        }
    }
}

/// Modbus RTU client driver
///
/// Serial endpoints additionally enforce the 3.5-character turnaround
/// silence between consecutive exchanges. RTU-over-TCP has no timing:
/// correlation is one request at a time under `&mut self`.
pub(crate) struct Client {
    endpoint: Endpoint,
    connection: Option<Connection>,
    slave_id: SlaveId,
    response_timeout: Option<Duration>,
    connect_timeout: Option<Duration>,
    turnaround_delay: Option<Duration>,
    last_exchange: Option<Instant>,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("endpoint", &self.endpoint)
            .field("slave_id", &self.slave_id)
            .field("connected", &self.connection.is_some())
            .finish_non_exhaustive()
    }
}

impl Client {
    pub(crate) fn new(endpoint: Endpoint, slave: Slave) -> Self {
        Self {
            endpoint,
            connection: None,
            slave_id: slave.into(),
            response_timeout: None,
            connect_timeout: None,
            turnaround_delay: None,
            last_exchange: None,
        }
    }

    pub(crate) fn set_connect_timeout(&mut self, timeout: Option<Duration>) {
        self.connect_timeout = timeout;
    }

    pub(crate) fn set_response_timeout(&mut self, timeout: Option<Duration>) {
        self.response_timeout = timeout;
    }

    pub(crate) async fn connect(&mut self) -> Result<()> {
        self.connection = None;
        let connection = match &self.endpoint {
            Endpoint::Serial(config) => {
                config.validate()?;
                let port =
                    SerialStream::open(&config.builder()).map_err(std::io::Error::from)?;
                self.turnaround_delay = Some(config.inter_frame_delay());
                Connection::Serial {
                    port,
                    timing: config.frame_timing(),
                }
            }
            Endpoint::Tcp(socket_addr) => {
                let socket_addr = *socket_addr;
                let stream = with_timeout(self.connect_timeout, async {
                    TcpStream::connect(socket_addr).await.map_err(Error::from)
                })
                .await?;
                Connection::Tcp(Framed::new(stream, ClientCodec))
            }
        };
        self.connection = Some(connection);
        self.last_exchange = None;
        Ok(())
    }

    /// Respect the inter-frame silence before putting the next frame
    /// on a shared serial bus.
    async fn guard_turnaround(&mut self) {
        let Some(turnaround_delay) = self.turnaround_delay else {
            return;
        };
        if let Some(last_exchange) = self.last_exchange {
            let elapsed = last_exchange.elapsed();
            if elapsed < turnaround_delay {
                tokio::time::sleep(turnaround_delay - elapsed).await;
            }
        }
    }

    fn next_request_adu<'a, R>(&self, req: R) -> RequestAdu<'a>
    where
        R: Into<RequestPdu<'a>>,
    {
        RequestAdu {
            hdr: Header {
                slave_id: self.slave_id,
            },
            pdu: req.into(),
        }
    }

    pub(crate) async fn call(&mut self, req: Request<'_>) -> Result<Response> {
        log::debug!("Call {req:?}");
        self.guard_turnaround().await;
        let response_timeout = self.response_timeout;
        let req_adu = self.next_request_adu(req);
        let req_hdr = req_adu.hdr;

        let Some(connection) = &mut self.connection else {
            return Err(Error::NotConnected);
        };
        let result = match connection {
            Connection::Serial { port, timing } => {
                exchange_serial(port, *timing, req_adu, response_timeout).await
            }
            Connection::Tcp(framed) => exchange_stream(framed, req_adu, response_timeout).await,
        };
        self.last_exchange = Some(Instant::now());

        let res_adu = match result {
            Ok(res_adu) => res_adu,
            Err(err) => {
                if self.desynchronizes(&err) {
                    self.connection = None;
                }
                return Err(err);
            }
        };
        if req_hdr != res_adu.hdr {
            return Err(Error::HeaderMismatch {
                request: format!("{req_hdr:?}"),
                response: format!("{:?}", res_adu.hdr),
            });
        }
        match res_adu.pdu {
            ResponsePdu(Ok(res)) => Ok(res),
            ResponsePdu(Err(exc_rsp)) => Err(Error::Exception(exc_rsp)),
        }
    }

    /// Send a broadcast request and return immediately, no response is
    /// expected on the bus.
    pub(crate) async fn broadcast(&mut self, req: Request<'_>) -> Result<()> {
        log::debug!("Broadcast {req:?}");
        self.guard_turnaround().await;
        let response_timeout = self.response_timeout;
        let req_adu = self.next_request_adu(req);

        let Some(connection) = &mut self.connection else {
            return Err(Error::NotConnected);
        };
        let result = match connection {
            Connection::Serial { port, .. } => {
                let mut frame = BytesMut::new();
                ClientCodec.encode(req_adu, &mut frame)?;
                let deadline = response_timeout.map(|timeout| Instant::now() + timeout);
                write_serial_frame(port, &frame, deadline).await
            }
            Connection::Tcp(framed) => {
                framed.read_buffer_mut().clear();
                with_timeout(response_timeout, async { framed.send(req_adu).await }).await
            }
        };
        self.last_exchange = Some(Instant::now());
        if let Err(err) = result {
            if self.desynchronizes(&err) {
                self.connection = None;
            }
            return Err(err);
        }
        Ok(())
    }

    /// Whether an error leaves the attachment in a state that cannot
    /// be recovered without reconnecting. On a serial line a checksum
    /// error only spoils the current exchange; on a stream it also
    /// loses the frame boundary.
    fn desynchronizes(&self, err: &Error) -> bool {
        match err {
            Error::Transport(_) => true,
            Error::Frame(_) => matches!(self.endpoint, Endpoint::Tcp(_)),
            _ => false,
        }
    }

    fn transport_type(&self) -> TransportType {
        match self.endpoint {
            Endpoint::Serial(_) => TransportType::Rtu,
            Endpoint::Tcp(_) => TransportType::RtuOverTcp,
        }
    }
}

/// One request/response exchange over a serial line.
///
/// The frame boundary of the response is detected by timing: bytes are
/// accumulated with short per-read deadlines until the line has been
/// silent for 3.5 character times or the overall deadline is reached.
async fn exchange_serial(
    port: &mut SerialStream,
    timing: SerialTiming,
    req_adu: RequestAdu<'_>,
    response_timeout: Option<Duration>,
) -> Result<ResponseAdu> {
    let mut frame = BytesMut::new();
    ClientCodec.encode(req_adu, &mut frame)?;

    // One deadline bounds the write and the read.
    let deadline = response_timeout.map(|timeout| Instant::now() + timeout);
    write_serial_frame(port, &frame, deadline).await?;
    let response = read_frame_by_silence(port, timing, deadline).await?;
    parse_response_frame(&response)
}

async fn write_serial_frame(
    port: &mut SerialStream,
    frame: &[u8],
    deadline: Option<Instant>,
) -> Result<()> {
    let write = async {
        port.write_all(frame).await?;
        port.flush().await.map_err(Error::from)
    };
    match deadline {
        Some(deadline) => tokio::time::timeout_at(deadline, write)
            .await
            .map_err(|_elapsed| Error::Timeout)?,
        None => write.await,
    }
}

/// One request/response exchange over a framed TCP stream.
async fn exchange_stream(
    framed: &mut Framed<TcpStream, ClientCodec>,
    req_adu: RequestAdu<'_>,
    response_timeout: Option<Duration>,
) -> Result<ResponseAdu> {
    framed.read_buffer_mut().clear();
    with_timeout(response_timeout, async {
        framed.send(req_adu).await?;
        framed.next().await.unwrap_or_else(|| {
            Err(Error::from(std::io::Error::from(
                std::io::ErrorKind::BrokenPipe,
            )))
        })
    })
    .await
}

impl SlaveContext for Client {
    fn set_slave(&mut self, slave: Slave) {
        self.slave_id = slave.into();
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
        self.connection = None;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    fn set_response_timeout(&mut self, timeout: Option<Duration>) {
        Client::set_response_timeout(self, timeout);
    }

    fn transport_type(&self) -> TransportType {
        Client::transport_type(self)
    }
}
