// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! ASCII client driver for serial lines

use std::{fmt, io, time::Duration};

use futures_util::{sink::SinkExt as _, stream::StreamExt as _};
use tokio_serial::SerialStream;
use tokio_util::codec::Framed;

use crate::{
    client::{SerialConfig, TransportType},
    codec,
    error::{Error, Result},
    frame::{rtu::*, *},
    slave::*,
};

use super::with_timeout;

/// Modbus ASCII client driver
///
/// Frames are delimited by the `:` start marker and the CR LF trailer,
/// so no inter-frame timing is required. The port is forced to 7 data
/// bits by the connect functions.
pub(crate) struct Client {
    config: SerialConfig,
    framed: Option<Framed<SerialStream, codec::ascii::ClientCodec>>,
    slave_id: SlaveId,
    response_timeout: Option<Duration>,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.config)
            .field("slave_id", &self.slave_id)
            .field("connected", &self.framed.is_some())
            .finish_non_exhaustive()
    }
}

impl Client {
    pub(crate) fn new(config: SerialConfig, slave: Slave) -> Self {
        Self {
            config,
            framed: None,
            slave_id: slave.into(),
            response_timeout: None,
        }
    }

    pub(crate) fn set_response_timeout(&mut self, timeout: Option<Duration>) {
        self.response_timeout = timeout;
    }

    pub(crate) async fn connect(&mut self) -> Result<()> {
        self.framed = None;
        self.config.validate()?;
        let serial = SerialStream::open(&self.config.builder()).map_err(io::Error::from)?;
        self.framed = Some(Framed::new(serial, codec::ascii::ClientCodec::default()));
        Ok(())
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
            Err(err @ Error::Transport(_)) => {
                self.framed = None;
                return Err(err);
            }
            Err(err) => return Err(err),
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

    /// Send a broadcast request and return immediately.
    pub(crate) async fn broadcast(&mut self, req: Request<'_>) -> Result<()> {
        log::debug!("Broadcast {req:?}");
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
        Ok(())
    }
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
        TransportType::Ascii
    }
}
