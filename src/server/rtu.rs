// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Modbus RTU server for serial lines

use std::{future::Future, io};

use bytes::BytesMut;
use tokio::io::AsyncWriteExt as _;
use tokio_serial::SerialStream;
use tokio_util::codec::Encoder as _;

use crate::{
    client::SerialConfig,
    codec::rtu::{parse_request_frame, read_frame_by_silence, SerialTiming, ServerCodec},
    error::Result,
    frame::{rtu::*, *},
    server::{Service, Terminated},
};

/// A Modbus RTU server bound to one serial line.
///
/// Inbound frames are delimited by the 3.5-character inter-frame
/// silence, exactly like a field device would see them.
#[derive(Debug)]
pub struct Server {
    port: SerialStream,
    timing: SerialTiming,
}

impl Server {
    /// Attach the server to a pre-configured serial stream.
    ///
    /// The configuration only supplies the timing parameters, the
    /// stream is used as-is.
    #[must_use]
    pub fn new(port: SerialStream, config: &SerialConfig) -> Self {
        Self {
            port,
            timing: config.frame_timing(),
        }
    }

    /// Open the serial line described by `config` and attach to it.
    pub fn new_from_config(config: &SerialConfig) -> Result<Self> {
        config.validate()?;
        let port = SerialStream::open(&config.builder()).map_err(io::Error::from)?;
        Ok(Self {
            port,
            timing: config.frame_timing(),
        })
    }

    /// Serve requests until the serial stream ends.
    pub async fn serve_forever<S>(self, service: S) -> Result<Terminated>
    where
        S: Service,
    {
        process(self.port, self.timing, service).await?;
        Ok(Terminated::Finished)
    }

    /// Serve requests until the serial stream ends or the abort signal
    /// fires.
    pub async fn serve_until<S, A>(self, service: S, abort_signal: A) -> Result<Terminated>
    where
        S: Service,
        A: Future<Output = ()> + Send + Unpin,
    {
        tokio::select! {
            res = process(self.port, self.timing, service) => {
                res?;
                Ok(Terminated::Finished)
            }
            () = abort_signal => {
                log::trace!("Abort signal received");
                Ok(Terminated::Aborted)
            }
        }
    }
}

async fn process<S>(mut port: SerialStream, timing: SerialTiming, service: S) -> Result<()>
where
    S: Service,
{
    loop {
        // A request may arrive at any time: no deadline on the first
        // byte, the end of the frame is marked by bus silence.
        let frame = match read_frame_by_silence(&mut port, timing, None).await {
            Ok(frame) => frame,
            Err(crate::error::Error::Transport(err))
                if err.kind() == io::ErrorKind::UnexpectedEof =>
            {
                // Stream exhausted.
                return Ok(());
            }
            Err(crate::error::Error::Transport(err)) => return Err(err.into()),
            Err(err) => {
                log::warn!("Discarding oversized frame: {err}");
                continue;
            }
        };
        let ServerRequestAdu { hdr, pdu } = match parse_request_frame(&frame) {
            Ok(adu) => adu,
            Err(err) => {
                // Noise on the bus must not stop the server.
                log::warn!("Discarding unreadable frame: {err}");
                continue;
            }
        };
        let is_broadcast = hdr.slave_id == 0;

        let response_pdu = match pdu {
            Err(exc_rsp) => (!is_broadcast).then_some(ResponsePdu(Err(exc_rsp))),
            Ok(request_pdu) => {
                let slave_request = SlaveRequest {
                    slave: hdr.slave_id,
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
            let mut response_frame = BytesMut::new();
            ServerCodec.encode(ResponseAdu { hdr, pdu }, &mut response_frame)?;
            port.write_all(&response_frame).await?;
            port.flush().await?;
        }
    }
}
