// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Modbus RTU-over-TCP server

use std::{future::Future, io, net::SocketAddr, time::Duration};

use futures_util::{sink::SinkExt as _, stream::StreamExt as _};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::{TcpListener, TcpStream},
    sync::watch,
    task::JoinSet,
};
use tokio_util::codec::Framed;

use crate::{
    codec,
    error::{Error, Result},
    frame::{rtu::*, *},
    server::{Service, Terminated},
};

/// Accept a plain TCP connection for RTU framing.
pub fn accept_tcp_connection<S, NewService>(
    stream: TcpStream,
    socket_addr: SocketAddr,
    new_service: NewService,
) -> io::Result<Option<(S, TcpStream)>>
where
    S: Service,
    NewService: Fn(SocketAddr) -> io::Result<Option<S>>,
{
    let service = new_service(socket_addr)?;
    Ok(service.map(|service| (service, stream)))
}

/// A Modbus server speaking RTU framing over TCP connections.
///
/// Frames carry no transaction id; correlation relies on the peers
/// exchanging one request at a time per connection.
#[derive(Debug)]
pub struct Server {
    listener: TcpListener,
    shutdown_timeout: Option<Duration>,
}

impl Server {
    /// Attach the server to a bound listener.
    #[must_use]
    pub fn new(listener: TcpListener) -> Self {
        Self {
            listener,
            shutdown_timeout: None,
        }
    }

    /// Bound the graceful shutdown of `serve_until`.
    #[must_use]
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = Some(timeout);
        self
    }

    /// The local address the server is listening on.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until an accept error occurs.
    pub async fn serve<S, T, F, OnConnected, OnProcessError>(
        &self,
        on_connected: &OnConnected,
        on_process_error: OnProcessError,
    ) -> Result<()>
    where
        S: Service + Send + Sync + 'static,
        T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
        F: Future<Output = io::Result<Option<(S, T)>>>,
        OnConnected: Fn(TcpStream, SocketAddr) -> F,
        OnProcessError: FnOnce(Error) + Clone + Send + 'static,
    {
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        loop {
            let (stream, socket_addr) = self.listener.accept().await?;
            log::debug!("Accepted connection from {socket_addr}");
            let Some((service, transport)) = on_connected(stream, socket_addr).await? else {
                continue;
            };
            let framed = Framed::new(transport, codec::rtu::ServerCodec::default());
            let shutdown_rx = shutdown_rx.clone();
            let on_process_error = on_process_error.clone();
            tokio::spawn(async move {
                if let Err(err) = process(framed, service, shutdown_rx).await {
                    on_process_error(err);
                }
            });
        }
    }

    /// Accept connections until the abort signal fires, then shut down
    /// gracefully.
    pub async fn serve_until<S, T, F, OnConnected, OnProcessError, A>(
        self,
        on_connected: &OnConnected,
        on_process_error: OnProcessError,
        abort_signal: A,
    ) -> Result<Terminated>
    where
        S: Service + Send + Sync + 'static,
        T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
        F: Future<Output = io::Result<Option<(S, T)>>>,
        OnConnected: Fn(TcpStream, SocketAddr) -> F,
        OnProcessError: FnOnce(Error) + Clone + Send + 'static,
        A: Future<Output = ()> + Send + Unpin,
    {
        let Self {
            listener,
            shutdown_timeout,
        } = self;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut connections = JoinSet::new();
        let mut abort_signal = abort_signal;

        loop {
            tokio::select! {
                () = &mut abort_signal => {
                    log::trace!("Abort signal received");
                    break;
                }
                accepted = listener.accept() => {
                    let (stream, socket_addr) = accepted?;
                    let Some((service, transport)) = on_connected(stream, socket_addr).await?
                    else {
                        continue;
                    };
                    let framed = Framed::new(transport, codec::rtu::ServerCodec::default());
                    let shutdown_rx = shutdown_rx.clone();
                    let on_process_error = on_process_error.clone();
                    connections.spawn(async move {
                        if let Err(err) = process(framed, service, shutdown_rx).await {
                            on_process_error(err);
                        }
                    });
                }
            }
        }

        drop(listener);
        drop(shutdown_tx);

        match shutdown_timeout {
            Some(deadline) => {
                let drained = tokio::time::timeout(deadline, async {
                    while connections.join_next().await.is_some() {}
                })
                .await;
                if drained.is_err() {
                    log::warn!("Graceful shutdown timed out, aborting connection tasks");
                    connections.abort_all();
                    while connections.join_next().await.is_some() {}
                    return Err(Error::ShutdownTimedOut);
                }
            }
            None => {
                while connections.join_next().await.is_some() {}
            }
        }
        Ok(Terminated::Aborted)
    }
}

async fn process<S, T>(
    mut framed: Framed<T, codec::rtu::ServerCodec>,
    service: S,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()>
where
    S: Service,
    T: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        let request = tokio::select! {
            _ = shutdown.changed() => break,
            request = framed.next() => request,
        };
        let Some(request) = request else {
            break;
        };
        let ServerRequestAdu { hdr, pdu } = request?;
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
            framed.send(ResponseAdu { hdr, pdu }).await?;
        }
    }
    Ok(())
}
