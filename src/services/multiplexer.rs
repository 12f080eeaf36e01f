//! Single dispatch loop over the listening socket and every open connection.
//!
//! One readiness wait (`poll_fn`) polls the listener and each framed
//! connection in slot order. Each wake yields at most one event per socket;
//! the events are then handled in that order, one complete
//! receive-process-reply cycle per ready connection.
//!
//! Replies are encoded into the connection's write buffer and flushed from
//! the readiness wait, never awaited. A peer that stops reading only stalls
//! itself: once its buffer passes `WRITE_BACKPRESSURE` its requests are left
//! unread until the buffer drains.

use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use std::future::{poll_fn, Future};
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::time::{sleep, Sleep};
use tokio_util::codec::{Encoder, Framed};

use super::processor::RequestProcessor;
use crate::modbus::constants::MAX_ADU_SIZE;
use crate::modbus::{MbapCodec, RequestFrame, ResponseFrame};
use crate::utils::error::ServerError;

/// Pending reply bytes above which a connection is not read from
const WRITE_BACKPRESSURE: usize = 16 * MAX_ADU_SIZE;

/// Pause before accepting again after a listener-side failure (EMFILE, ENFILE, ...)
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

struct Connection {
    framed: Framed<TcpStream, MbapCodec>,
    peer: SocketAddr,
    connected_at: DateTime<Utc>,
    requests: u64,
}

impl Connection {
    fn poll_flush(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), ServerError>> {
        SinkExt::<ResponseFrame>::poll_flush_unpin(&mut self.framed, cx)
    }

    fn is_backlogged(&self) -> bool {
        self.framed.write_buffer().len() > WRITE_BACKPRESSURE
    }
}

enum Readiness {
    Accepted(TcpStream, SocketAddr),
    AcceptFailed(io::Error),
    Request(usize, RequestFrame),
    Failed(usize, ServerError),
    Closed(usize),
}

pub struct ConnectionMultiplexer {
    listener: TcpListener,
    processor: RequestProcessor,
    /// Slot index plays the role of the descriptor; trailing empty slots
    /// are trimmed so `slots.len()` is always highest occupied slot + 1
    slots: Vec<Option<Connection>>,
    accept_backoff: Option<Pin<Box<Sleep>>>,
}

impl ConnectionMultiplexer {
    /// Bind the listening socket. Must be called inside a tokio runtime.
    pub fn bind(
        addr: SocketAddr,
        backlog: u32,
        processor: RequestProcessor,
    ) -> Result<Self, ServerError> {
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()
        } else {
            TcpSocket::new_v6()
        }
        .map_err(|e| ServerError::ListenerError(format!("socket: {}", e)))?;

        socket
            .set_reuseaddr(true)
            .map_err(|e| ServerError::ListenerError(format!("SO_REUSEADDR: {}", e)))?;
        socket
            .bind(addr)
            .map_err(|e| ServerError::ListenerError(format!("bind {}: {}", addr, e)))?;
        let listener = socket
            .listen(backlog)
            .map_err(|e| ServerError::ListenerError(format!("listen on {}: {}", addr, e)))?;

        info!(
            "🔌 Modbus TCP server listening on {} (backlog {})",
            listener.local_addr()?,
            backlog
        );

        Ok(Self {
            listener,
            processor,
            slots: Vec::new(),
            accept_backoff: None,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn connection_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn highest_slot(&self) -> Option<usize> {
        self.slots.len().checked_sub(1)
    }

    /// Serve forever. Accept failures are logged and retried, per-connection
    /// errors only close the affected connection; the readiness wait itself
    /// has no failure path under the tokio reactor.
    pub async fn run(&mut self) -> Result<(), ServerError> {
        loop {
            let events = poll_fn(|cx| self.poll_ready(cx)).await;
            for event in events {
                self.dispatch(event).await;
            }
        }
    }

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Vec<Readiness>> {
        let mut events = Vec::new();

        if let Some(backoff) = self.accept_backoff.as_mut() {
            if backoff.as_mut().poll(cx).is_ready() {
                self.accept_backoff = None;
            }
        }
        if self.accept_backoff.is_none() {
            match self.listener.poll_accept(cx) {
                Poll::Ready(Ok((stream, peer))) => events.push(Readiness::Accepted(stream, peer)),
                Poll::Ready(Err(e)) => events.push(Readiness::AcceptFailed(e)),
                Poll::Pending => {}
            }
        }

        for (slot, entry) in self.slots.iter_mut().enumerate() {
            let Some(connection) = entry else {
                continue;
            };

            if let Poll::Ready(Err(e)) = connection.poll_flush(cx) {
                events.push(Readiness::Failed(slot, e));
                continue;
            }
            // flush above registered for writability; wait for the peer to drain
            if connection.is_backlogged() {
                continue;
            }

            match connection.framed.poll_next_unpin(cx) {
                Poll::Ready(Some(Ok(frame))) => events.push(Readiness::Request(slot, frame)),
                Poll::Ready(Some(Err(e))) => events.push(Readiness::Failed(slot, e)),
                Poll::Ready(None) => events.push(Readiness::Closed(slot)),
                Poll::Pending => {}
            }
        }

        if events.is_empty() {
            Poll::Pending
        } else {
            Poll::Ready(events)
        }
    }

    async fn dispatch(&mut self, event: Readiness) {
        match event {
            Readiness::Accepted(stream, peer) => self.register(stream, peer),
            Readiness::AcceptFailed(e) if is_transient_accept_error(&e) => {
                warn!("⚠️  Server accept() error: {}", e);
            }
            Readiness::AcceptFailed(e) => {
                warn!(
                    "⚠️  Server accept() error: {}, pausing accept for {:?}",
                    e, ACCEPT_BACKOFF
                );
                self.accept_backoff = Some(Box::pin(sleep(ACCEPT_BACKOFF)));
            }
            Readiness::Request(slot, frame) => self.serve(slot, frame).await,
            Readiness::Failed(slot, e) => {
                warn!("⚠️  Connection error on slot {}: {}", slot, e);
                self.close(slot);
            }
            Readiness::Closed(slot) => self.close(slot),
        }
    }

    fn register(&mut self, stream: TcpStream, peer: SocketAddr) {
        if let Err(e) = stream.set_nodelay(true) {
            debug!("TCP_NODELAY not set for {}: {}", peer, e);
        }

        let connection = Connection {
            framed: Framed::new(stream, MbapCodec),
            peer,
            connected_at: Utc::now(),
            requests: 0,
        };

        let slot = match self.slots.iter().position(Option::is_none) {
            Some(free) => {
                self.slots[free] = Some(connection);
                free
            }
            None => {
                self.slots.push(Some(connection));
                self.slots.len() - 1
            }
        };

        info!(
            "🔗 New connection from {} on slot {} ({} open)",
            peer,
            slot,
            self.connection_count()
        );
    }

    /// Queue the reply and make one non-blocking attempt to write it out
    async fn serve(&mut self, slot: usize, frame: RequestFrame) {
        let response = self.processor.process(&frame);

        let Some(connection) = self.slots.get_mut(slot).and_then(Option::as_mut) else {
            return;
        };
        connection.requests += 1;
        let peer = connection.peer;

        let queued = MbapCodec.encode(response, connection.framed.write_buffer_mut());
        let outcome = match queued {
            Ok(()) => match poll_fn(|cx| Poll::Ready(connection.poll_flush(cx))).await {
                Poll::Ready(Err(e)) => Err(e),
                _ => Ok(()),
            },
            Err(e) => Err(e),
        };

        if let Err(e) = outcome {
            warn!("⚠️  Reply to {} on slot {} failed: {}", peer, slot, e);
            self.close(slot);
        }
    }

    fn close(&mut self, slot: usize) {
        if let Some(connection) = self.slots.get_mut(slot).and_then(Option::take) {
            let session = Utc::now() - connection.connected_at;
            info!(
                "👋 Connection closed on slot {} ({}, {} requests in {}s)",
                slot,
                connection.peer,
                connection.requests,
                session.num_seconds()
            );
        }

        while matches!(self.slots.last(), Some(None)) {
            self.slots.pop();
        }
    }
}

/// Accept errors caused by the peer rather than by the listening socket
fn is_transient_accept_error(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registers::{BankSizes, RegisterMap};
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn multiplexer() -> ConnectionMultiplexer {
        let map = Arc::new(RegisterMap::new(BankSizes::new(10, 10, 10, 10)).unwrap());
        ConnectionMultiplexer::bind(
            "127.0.0.1:0".parse().unwrap(),
            8,
            RequestProcessor::new(map),
        )
        .unwrap()
    }

    async fn step(mux: &mut ConnectionMultiplexer) {
        let events = poll_fn(|cx| mux.poll_ready(cx)).await;
        for event in events {
            mux.dispatch(event).await;
        }
    }

    #[test]
    fn test_transient_accept_errors() {
        assert!(is_transient_accept_error(&io::Error::from(
            io::ErrorKind::ConnectionAborted
        )));
        assert!(!is_transient_accept_error(&io::Error::from(
            io::ErrorKind::PermissionDenied
        )));
    }

    #[tokio::test]
    async fn test_descriptor_exhaustion_pauses_accept_and_recovers() {
        let mut mux = multiplexer();
        let addr = mux.local_addr().unwrap();

        // EMFILE
        mux.dispatch(Readiness::AcceptFailed(io::Error::from_raw_os_error(24)))
            .await;
        assert!(mux.accept_backoff.is_some());

        let mut client = TcpStream::connect(addr).await.unwrap();
        step(&mut mux).await;
        assert!(mux.accept_backoff.is_none());
        assert_eq!(mux.connection_count(), 1);

        client
            .write_all(&[0x00, 0x05, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x00, 0x00, 0x00, 0x01])
            .await
            .unwrap();
        step(&mut mux).await;
        let mut reply = [0u8; 11];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(&reply[..2], &[0x00, 0x05]);
    }

    #[tokio::test]
    async fn test_transient_accept_error_keeps_accepting() {
        let mut mux = multiplexer();
        mux.dispatch(Readiness::AcceptFailed(io::Error::from(
            io::ErrorKind::ConnectionAborted,
        )))
        .await;
        assert!(mux.accept_backoff.is_none());
    }

    #[tokio::test]
    async fn test_slots_are_reused_and_highest_slot_shrinks() {
        let mut mux = multiplexer();
        let addr = mux.local_addr().unwrap();

        let a = TcpStream::connect(addr).await.unwrap();
        step(&mut mux).await;
        let b = TcpStream::connect(addr).await.unwrap();
        step(&mut mux).await;
        let c = TcpStream::connect(addr).await.unwrap();
        step(&mut mux).await;
        assert_eq!(mux.connection_count(), 3);
        assert_eq!(mux.highest_slot(), Some(2));

        // closing a middle slot keeps the high-water mark
        drop(b);
        step(&mut mux).await;
        assert_eq!(mux.connection_count(), 2);
        assert_eq!(mux.highest_slot(), Some(2));

        // the freed slot is handed out again
        let d = TcpStream::connect(addr).await.unwrap();
        step(&mut mux).await;
        assert_eq!(mux.highest_slot(), Some(2));
        assert_eq!(mux.connection_count(), 3);

        drop(c);
        step(&mut mux).await;
        assert_eq!(mux.highest_slot(), Some(1));

        drop(a);
        drop(d);
        while mux.connection_count() > 0 {
            step(&mut mux).await;
        }
        assert_eq!(mux.highest_slot(), None);
    }

    #[tokio::test]
    async fn test_one_request_per_connection_per_wake() {
        let mut mux = multiplexer();
        let addr = mux.local_addr().unwrap();

        let mut client = TcpStream::connect(addr).await.unwrap();
        step(&mut mux).await;

        // two pipelined reads in one write
        let request = [
            0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x00, 0x00, 0x00, 0x01, 0x00, 0x02,
            0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x00, 0x00, 0x00, 0x01,
        ];
        client.write_all(&request).await.unwrap();

        let mut reply = [0u8; 11];
        step(&mut mux).await;
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(&reply[..2], &[0x00, 0x01]);

        step(&mut mux).await;
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(&reply[..2], &[0x00, 0x02]);
    }
}
