//! The event loop: one readiness primitive over the CAN socket and the
//! deadline queue.
//!
//! [`Engine`] owns the socket, the poll instance and a [`Client`]. A turn of
//! the loop is: [`Engine::wait_for_event`] to sleep until the socket is
//! readable or the earliest deadline arrives, then [`Engine::tick`] to drain
//! frames, fire due timers and flush the transmit queue. `tick` never
//! blocks.
//!
//! Asynchronous requests are dispatched on the client
//! ([`Engine::client_mut`]) and hit the wire on the next [`Engine::flush`]
//! or `tick`; the blocking wrappers flush immediately. Send-side I/O errors
//! are logged and otherwise deferred to the request timeout, per the error
//! policy of the crate.

use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::time::Instant;

use log::warn;
use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token};

use crate::client::Client;
use crate::error::{Error, Result};
use crate::transport::CanLink;
use crate::types::NodeId;

const CAN_SOCKET: Token = Token(0);

/// Engine construction parameters.
#[derive(Clone, Debug)]
pub struct Config {
    /// CAN network interface name, e.g. `can0`.
    pub interface: String,
    /// Local node identity, held for the life of the process. Gateways that
    /// strap their identity onto GPIO lines can pack the sampled levels with
    /// [`crate::node_id_from_gpio_lines`].
    pub node_id: NodeId,
}

impl Config {
    pub fn new(interface: impl Into<String>, node_id: NodeId) -> Self {
        Self {
            interface: interface.into(),
            node_id,
        }
    }
}

/// Protocol client plus the I/O that drives it.
pub struct Engine {
    client: Client,
    link: CanLink,
    poll: Poll,
    events: Events,
    down: bool,
}

impl Engine {
    /// Opens the CAN interface and registers it with the readiness
    /// primitive.
    pub fn new(config: &Config) -> Result<Engine> {
        let client = Client::new(config.node_id)?;
        let link = CanLink::open(&config.interface)?;
        let poll = Poll::new()?;
        poll.registry().register(
            &mut SourceFd(&link.as_raw_fd()),
            CAN_SOCKET,
            Interest::READABLE,
        )?;
        Ok(Self {
            client,
            link,
            poll,
            events: Events::with_capacity(4),
            down: false,
        })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// The protocol client, for dispatching asynchronous requests.
    pub fn client_mut(&mut self) -> &mut Client {
        &mut self.client
    }

    /// Runs everything currently pending and returns without blocking:
    /// drains received frames in kernel order, fires every due deadline,
    /// then flushes the transmit queue.
    pub fn tick(&mut self) -> Result<()> {
        if self.down {
            return Ok(());
        }
        loop {
            match self.link.recv() {
                Ok(Some(frame)) => self.client.handle_frame(&frame),
                Ok(None) => break,
                Err(e) => {
                    warn!("CAN receive failed: {e}");
                    break;
                }
            }
        }
        self.client.expire_timers(Instant::now());
        self.flush();
        Ok(())
    }

    /// Blocks until the socket is readable or the earliest deadline has
    /// arrived. Handle the outcome with [`Engine::tick`].
    pub fn wait_for_event(&mut self) -> Result<()> {
        if self.down {
            return Ok(());
        }
        let timeout = self
            .client
            .next_deadline()
            .map(|deadline| deadline.saturating_duration_since(Instant::now()));
        loop {
            match self.poll.poll(&mut self.events, timeout) {
                Ok(()) => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::Io(e)),
            }
        }
    }

    /// Pushes queued frames at the socket. A full kernel buffer pauses the
    /// flush until the next turn; any other send failure abandons the
    /// current batch and leaves recovery to the request timeouts.
    pub fn flush(&mut self) {
        while let Some(frame) = self.client.take_frame() {
            match self.link.send(&frame) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    self.client.untake_frame(frame);
                    break;
                }
                Err(e) => {
                    warn!("CAN send failed, dropping batch: {e}");
                    self.client.drop_queued_frames();
                    break;
                }
            }
        }
    }

    /// Releases pending requests and timers without invoking their
    /// continuations and detaches the socket from the poll set. Idempotent.
    pub fn shutdown(&mut self) {
        if self.down {
            return;
        }
        self.down = true;
        if let Err(e) = self
            .poll
            .registry()
            .deregister(&mut SourceFd(&self.link.as_raw_fd()))
        {
            warn!("poll deregister failed: {e}");
        }
        self.client.reset();
    }
}

/// The readiness primitive's own descriptor, for embedding the engine in an
/// external event loop. Readiness on it means a [`Engine::tick`] is due.
impl AsRawFd for Engine {
    fn as_raw_fd(&self) -> RawFd {
        self.poll.as_raw_fd()
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shutdown();
    }
}
