//! Frame-level CAN-FD transport.
//!
//! [`CanLink`] wraps one raw SocketCAN endpoint bound to a named interface
//! with FD frames enabled and the socket in non-blocking mode. Everything
//! above this layer works on [`WireFrame`]s: a 29-bit extended ID, up to 64
//! payload bytes, and the kernel receive timestamp in microseconds.
//!
//! Timestamps come from the `SIOCGSTAMP` ioctl right after each read, the
//! same way the kernel hands them to candump. Transmission never blocks; a
//! full transmit queue surfaces as `WouldBlock` and the caller retries on
//! the next event-loop turn.

use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::time::{SystemTime, UNIX_EPOCH};

use arrayvec::ArrayVec;
use embedded_can::{ExtendedId, Id};
use socketcan::{CanAnyFrame, CanFdFrame, CanFdSocket, EmbeddedFrame, Socket};

mod bitfields;

// Exports
pub use bitfields::{CanMessageId, CanServiceId, TailByte};

/// CAN-FD maximum payload per frame.
pub const MTU: usize = 64;

/// One extended CAN-FD frame as seen on the wire.
#[derive(Clone, Debug)]
pub struct WireFrame {
    /// Kernel receive time, microseconds since the epoch. Zero on outgoing
    /// frames.
    pub timestamp_us: u64,
    pub id: ExtendedId,
    pub payload: ArrayVec<u8, MTU>,
}

impl WireFrame {
    pub fn new(timestamp_us: u64, id: u32, data: &[u8]) -> Self {
        Self {
            timestamp_us,
            id: extended_id(id),
            payload: ArrayVec::from_iter(data.iter().copied()),
        }
    }
}

/// Masks a raw ID down to 29 bits and wraps it.
pub(crate) fn extended_id(raw: u32) -> ExtendedId {
    ExtendedId::new(raw & ExtendedId::MAX.as_raw()).unwrap_or(ExtendedId::ZERO)
}

// get timestamp from ioctl in a struct timeval (us accuracy)
const SIOCGSTAMP: libc::c_ulong = 0x8906;

/// Raw CAN-FD endpoint on a named network interface.
pub struct CanLink {
    socket: CanFdSocket,
}

impl CanLink {
    /// Opens the interface, enables FD frames and switches to non-blocking
    /// mode.
    pub fn open(interface: &str) -> io::Result<Self> {
        let socket = CanFdSocket::open(interface)?;
        socket.set_nonblocking(true)?;
        Ok(Self { socket })
    }

    /// Non-blocking send. `WouldBlock` means the kernel queue is full and the
    /// frame should be retried later.
    pub fn send(&self, frame: &WireFrame) -> io::Result<()> {
        let fd_frame = CanFdFrame::new(Id::Extended(frame.id), &frame.payload)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "bad frame length"))?;
        self.socket.write_frame(&CanAnyFrame::Fd(fd_frame))
    }

    /// Non-blocking receive of the next data frame, timestamped with the
    /// kernel receive time. `Ok(None)` means the socket is drained.
    ///
    /// Remote and error frames, and frames without an extended ID, are
    /// skipped; Cyphal uses neither.
    pub fn recv(&self) -> io::Result<Option<WireFrame>> {
        loop {
            match self.socket.read_frame() {
                Ok(frame) => {
                    let (id, data) = match &frame {
                        CanAnyFrame::Fd(f) => (f.id(), f.data()),
                        CanAnyFrame::Normal(f) => (f.id(), f.data()),
                        CanAnyFrame::Remote(_) | CanAnyFrame::Error(_) => continue,
                    };
                    let Id::Extended(id) = id else { continue };

                    let mut payload = ArrayVec::new();
                    payload
                        .try_extend_from_slice(data)
                        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "oversize frame"))?;

                    return Ok(Some(WireFrame {
                        timestamp_us: self.kernel_timestamp(),
                        id,
                        payload,
                    }));
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
                Err(e) => return Err(e),
            }
        }
    }

    fn kernel_timestamp(&self) -> u64 {
        let mut tv = libc::timeval {
            tv_sec: 0,
            tv_usec: 0,
        };
        let r = unsafe { libc::ioctl(self.socket.as_raw_fd(), SIOCGSTAMP, &mut tv) };
        if r == 0 {
            tv.tv_sec as u64 * 1_000_000 + tv.tv_usec as u64
        } else {
            // Kernel would not tell; fall back to the wall clock so session
            // staleness ordering still works.
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_micros() as u64)
                .unwrap_or(0)
        }
    }
}

impl AsRawFd for CanLink {
    fn as_raw_fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }
}
