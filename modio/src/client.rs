//! The protocol client: dispatch, request tracking and the service API.
//!
//! [`Client`] is the sans-io core. Frames go in through
//! [`Client::handle_frame`], due deadlines are driven through
//! [`Client::expire_timers`], and outgoing frames accumulate on an internal
//! queue for whoever owns the socket to flush. Nothing in here blocks or
//! touches an fd, which is why every scenario down to timeout ordering can
//! be tested by injecting frames and instants.
//!
//! Continuations receive `&mut Client` so they can chain follow-up requests;
//! records are always detached from the tracker before their continuation
//! runs, so a continuation observes the client with its own request already
//! resolved and can never run twice.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use log::debug;

use crate::error::{Error, Result};
use crate::heartbeat::{HeartbeatTracker, NodeStatus};
use crate::register::{self, RegisterValue};
use crate::services::{self, CommandStatus, NodeInfo};
use crate::timer::TimerQueue;
use crate::tracker::{Continuation, Fingerprint, Tracker};
use crate::transfer::{Reassembler, Transfer, TransferKind, TransferMetadata, rx, tx};
use crate::transport::WireFrame;
use crate::types::{NODE_ID_MAX, NodeId, PortId, TransferId, TRANSFER_ID_MODULO};
use crate::{Priority, Subscription};

/// Default deadline for a request until overridden with
/// [`Client::set_timeout`].
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

/// Staleness bound for partially reassembled incoming transfers.
const RX_SESSION_TIMEOUT: Duration = Duration::from_secs(2);

type StatusCallback = Box<dyn FnMut(&mut Client, NodeId, &NodeStatus, &NodeStatus)>;

/// Sans-io Cyphal client engine.
pub struct Client {
    node_id: NodeId,
    timeout: Duration,
    transfer_ids: HashMap<(NodeId, PortId), TransferId>,
    reassembler: Reassembler,
    tx_queue: VecDeque<WireFrame>,
    timers: TimerQueue,
    tracker: Tracker<Client>,
    heartbeats: HeartbeatTracker,
    status_callback: Option<StatusCallback>,
}

impl Client {
    /// Creates a client holding the given local node identity and subscribes
    /// to the heartbeat subject and the four service responses.
    pub fn new(node_id: NodeId) -> Result<Self> {
        if node_id > NODE_ID_MAX {
            return Err(Error::InvalidArgument);
        }

        let mut reassembler = Reassembler::new();
        for (kind, port_id, extent) in [
            (
                TransferKind::Message,
                services::HEARTBEAT_PORT,
                services::HEARTBEAT_EXTENT,
            ),
            (
                TransferKind::Response,
                services::GET_INFO_PORT,
                services::GET_INFO_EXTENT,
            ),
            (
                TransferKind::Response,
                services::REGISTER_LIST_PORT,
                services::REGISTER_LIST_EXTENT,
            ),
            (
                TransferKind::Response,
                services::REGISTER_ACCESS_PORT,
                services::REGISTER_ACCESS_EXTENT,
            ),
            (
                TransferKind::Response,
                services::EXECUTE_COMMAND_PORT,
                services::EXECUTE_COMMAND_EXTENT,
            ),
        ] {
            reassembler.subscribe(Subscription::new(kind, port_id, extent, RX_SESSION_TIMEOUT));
        }

        Ok(Self {
            node_id,
            timeout: DEFAULT_REQUEST_TIMEOUT,
            transfer_ids: HashMap::new(),
            reassembler,
            tx_queue: VecDeque::new(),
            timers: TimerQueue::new(),
            tracker: Tracker::new(),
            heartbeats: HeartbeatTracker::new(),
            status_callback: None,
        })
    }

    /// The local node identity held for the life of the client.
    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// Changes the deadline applied to requests dispatched from now on.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Installs the status-change notification hook. Replaces any previous
    /// one.
    pub fn set_status_callback(
        &mut self,
        callback: impl FnMut(&mut Client, NodeId, &NodeStatus, &NodeStatus) + 'static,
    ) {
        self.status_callback = Some(Box::new(callback));
    }

    /// Last known status of a node; offline zeros until a heartbeat arrives.
    pub fn node_status(&self, node: NodeId) -> Option<NodeStatus> {
        self.heartbeats.status(node)
    }

    /// Number of requests awaiting a response or a deadline.
    pub fn pending_requests(&self) -> usize {
        self.tracker.len()
    }

    // ---- service API --------------------------------------------------

    /// Requests the identity structure of a node.
    pub fn get_node_info(
        &mut self,
        node: NodeId,
        callback: impl FnOnce(&mut Client, Result<NodeInfo>) + 'static,
    ) -> Result<()> {
        self.submit(
            node,
            services::GET_INFO_PORT,
            &[],
            Box::new(move |client, result| {
                callback(
                    client,
                    result.and_then(|payload| services::parse_node_info(&payload)),
                );
            }),
        )
    }

    /// Requests the register name at `index` of a node's namespace. An empty
    /// name in the result marks the end of the namespace.
    pub fn register_list(
        &mut self,
        node: NodeId,
        index: u16,
        callback: impl FnOnce(&mut Client, Result<String>) + 'static,
    ) -> Result<()> {
        let payload = services::encode_register_list_request(index);
        self.submit(
            node,
            services::REGISTER_LIST_PORT,
            &payload,
            Box::new(move |client, result| {
                callback(
                    client,
                    result.map(|payload| services::parse_register_list_response(&payload)),
                );
            }),
        )
    }

    /// Reads, or writes and reads back, a named register.
    ///
    /// `write` of `None` is a pure read. The continuation receives the
    /// node's view of the register after the access, or [`Error::NotFound`]
    /// if the node does not have it.
    pub fn register_access(
        &mut self,
        node: NodeId,
        name: &str,
        write: Option<&RegisterValue>,
        callback: impl FnOnce(&mut Client, Result<RegisterValue>) + 'static,
    ) -> Result<()> {
        let payload = register::encode_access_request(name, write)?;
        self.submit(
            node,
            services::REGISTER_ACCESS_PORT,
            &payload,
            Box::new(move |client, result| {
                callback(
                    client,
                    result.and_then(|payload| register::decode_access_response(&payload)),
                );
            }),
        )
    }

    /// Executes a command on a node. Standard command IDs live in
    /// [`crate::services::command`]; vendor IDs pass through untouched.
    pub fn execute_command(
        &mut self,
        node: NodeId,
        command_id: u16,
        parameter: &[u8],
        callback: impl FnOnce(&mut Client, Result<CommandStatus>) + 'static,
    ) -> Result<()> {
        let payload = services::encode_execute_command_request(command_id, parameter)?;
        self.submit(
            node,
            services::EXECUTE_COMMAND_PORT,
            &payload,
            Box::new(move |client, result| {
                callback(
                    client,
                    result.and_then(|payload| services::parse_execute_command_response(&payload)),
                );
            }),
        )
    }

    // ---- ingest and expiry --------------------------------------------

    /// Feeds one received frame through reassembly and dispatch.
    pub(crate) fn handle_frame(&mut self, frame: &WireFrame) {
        let view = match rx::parse_frame(frame, self.node_id) {
            Ok(Some(view)) => view,
            Ok(None) => return,
            Err(e) => {
                debug!("dropping frame {:08x}: {e:?}", frame.id.as_raw());
                return;
            }
        };
        match self.reassembler.accept(view) {
            Ok(Some(transfer)) => self.dispatch(transfer),
            Ok(None) => {}
            Err(e) => debug!("reassembly error on {:08x}: {e:?}", frame.id.as_raw()),
        }
    }

    fn dispatch(&mut self, transfer: Transfer) {
        match (transfer.metadata.port_id, transfer.metadata.transfer_kind) {
            (services::HEARTBEAT_PORT, TransferKind::Message) => {
                self.handle_heartbeat(&transfer);
            }
            (_, TransferKind::Response) => {
                let Some(fingerprint) = Fingerprint::of_response(&transfer.metadata) else {
                    return;
                };
                match self.tracker.remove(fingerprint, &mut self.timers) {
                    Some(continuation) => continuation(self, Ok(transfer.payload)),
                    // Late or spurious; its record is long gone.
                    None => debug!(
                        "unmatched response on port {} from node {:?}",
                        transfer.metadata.port_id, transfer.metadata.remote_node_id
                    ),
                }
            }
            _ => {}
        }
    }

    fn handle_heartbeat(&mut self, transfer: &Transfer) {
        let Some(node) = transfer.metadata.remote_node_id else {
            return;
        };
        let now = Instant::now();
        if let Some((previous, new)) =
            self.heartbeats
                .ingest(node, &transfer.payload, &mut self.timers, now)
        {
            self.notify_status(node, previous, new);
        }
    }

    fn notify_status(&mut self, node: NodeId, previous: NodeStatus, new: NodeStatus) {
        let Some(mut callback) = self.status_callback.take() else {
            return;
        };
        callback(self, node, &previous, &new);
        // Keep a replacement installed from inside the callback.
        if self.status_callback.is_none() {
            self.status_callback = Some(callback);
        }
    }

    /// Fires every deadline that has passed by `now`: request timeouts first
    /// come off the shared queue, then node liveness expiries.
    pub(crate) fn expire_timers(&mut self, now: Instant) {
        while let Some(timer) = self.timers.pop_expired(now) {
            if let Some(continuation) = self.tracker.remove_by_timer(timer) {
                continuation(self, Err(Error::Timeout));
            } else if let Some((node, previous, new)) = self.heartbeats.on_timer(timer) {
                self.notify_status(node, previous, new);
            }
        }
    }

    /// Earliest pending deadline, bounding how long the event loop may sleep.
    pub(crate) fn next_deadline(&mut self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    // ---- transmit queue ------------------------------------------------

    pub(crate) fn take_frame(&mut self) -> Option<WireFrame> {
        self.tx_queue.pop_front()
    }

    /// Puts a frame back at the head after a would-block send.
    pub(crate) fn untake_frame(&mut self, frame: WireFrame) {
        self.tx_queue.push_front(frame);
    }

    /// Abandons everything queued; used when a send fails hard.
    pub(crate) fn drop_queued_frames(&mut self) {
        self.tx_queue.clear();
    }

    /// Releases every pending record, timer and session without invoking
    /// continuations. Shutdown path.
    pub(crate) fn reset(&mut self) {
        self.tracker.clear(&mut self.timers);
        self.heartbeats.clear(&mut self.timers);
        self.timers.clear();
        self.reassembler.reset();
        self.tx_queue.clear();
    }

    // ---- internals -----------------------------------------------------

    fn next_transfer_id(&mut self, remote: NodeId, port_id: PortId) -> TransferId {
        let counter = self.transfer_ids.entry((remote, port_id)).or_insert(0);
        let id = *counter;
        *counter = (*counter + 1) % TRANSFER_ID_MODULO;
        id
    }

    /// Encodes nothing itself: takes a ready payload, queues the request
    /// transfer and registers the tracker record under the response
    /// fingerprint.
    fn submit(
        &mut self,
        remote: NodeId,
        port_id: PortId,
        payload: &[u8],
        continuation: Continuation<Client>,
    ) -> Result<()> {
        if remote > NODE_ID_MAX {
            return Err(Error::InvalidArgument);
        }

        let transfer_id = self.next_transfer_id(remote, port_id);
        let fingerprint = Fingerprint::new(remote, transfer_id, port_id);
        let deadline = Instant::now() + self.timeout;
        self.tracker
            .track(fingerprint, deadline, &mut self.timers, continuation)?;

        let metadata = TransferMetadata {
            timestamp_us: 0,
            priority: Priority::Nominal,
            transfer_kind: TransferKind::Request,
            port_id,
            remote_node_id: Some(remote),
            transfer_id,
        };
        if let Err(e) = tx::push_transfer(&mut self.tx_queue, &metadata, payload, self.node_id) {
            // Nothing went on the wire; roll the record back.
            debug!("transfer rejected: {e:?}");
            self.tracker.remove(fingerprint, &mut self.timers);
            return Err(Error::InvalidArgument);
        }
        Ok(())
    }
}
