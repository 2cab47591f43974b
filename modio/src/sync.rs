//! Blocking wrappers over the asynchronous engine.
//!
//! Each wrapper dispatches the asynchronous request, flushes, and turns the
//! event loop until the continuation fires, then returns its result.
//! Everything runs on the calling thread; `&mut self` serializes entry.

use std::cell::Cell;
use std::rc::Rc;

use crate::client::Client;
use crate::engine::Engine;
use crate::error::Result;
use crate::register::RegisterValue;
use crate::services::{CommandStatus, NodeInfo};
use crate::types::NodeId;

impl Engine {
    fn run_to_completion<T: 'static>(
        &mut self,
        dispatch: impl FnOnce(&mut Client, Rc<Cell<Option<Result<T>>>>) -> Result<()>,
    ) -> Result<T> {
        let slot: Rc<Cell<Option<Result<T>>>> = Rc::new(Cell::new(None));
        dispatch(self.client_mut(), slot.clone())?;
        self.flush();
        loop {
            if let Some(result) = slot.take() {
                return result;
            }
            self.wait_for_event()?;
            self.tick()?;
        }
    }

    /// Blocking [`Client::get_node_info`].
    pub fn get_node_info_sync(&mut self, node: NodeId) -> Result<NodeInfo> {
        self.run_to_completion(|client, slot| {
            client.get_node_info(node, move |_, result| slot.set(Some(result)))
        })
    }

    /// Blocking [`Client::register_list`].
    pub fn register_list_sync(&mut self, node: NodeId, index: u16) -> Result<String> {
        self.run_to_completion(|client, slot| {
            client.register_list(node, index, move |_, result| slot.set(Some(result)))
        })
    }

    /// Blocking [`Client::register_access`].
    pub fn register_access_sync(
        &mut self,
        node: NodeId,
        name: &str,
        write: Option<&RegisterValue>,
    ) -> Result<RegisterValue> {
        self.run_to_completion(|client, slot| {
            client.register_access(node, name, write, move |_, result| slot.set(Some(result)))
        })
    }

    /// Blocking [`Client::execute_command`].
    pub fn execute_command_sync(
        &mut self,
        node: NodeId,
        command_id: u16,
        parameter: &[u8],
    ) -> Result<CommandStatus> {
        self.run_to_completion(|client, slot| {
            client.execute_command(node, command_id, parameter, move |_, result| {
                slot.set(Some(result))
            })
        })
    }

    /// Blocking [`Client::set_sample_interval`].
    pub fn set_sample_interval_sync(&mut self, node: NodeId, interval: u16) -> Result<()> {
        self.run_to_completion(|client, slot| {
            client.set_sample_interval(node, interval, move |_, result| slot.set(Some(result)))
        })
    }
}
