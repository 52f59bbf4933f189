//! The ordered set of worker control channels and its round-robin cursor.

use std::os::fd::AsFd;

use crate::channel::{ControlSender, HandoffError, WorkerId};
use crate::dispatch::DispatchError;
use crate::load_balancer::RoundRobin;

/// Control channels of all workers, selected strictly round-robin.
///
/// The cursor lives here and is only advanced through `&mut self`, so the
/// selection and the send happen as one step of the accept loop.
#[derive(Debug)]
pub struct WorkerSet {
    channels: Vec<ControlSender>,
    rotation: RoundRobin,
}

impl WorkerSet {
    pub fn new(channels: Vec<ControlSender>) -> Result<Self, DispatchError> {
        Self::starting_at(channels, 0)
    }

    /// Build a set whose first dispatch goes to `channels[cursor % len]`.
    pub fn starting_at(channels: Vec<ControlSender>, cursor: usize) -> Result<Self, DispatchError> {
        if channels.is_empty() {
            return Err(DispatchError::NoWorkers);
        }
        let rotation = RoundRobin::starting_at(channels.len(), cursor);
        Ok(Self { channels, rotation })
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Index of the worker the next dispatch will use.
    pub fn cursor(&self) -> usize {
        self.rotation.current()
    }

    /// Send `fd` to the worker under the cursor and advance the cursor.
    ///
    /// The cursor advances whether or not the send succeeds.
    pub async fn dispatch<F: AsFd>(&mut self, fd: &F) -> (WorkerId, Result<(), HandoffError>) {
        // `channels` is never empty, see `starting_at`.
        let index = self.rotation.next_index().unwrap_or(0);
        let channel = &self.channels[index];
        (channel.worker(), channel.send_descriptor(fd).await)
    }
}
