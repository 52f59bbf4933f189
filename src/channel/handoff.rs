//! Descriptor handoff wire format.
//!
//! One handoff is one `sendmsg` call carrying a single marker byte as the
//! payload and a single `SCM_RIGHTS` control message holding exactly one
//! descriptor. The kernel installs a duplicate of the descriptor in the
//! receiving process; the sender's copy stays valid until the sender drops it.
//!
//! The functions here are the raw, non-async halves of the protocol. They
//! return `io::ErrorKind::WouldBlock` untouched so callers can drive them from
//! a readiness loop.

use std::io::{self, IoSlice, IoSliceMut};
use std::os::fd::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};

use nix::sys::socket::{recvmsg, sendmsg, ControlMessage, ControlMessageOwned, MsgFlags};

use super::HandoffError;

/// Payload byte that accompanies every transferred descriptor.
pub const HANDOFF_MARKER: u8 = b'F';

/// Receive buffer for the payload. Larger than the marker so a misbehaving
/// peer shows up as a payload error instead of silently merged bytes.
const PAYLOAD_CAPACITY: usize = 16;

/// Most descriptors accepted in one control message before truncation.
const MAX_DESCRIPTORS: usize = 4;

#[cfg(any(target_os = "linux", target_os = "android"))]
fn send_flags() -> MsgFlags {
    MsgFlags::MSG_NOSIGNAL
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn send_flags() -> MsgFlags {
    MsgFlags::empty()
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn recv_flags() -> MsgFlags {
    MsgFlags::MSG_CMSG_CLOEXEC
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn recv_flags() -> MsgFlags {
    MsgFlags::empty()
}

/// Send `fd` over `channel` together with the marker byte.
pub fn send_descriptor(channel: BorrowedFd<'_>, fd: BorrowedFd<'_>) -> io::Result<()> {
    let payload = [HANDOFF_MARKER];
    let iov = [IoSlice::new(&payload)];
    let fds = [fd.as_raw_fd()];
    let cmsgs = [ControlMessage::ScmRights(&fds)];

    let sent = sendmsg::<()>(channel.as_raw_fd(), &iov, &cmsgs, send_flags(), None)?;
    if sent == 0 {
        return Err(io::Error::new(
            io::ErrorKind::WriteZero,
            "sendmsg wrote no payload",
        ));
    }
    Ok(())
}

/// One message as it came off the channel, before validation.
#[derive(Debug)]
pub struct ReceivedMessage {
    payload: [u8; PAYLOAD_CAPACITY],
    len: usize,
    descriptors: Vec<OwnedFd>,
    truncated: bool,
}

impl ReceivedMessage {
    /// Number of payload bytes read. Zero means the peer closed the channel.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Validate the message and take ownership of its single descriptor.
    ///
    /// Descriptors belonging to a rejected message are closed when the
    /// message is dropped.
    pub fn into_descriptor(mut self) -> Result<OwnedFd, HandoffError> {
        if self.len == 0 && self.descriptors.is_empty() {
            return Err(HandoffError::ChannelClosed);
        }
        if self.truncated {
            return Err(HandoffError::Truncated);
        }
        let payload = &self.payload[..self.len];
        if payload != [HANDOFF_MARKER] {
            return Err(HandoffError::Payload(payload.to_vec()));
        }
        match self.descriptors.len() {
            0 => Err(HandoffError::MissingDescriptor),
            1 => Ok(self.descriptors.remove(0)),
            n => Err(HandoffError::DescriptorCount(n)),
        }
    }
}

/// Receive one message from `channel`, taking ownership of every descriptor
/// delivered with it.
pub fn recv_message(channel: BorrowedFd<'_>) -> io::Result<ReceivedMessage> {
    let mut payload = [0u8; PAYLOAD_CAPACITY];
    let mut cmsg_buffer = nix::cmsg_space!([RawFd; MAX_DESCRIPTORS]);
    let mut descriptors = Vec::new();
    let mut truncated = false;

    let len = {
        let mut iov = [IoSliceMut::new(&mut payload)];
        let msg = recvmsg::<()>(
            channel.as_raw_fd(),
            &mut iov,
            Some(&mut cmsg_buffer),
            recv_flags(),
        )?;

        match msg.cmsgs() {
            Ok(cmsgs) => {
                for cmsg in cmsgs {
                    if let ControlMessageOwned::ScmRights(fds) = cmsg {
                        // SAFETY: the kernel just installed these descriptors in
                        // this process and nothing else refers to them.
                        descriptors.extend(fds.into_iter().map(|fd| unsafe { OwnedFd::from_raw_fd(fd) }));
                    }
                }
            }
            Err(_) => truncated = true,
        }
        if msg.flags.contains(MsgFlags::MSG_CTRUNC) {
            truncated = true;
        }
        msg.bytes
    };

    Ok(ReceivedMessage {
        payload,
        len,
        descriptors,
        truncated,
    })
}
