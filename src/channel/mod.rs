//! Control channels between the master and its workers.
//!
//! # Data Flow
//! ```text
//! master (ControlSender)                      worker (ControlReceiver)
//!     accepted TcpStream
//!     → sendmsg(marker, SCM_RIGHTS[fd])  ───▶  recvmsg
//!     → drop local copy                        → OwnedFd → register
//! ```
//!
//! # Design Decisions
//! - One Unix stream socket per worker, addressed by a path derived from the
//!   worker id; created once at startup and never recreated
//! - The descriptor is the payload; the data bytes are a fixed marker
//! - A malformed message costs one connection, a closed channel costs the worker

pub mod handoff;

use std::fmt;
use std::io;
use std::os::fd::{AsFd, OwnedFd};
use std::path::{Path, PathBuf};

use tokio::io::Interest;
use tokio::net::UnixStream;

pub use handoff::HANDOFF_MARKER;

/// Identifier of a worker process, `1..=N`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(usize);

impl WorkerId {
    /// Create a worker id. Ids start at 1.
    pub fn new(id: usize) -> Option<Self> {
        (id > 0).then_some(Self(id))
    }

    /// Id of the worker occupying `index` in a zero-based worker set.
    pub fn from_index(index: usize) -> Self {
        Self(index + 1)
    }

    pub fn get(&self) -> usize {
        self.0
    }

    /// Zero-based position of this worker in its worker set.
    pub fn index(&self) -> usize {
        self.0 - 1
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Deterministic control-channel socket path for a worker.
pub fn socket_path(run_dir: &Path, worker: WorkerId) -> PathBuf {
    run_dir.join(format!("worker-{}.sock", worker))
}

/// Failure to transfer a single descriptor.
#[derive(Debug, thiserror::Error)]
pub enum HandoffError {
    #[error("control channel closed by peer")]
    ChannelClosed,
    #[error("control channel I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error("handoff message carried no descriptor")]
    MissingDescriptor,
    #[error("handoff message carried {0} descriptors, expected exactly one")]
    DescriptorCount(usize),
    #[error("handoff control message truncated")]
    Truncated,
    #[error("unexpected handoff payload {0:?}")]
    Payload(Vec<u8>),
}

impl HandoffError {
    /// Whether the channel itself is unusable, as opposed to one bad message.
    pub fn is_channel_lost(&self) -> bool {
        matches!(self, HandoffError::ChannelClosed | HandoffError::Io(_))
    }
}

/// Master-side endpoint of one worker's control channel.
#[derive(Debug)]
pub struct ControlSender {
    worker: WorkerId,
    stream: UnixStream,
}

impl ControlSender {
    pub fn new(worker: WorkerId, stream: UnixStream) -> Self {
        Self { worker, stream }
    }

    pub fn worker(&self) -> WorkerId {
        self.worker
    }

    /// Transfer `fd` to the worker. The caller keeps its own copy and is
    /// responsible for dropping it once this returns.
    pub async fn send_descriptor<F: AsFd>(&self, fd: &F) -> Result<(), HandoffError> {
        let fd = fd.as_fd();
        self.stream
            .async_io(Interest::WRITABLE, || {
                handoff::send_descriptor(self.stream.as_fd(), fd)
            })
            .await?;
        Ok(())
    }
}

/// Worker-side endpoint of the control channel.
#[derive(Debug)]
pub struct ControlReceiver {
    stream: UnixStream,
}

impl ControlReceiver {
    pub fn new(stream: UnixStream) -> Self {
        Self { stream }
    }

    /// Connect to the master's control-channel socket at `path`.
    pub async fn connect(path: &Path) -> io::Result<Self> {
        let stream = UnixStream::connect(path).await?;
        Ok(Self { stream })
    }

    /// Wait until a handoff (or channel closure) is ready to be read.
    pub async fn readable(&self) -> io::Result<()> {
        self.stream.readable().await
    }

    /// Receive one handoff and take ownership of its descriptor.
    pub async fn recv_descriptor(&self) -> Result<OwnedFd, HandoffError> {
        let message = self
            .stream
            .async_io(Interest::READABLE, || handoff::recv_message(self.stream.as_fd()))
            .await?;
        message.into_descriptor()
    }

    /// Receive one handoff if one is already queued.
    ///
    /// Returns `Ok(None)` when readiness turned out to be spurious.
    pub fn try_recv_descriptor(&self) -> Result<Option<OwnedFd>, HandoffError> {
        match self
            .stream
            .try_io(Interest::READABLE, || handoff::recv_message(self.stream.as_fd()))
        {
            Ok(message) => message.into_descriptor().map(Some),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(HandoffError::Io(e)),
        }
    }
}

/// Create a connected sender/receiver pair without touching the filesystem.
pub fn pair(worker: WorkerId) -> io::Result<(ControlSender, ControlReceiver)> {
    let (master, worker_end) = UnixStream::pair()?;
    Ok((
        ControlSender::new(worker, master),
        ControlReceiver::new(worker_end),
    ))
}
