//! Bounded, fixed-message-size point-to-point channel with a name-based namespace.
//!
//! A channel is created by name before first use, carries messages of one fixed size
//! for its whole lifetime, and connects exactly one writer to one reader. A blocking
//! send into a full channel exerts back-pressure on the writer; a blocking receive on
//! an empty channel waits for the writer. Dropping the writer endpoint closes the
//! stream: the reader drains pending messages and then sees
//! [`ChannelError::EndOfStream`]. The side that created the channel unlinks its name
//! from the [`Namespace`] after both endpoints have terminated.

use std::collections::hash_map::Entry as MapEntry;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError};
use parking_lot::Mutex;
use thiserror::Error;

type Message = Box<[u8]>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChannelError {
    #[error("failed to open channel {name}: {reason}")]
    OpenFailed { name: String, reason: String },
    /// Non-blocking send found the channel at capacity.
    #[error("channel is full")]
    Full,
    /// The peer endpoint has permanently closed the channel.
    #[error("channel closed by peer")]
    Closed,
    /// The writer has closed and no messages are pending. Normal terminal
    /// signal, not a failure.
    #[error("end of stream")]
    EndOfStream,
    #[error("receive timed out")]
    Timeout,
    #[error("message of {len} bytes exceeds fixed message size {message_size}")]
    MessageTooLarge { len: usize, message_size: usize },
}

/// Endpoint direction requested in [`Namespace::open`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    ReadOnly,
    WriteOnly,
}

/// How sends behave when the channel is at capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendMode {
    /// Block until space frees up (the pipeline's only back-pressure mechanism).
    Blocking,
    /// Fail immediately with [`ChannelError::Full`].
    NonBlocking,
}

struct Entry {
    capacity: usize,
    message_size: usize,
    /// Unclaimed endpoints; each side of the point-to-point pipe may be taken
    /// exactly once.
    writer: Option<Sender<Message>>,
    reader: Option<Receiver<Message>>,
}

/// Registry of named channels shared by both sides of the pipeline.
///
/// Explicit instance passed into each component instead of process-global state.
#[derive(Default)]
pub struct Namespace {
    entries: Mutex<HashMap<String, Entry>>,
}

/// One of the two endpoints returned by [`Namespace::open`].
pub enum Endpoint {
    Writer(WriteHandle),
    Reader(ReadHandle),
}

impl Namespace {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Open one endpoint of the named channel.
    ///
    /// Creates the channel with the given `capacity` and `message_size` when it
    /// does not exist yet and `create_if_absent` is set. Opening an existing
    /// channel with mismatched attributes fails, as does claiming an endpoint
    /// that the peer already holds.
    pub fn open(
        &self,
        name: &str,
        capacity: usize,
        message_size: usize,
        mode: Mode,
        create_if_absent: bool,
    ) -> Result<Endpoint, ChannelError> {
        let open_failed = |reason: &str| ChannelError::OpenFailed {
            name: name.to_string(),
            reason: reason.to_string(),
        };
        if capacity == 0 {
            return Err(open_failed("capacity must be non-zero"));
        }

        let mut entries = self.entries.lock();
        let entry = match entries.entry(name.to_string()) {
            MapEntry::Occupied(occupied) => {
                let entry = occupied.into_mut();
                if entry.capacity != capacity || entry.message_size != message_size {
                    return Err(open_failed("attributes do not match existing channel"));
                }
                entry
            }
            MapEntry::Vacant(vacant) => {
                if !create_if_absent {
                    return Err(open_failed("no such channel"));
                }
                let (tx, rx) = bounded(capacity);
                vacant.insert(Entry {
                    capacity,
                    message_size,
                    writer: Some(tx),
                    reader: Some(rx),
                })
            }
        };

        match mode {
            Mode::WriteOnly => {
                let sender = entry
                    .writer
                    .take()
                    .ok_or_else(|| open_failed("write endpoint already claimed"))?;
                Ok(Endpoint::Writer(WriteHandle {
                    name: name.to_string(),
                    message_size,
                    sender,
                }))
            }
            Mode::ReadOnly => {
                let receiver = entry
                    .reader
                    .take()
                    .ok_or_else(|| open_failed("read endpoint already claimed"))?;
                Ok(Endpoint::Reader(ReadHandle {
                    name: name.to_string(),
                    message_size,
                    receiver,
                }))
            }
        }
    }

    /// Convenience wrapper returning the writer side or failing.
    pub fn open_writer(
        &self,
        name: &str,
        capacity: usize,
        message_size: usize,
        create_if_absent: bool,
    ) -> Result<WriteHandle, ChannelError> {
        match self.open(name, capacity, message_size, Mode::WriteOnly, create_if_absent)? {
            Endpoint::Writer(handle) => Ok(handle),
            Endpoint::Reader(_) => unreachable!("write-only open returned a reader"),
        }
    }

    /// Convenience wrapper returning the reader side or failing.
    pub fn open_reader(
        &self,
        name: &str,
        capacity: usize,
        message_size: usize,
        create_if_absent: bool,
    ) -> Result<ReadHandle, ChannelError> {
        match self.open(name, capacity, message_size, Mode::ReadOnly, create_if_absent)? {
            Endpoint::Reader(handle) => Ok(handle),
            Endpoint::Writer(_) => unreachable!("read-only open returned a writer"),
        }
    }

    /// Remove the channel's persistent identity from the namespace.
    ///
    /// Only safe once both endpoints have closed; the creating side calls this
    /// after joining the peer.
    pub fn unlink(&self, name: &str) -> Result<(), ChannelError> {
        self.entries
            .lock()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| ChannelError::OpenFailed {
                name: name.to_string(),
                reason: "unlink of unknown channel".to_string(),
            })
    }

    /// Whether a name is currently linked.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.lock().contains_key(name)
    }
}

/// Writer endpoint. Dropping it closes the stream for the reader.
#[derive(Debug)]
pub struct WriteHandle {
    name: String,
    message_size: usize,
    sender: Sender<Message>,
}

impl WriteHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn message_size(&self) -> usize {
        self.message_size
    }

    /// Enqueue one message, blocking while the channel is at capacity when
    /// `mode` is [`SendMode::Blocking`]. A message larger than the channel's
    /// fixed message size is rejected before it reaches the transport.
    pub fn send(&self, message: &[u8], mode: SendMode) -> Result<(), ChannelError> {
        if message.len() > self.message_size {
            return Err(ChannelError::MessageTooLarge {
                len: message.len(),
                message_size: self.message_size,
            });
        }
        let message: Message = message.into();
        match mode {
            SendMode::Blocking => self.sender.send(message).map_err(|_| ChannelError::Closed),
            SendMode::NonBlocking => match self.sender.try_send(message) {
                Ok(()) => Ok(()),
                Err(TrySendError::Full(_)) => Err(ChannelError::Full),
                Err(TrySendError::Disconnected(_)) => Err(ChannelError::Closed),
            },
        }
    }
}

/// Reader endpoint. FIFO with respect to the writer's send order.
#[derive(Debug)]
pub struct ReadHandle {
    name: String,
    message_size: usize,
    receiver: Receiver<Message>,
}

impl ReadHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn message_size(&self) -> usize {
        self.message_size
    }

    /// Dequeue the next message, blocking until one is available. Returns
    /// [`ChannelError::EndOfStream`] once the writer has closed and nothing is
    /// pending.
    pub fn receive(&self) -> Result<Message, ChannelError> {
        self.receiver.recv().map_err(|_| ChannelError::EndOfStream)
    }

    /// Dequeue with an upper wait bound.
    pub fn receive_timeout(&self, timeout: Duration) -> Result<Message, ChannelError> {
        match self.receiver.recv_timeout(timeout) {
            Ok(message) => Ok(message),
            Err(RecvTimeoutError::Timeout) => Err(ChannelError::Timeout),
            Err(RecvTimeoutError::Disconnected) => Err(ChannelError::EndOfStream),
        }
    }

    /// Dequeue without blocking.
    pub fn try_receive(&self) -> Result<Message, ChannelError> {
        match self.receiver.try_recv() {
            Ok(message) => Ok(message),
            Err(TryRecvError::Empty) => Err(ChannelError::Timeout),
            Err(TryRecvError::Disconnected) => Err(ChannelError::EndOfStream),
        }
    }

    /// Number of messages currently pending.
    pub fn pending(&self) -> usize {
        self.receiver.len()
    }
}
