//! Command dispatch: capability tiers, the command table, reply
//! marshalling and the general worker pool.
//!
//! Handlers are registered per `(category, command)` with a minimum
//! capability tier. The connection layer looks commands up, enforces the
//! tier, and enqueues the invocation on the worker pool. Replies travel
//! through a [`ReplySink`] that handlers may move into callbacks firing
//! long after the originating frame is gone; the reply tag is the sole
//! correlator.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use haven_common::frame::Frame;

// ---------------------------------------------------------------------------
// Capability tiers
// ---------------------------------------------------------------------------

/// What a connected peer is allowed to invoke, fixed at admission.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum CapabilityTier {
    /// Unknown remote; may invoke nothing.
    Anonymous,
    /// A recognized fleet member.
    AuthenticatedPeer,
    /// An operator key from the admin list.
    Admin,
}

impl CapabilityTier {
    /// Wire encoding of the tier, carried in the ADMITTED frame.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        match self {
            Self::Anonymous => 0,
            Self::AuthenticatedPeer => 1,
            Self::Admin => 2,
        }
    }

    /// Decodes a tier byte; unknown values map to `Anonymous`.
    #[must_use]
    pub const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::AuthenticatedPeer,
            2 => Self::Admin,
            _ => Self::Anonymous,
        }
    }
}

// ---------------------------------------------------------------------------
// Reply protocol
// ---------------------------------------------------------------------------

/// Application status carried in error replies.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    /// Request succeeded.
    Ok,
    /// Malformed request (wrong arity, bad envelope).
    BadRequest,
    /// No such command or resource.
    NotFound,
    /// Internal processing failure.
    InternalError,
    /// Downstream capability unavailable.
    ServiceUnavailable,
}

impl Status {
    /// The decimal status code sent on the wire.
    #[must_use]
    pub const fn code(self) -> u16 {
        match self {
            Self::Ok => 200,
            Self::BadRequest => 400,
            Self::NotFound => 404,
            Self::InternalError => 500,
            Self::ServiceUnavailable => 503,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Outcome of a handler, marshalled into a reply frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Response {
    /// Application status.
    pub status: Status,
    /// Payload on success, error message otherwise.
    pub body: Vec<u8>,
}

impl Response {
    /// A successful response carrying `body`.
    #[must_use]
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: Status::Ok,
            body: body.into(),
        }
    }

    /// An error response with a short message.
    #[must_use]
    pub fn error(status: Status, message: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: message.into(),
        }
    }
}

/// Where a handler's reply goes.
///
/// Success is one part; an application error is two parts
/// `(status_decimal, message)` so the remote can tell it from a
/// transport timeout. Cheap to clone and safe to move into callbacks.
#[derive(Clone, Debug)]
pub struct ReplySink {
    reply_tag: u64,
    tx: mpsc::Sender<Vec<u8>>,
}

impl ReplySink {
    /// Creates a sink writing to a connection's delivery channel.
    #[must_use]
    pub fn new(reply_tag: u64, tx: mpsc::Sender<Vec<u8>>) -> Self {
        Self { reply_tag, tx }
    }

    /// Marshals a [`Response`] into the reply protocol and sends it.
    pub fn send_response(&self, response: Response) {
        let parts = if response.status == Status::Ok {
            vec![response.body]
        } else {
            vec![response.status.to_string().into_bytes(), response.body]
        };
        self.send_parts(parts);
    }

    /// Sends raw reply parts.
    pub fn send_parts(&self, parts: Vec<Vec<u8>>) {
        let bytes = Frame::reply(self.reply_tag, parts).serialize();
        if self.tx.try_send(bytes).is_err() {
            debug!(reply_tag = self.reply_tag, "reply dropped: connection gone or backlogged");
        }
    }
}

// ---------------------------------------------------------------------------
// Command table
// ---------------------------------------------------------------------------

/// A dispatched request as seen by a handler.
pub struct RequestContext {
    /// X25519 public key of the requesting peer.
    pub origin: [u8; 32],
    /// Capability tier assigned to the peer at admission.
    pub tier: CapabilityTier,
    /// Ordered argument byte-strings.
    pub parts: Vec<Vec<u8>>,
    /// Reply channel for this request.
    pub reply: ReplySink,
}

/// A registered command handler.
pub type CommandHandler = Arc<dyn Fn(RequestContext) + Send + Sync>;

struct CommandSpec {
    required: CapabilityTier,
    handler: CommandHandler,
}

/// Result of resolving an inbound request against the command table.
pub enum DispatchOutcome {
    /// The handler was scheduled.
    Dispatched,
    /// No such `(category, command)`.
    Unknown,
    /// The peer's tier does not reach the command's requirement.
    Denied,
}

/// The command table plus the worker pool that runs handlers.
pub struct Dispatcher {
    commands: HashMap<(String, String), CommandSpec>,
    workers: WorkerPool,
}

impl Dispatcher {
    /// Creates a dispatcher backed by `workers` general worker tasks.
    #[must_use]
    pub fn new(workers: usize) -> Self {
        Self {
            commands: HashMap::new(),
            workers: WorkerPool::spawn(workers),
        }
    }

    /// Registers a command with its minimum capability tier.
    pub fn add_command<F>(
        &mut self,
        category: &str,
        command: &str,
        required: CapabilityTier,
        handler: F,
    ) where
        F: Fn(RequestContext) + Send + Sync + 'static,
    {
        self.commands.insert(
            (category.to_owned(), command.to_owned()),
            CommandSpec {
                required,
                handler: Arc::new(handler),
            },
        );
    }

    /// Resolves and schedules a request.
    ///
    /// Unknown commands and tier denials are reported to the caller;
    /// only the caller knows whether to answer or drop.
    #[must_use]
    pub fn dispatch(&self, category: &str, command: &str, ctx: RequestContext) -> DispatchOutcome {
        let Some(spec) = self.commands.get(&(category.to_owned(), command.to_owned())) else {
            return DispatchOutcome::Unknown;
        };
        if ctx.tier < spec.required {
            return DispatchOutcome::Denied;
        }
        let handler = Arc::clone(&spec.handler);
        self.workers.submit(Box::new(move || handler(ctx)));
        DispatchOutcome::Dispatched
    }
}

// ---------------------------------------------------------------------------
// Worker pool
// ---------------------------------------------------------------------------

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A small pool of general worker tasks consuming dispatch jobs.
///
/// Handler invocation happens here rather than on connection I/O tasks;
/// CPU-bound checks run to completion without suspending the bus.
struct WorkerPool {
    tx: mpsc::Sender<Job>,
}

impl WorkerPool {
    fn spawn(workers: usize) -> Self {
        let (tx, rx) = mpsc::channel::<Job>(1024);
        let rx = Arc::new(Mutex::new(rx));
        for id in 0..workers.max(1) {
            let rx = Arc::clone(&rx);
            tokio::spawn(async move {
                loop {
                    let job = rx.lock().await.recv().await;
                    match job {
                        Some(job) => job(),
                        None => {
                            debug!(worker = id, "worker channel closed");
                            break;
                        }
                    }
                }
            });
        }
        Self { tx }
    }

    fn submit(&self, job: Job) {
        if self.tx.try_send(job).is_err() {
            debug!("dispatch queue full, dropping request");
        }
    }
}
