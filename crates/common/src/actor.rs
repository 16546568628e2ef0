//! Actor tasks
//!
//! An actor is a dedicated worker thread that owns a bounded request queue
//! and some private state. Other threads talk to it only through an
//! [`ActorHandle`]:
//!
//! - [`ActorHandle::send_request`] enqueues a request and blocks the caller on
//!   a one-shot reply created for that call.
//! - [`ActorHandle::send_request_async`] enqueues without waiting and never
//!   blocks, so it can be used from completion callbacks running in the
//!   host-controller context.
//!
//! Requests are handled strictly in FIFO order. Queue exhaustion is treated
//! as a sizing bug: the `send_*` variants log and abort, the `try_*` variants
//! return the error for callers that want to decide themselves.
//!
//! An actor must never call `send_request` on its own handle from inside
//! [`Actor::handle`]; that would wait on itself forever.

use crate::error::{Error, Result};
use async_channel::{Receiver, Sender, TrySendError, bounded};
use std::fmt;
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::oneshot;
use tracing::{debug, error, info};

/// State owned by an actor task plus its request handler
pub trait Actor: Send + 'static {
    /// Request enum accepted by this actor
    type Request: Send + 'static;
    /// Response enum produced for every request
    type Response: Send + 'static;

    /// Handle one request on the worker thread
    fn handle(&mut self, request: Self::Request) -> Self::Response;
}

struct Envelope<A: Actor> {
    request: A::Request,
    reply: Option<oneshot::Sender<A::Response>>,
}

/// Cloneable submission side of an actor
pub struct ActorHandle<A: Actor> {
    tx: Sender<Envelope<A>>,
    name: Arc<str>,
}

impl<A: Actor> Clone for ActorHandle<A> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            name: self.name.clone(),
        }
    }
}

impl<A: Actor> fmt::Debug for ActorHandle<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActorHandle")
            .field("name", &self.name)
            .field("queued", &self.tx.len())
            .finish()
    }
}

impl<A: Actor> ActorHandle<A> {
    /// Task name used in diagnostics
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of requests waiting in the queue
    pub fn queued(&self) -> usize {
        self.tx.len()
    }

    /// Submit a request and block until the actor responds
    ///
    /// Aborts if the queue is full or the actor is gone.
    pub fn send_request(&self, request: A::Request) -> A::Response {
        match self.try_send_request(request) {
            Ok(response) => response,
            Err(e) => fatal(&self.name, e),
        }
    }

    /// Submit a request without waiting for the response
    ///
    /// Never blocks. Aborts if the queue is full or the actor is gone.
    pub fn send_request_async(&self, request: A::Request) {
        if let Err(e) = self.try_send_request_async(request) {
            fatal(&self.name, e);
        }
    }

    /// Fallible form of [`send_request`](Self::send_request)
    pub fn try_send_request(&self, request: A::Request) -> Result<A::Response> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.enqueue(Envelope {
            request,
            reply: Some(reply_tx),
        })?;

        reply_rx
            .blocking_recv()
            .map_err(|_| Error::Channel(format!("actor '{}' dropped the reply", self.name)))
    }

    /// Fallible form of [`send_request_async`](Self::send_request_async)
    pub fn try_send_request_async(&self, request: A::Request) -> Result<()> {
        self.enqueue(Envelope {
            request,
            reply: None,
        })
    }

    fn enqueue(&self, envelope: Envelope<A>) -> Result<()> {
        self.tx.try_send(envelope).map_err(|e| match e {
            TrySendError::Full(_) => Error::QueueFull {
                actor: self.name.to_string(),
            },
            TrySendError::Closed(_) => {
                Error::Channel(format!("actor '{}' is no longer running", self.name))
            }
        })
    }
}

/// Receiving side of an actor, consumed when the worker starts
pub struct Mailbox<A: Actor> {
    rx: Receiver<Envelope<A>>,
    name: Arc<str>,
}

impl<A: Actor> Mailbox<A> {
    /// Start the worker thread
    pub fn spawn(self, actor: A) -> Result<JoinHandle<()>> {
        let name = self.name.to_string();
        std::thread::Builder::new()
            .name(name)
            .spawn(move || self.run(actor))
            .map_err(Error::Io)
    }

    /// Run the worker loop on the current thread
    ///
    /// Returns once every handle has been dropped.
    pub fn run(self, mut actor: A) {
        info!("{} task started", self.name);

        while let Ok(envelope) = self.rx.recv_blocking() {
            let response = actor.handle(envelope.request);
            if let Some(reply) = envelope.reply
                && reply.send(response).is_err()
            {
                debug!("{}: requester went away before the reply", self.name);
            }
        }

        info!("{} task stopped", self.name);
    }

    /// Pop one queued request without running the worker
    ///
    /// Lets a test drive an actor's handler step by step. Any reply channel
    /// attached to the request is dropped.
    pub fn try_recv(&self) -> Option<A::Request> {
        self.rx.try_recv().ok().map(|envelope| envelope.request)
    }
}

/// Create the queue for an actor
///
/// Returns (handle for submitters, mailbox for the worker). The handle can be
/// given to the actor's own state before the worker is spawned, so completion
/// callbacks it creates can post back into the same queue.
pub fn create_mailbox<A: Actor>(name: &str, queue_depth: usize) -> (ActorHandle<A>, Mailbox<A>) {
    let (tx, rx) = bounded(queue_depth.max(1));
    let name: Arc<str> = Arc::from(name);

    (
        ActorHandle {
            tx,
            name: name.clone(),
        },
        Mailbox { rx, name },
    )
}

/// Create an actor and start its worker thread in one step
pub fn spawn_actor<A: Actor>(
    name: &str,
    queue_depth: usize,
    actor: A,
) -> Result<(ActorHandle<A>, JoinHandle<()>)> {
    let (handle, mailbox) = create_mailbox(name, queue_depth);
    let join = mailbox.spawn(actor)?;
    Ok((handle, join))
}

fn fatal(name: &str, e: Error) -> ! {
    error!("{}: unrecoverable actor failure: {}", name, e);
    panic!("actor '{}': {}", name, e);
}
