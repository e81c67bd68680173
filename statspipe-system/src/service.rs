use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::sync::{mpsc, oneshot};

/// A message interface for [services](Service).
///
/// Most commonly, this interface is an enumeration of messages, where each
/// variant is constructed through [`FromMessage`].
pub trait Interface: Send + 'static {}

/// An error when [sending](Addr::send) a message to a service fails.
#[derive(Clone, Copy, Debug)]
pub struct SendError;

impl fmt::Display for SendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to send message to service")
    }
}

impl std::error::Error for SendError {}

/// Response behavior of a message sent to a service.
///
/// See [`NoResponse`] for fire-and-forget messages and [`AsyncResponse`] for
/// messages that resolve to a value.
pub trait MessageResponse {
    /// The sender handed to [`FromMessage::from_message`].
    type Sender;
    /// The value returned from [`Addr::send`] for this message.
    type Output;

    /// Creates the sender and its matching output.
    fn channel() -> (Self::Sender, Self::Output);
}

/// Fire-and-forget messages without a response.
pub enum NoResponse {}

impl MessageResponse for NoResponse {
    type Sender = ();
    type Output = ();

    fn channel() -> ((), ()) {
        ((), ())
    }
}

/// Sends a message response from a service back to the waiting [`Request`].
pub struct Sender<T>(oneshot::Sender<T>);

impl<T> fmt::Debug for Sender<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sender").finish_non_exhaustive()
    }
}

impl<T> Sender<T> {
    /// Sends the response value and closes the [`Request`].
    ///
    /// The response is dropped silently if the request was cancelled.
    pub fn send(self, value: T) {
        let _ = self.0.send(value);
    }
}

/// Message response resolving asynchronously into a value of type `T`.
pub struct AsyncResponse<T>(std::marker::PhantomData<T>);

impl<T: Send + 'static> MessageResponse for AsyncResponse<T> {
    type Sender = Sender<T>;
    type Output = Request<T>;

    fn channel() -> (Self::Sender, Self::Output) {
        let (tx, rx) = oneshot::channel();
        (Sender(tx), Request(rx))
    }
}

/// The future returned from [`Addr::send`] for messages with an
/// [`AsyncResponse`].
///
/// Resolves with `Err(SendError)` if the service dropped the message or has
/// shut down.
pub struct Request<T>(oneshot::Receiver<T>);

impl<T> Future for Request<T> {
    type Output = Result<T, SendError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.0).poll(cx).map_err(|_| SendError)
    }
}

/// Declares a message as part of an [`Interface`].
pub trait FromMessage<M>: Interface {
    /// The response behavior of the message.
    type Response: MessageResponse;

    /// Converts the message into the service interface.
    fn from_message(message: M, sender: <Self::Response as MessageResponse>::Sender) -> Self;
}

/// The address of a [`Service`].
///
/// The address allows sending messages to the service as long as the service
/// is running. It can be freely cloned; once all clones (including
/// [recipients](Addr::recipient)) are dropped, the service's inbox closes
/// and the service drains and stops.
#[derive(Debug)]
pub struct Addr<I: Interface> {
    tx: mpsc::UnboundedSender<I>,
}

// Manually derive clone since we do not require `I: Clone` and the Clone
// derive adds this constraint.
impl<I: Interface> Clone for Addr<I> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<I: Interface> Addr<I> {
    /// Sends a message to the service.
    ///
    /// For messages with an [`AsyncResponse`] this returns a [`Request`]
    /// future resolving to the response. The communication channel with the
    /// service is unbounded, so sending never blocks the caller.
    pub fn send<M>(&self, message: M) -> <<I as FromMessage<M>>::Response as MessageResponse>::Output
    where
        I: FromMessage<M>,
    {
        let (sender, output) = <I as FromMessage<M>>::Response::channel();
        let _ = self.tx.send(I::from_message(message, sender));
        output
    }

    /// Converts the address into a [`Recipient`] for a single message type.
    pub fn recipient<M>(self) -> Recipient<M>
    where
        I: FromMessage<M, Response = NoResponse>,
        M: Send + 'static,
    {
        Recipient {
            tx: Arc::new(self.tx),
        }
    }
}

/// An address to a [`Service`] that only accepts a single message type.
///
/// This allows a service to expose a narrow dependency on another service
/// without naming its full interface. Like [`Addr`], dropping every clone
/// closes the target service's inbox.
pub struct Recipient<M> {
    tx: Arc<dyn DynSend<M> + Send + Sync>,
}

impl<M> Clone for Recipient<M> {
    fn clone(&self) -> Self {
        Self {
            tx: Arc::clone(&self.tx),
        }
    }
}

impl<M> fmt::Debug for Recipient<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Recipient").finish_non_exhaustive()
    }
}

impl<M> Recipient<M> {
    /// Sends the message to the recipient service.
    pub fn send(&self, message: M) {
        self.tx.send_dyn(message);
    }
}

trait DynSend<M> {
    fn send_dyn(&self, message: M);
}

impl<I, M> DynSend<M> for mpsc::UnboundedSender<I>
where
    I: FromMessage<M, Response = NoResponse>,
    M: Send + 'static,
{
    fn send_dyn(&self, message: M) {
        let _ = self.send(I::from_message(message, ()));
    }
}

/// Inbox of a [`Service`] containing all pending messages.
pub struct Receiver<I: Interface> {
    rx: mpsc::UnboundedReceiver<I>,
}

impl<I: Interface> Receiver<I> {
    /// Receives the next message, or `None` once every [`Addr`] has been
    /// dropped and all queued messages were consumed.
    pub async fn recv(&mut self) -> Option<I> {
        self.rx.recv().await
    }
}

impl<I: Interface> fmt::Debug for Receiver<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Receiver").finish_non_exhaustive()
    }
}

/// Creates an unbounded channel for communicating with a [`Service`].
pub fn channel<I: Interface>() -> (Addr<I>, Receiver<I>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Addr { tx }, Receiver { rx })
}

/// An asynchronous unit responding to messages.
///
/// Services receive messages conforming to their [`Interface`] through their
/// [`Addr`] and handle them one by one on a dedicated tokio task spawned in
/// [`spawn_handler`](Service::spawn_handler).
pub trait Service: Sized + Send + 'static {
    /// The interface of messages handled by this service.
    type Interface: Interface;

    /// Spawns a task to handle service messages.
    ///
    /// The task must exit once `rx` returns `None`, after finishing any
    /// pending drain work. This is how the completion cascade propagates
    /// through the pipeline.
    fn spawn_handler(self, rx: Receiver<Self::Interface>);

    /// Starts the service in the current runtime and returns its address.
    fn start(self) -> Addr<Self::Interface> {
        let (addr, rx) = channel();
        self.spawn_handler(rx);
        addr
    }
}
