use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use mgrpc_frame::{next_command_id, Command, Frame, Response};
use mgrpc_transport::{Codec, TransportError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn, Level};

use crate::connector::connect_codec;
use crate::error::{ClientError, Result};
use crate::options::ConnectOptions;
use crate::pending::{Outcome, PendingTable};

/// Longest frame rendering written to trace logs.
const TRACE_PREVIEW_LIMIT: usize = 1024;

/// Lifecycle of a [`Client`]'s connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// The transport is being dialed.
    Connecting,
    /// The receive loop is running.
    Connected,
    /// The receive loop has stopped; every call fails.
    Disconnected,
}

struct Shared {
    codec: Box<dyn Codec>,
    pending: PendingTable,
    local_id: String,
    fail_fast_send: bool,
    state: watch::Sender<ConnectionState>,
    shutdown: CancellationToken,
}

/// RPC client multiplexing concurrent calls over one transport.
///
/// Calls may be issued from any number of tasks through `&Client`. A
/// background task reads frames and routes responses to their callers by
/// request ID; when it stops, every outstanding call fails with its error.
pub struct Client {
    shared: Arc<Shared>,
    receiver: Mutex<Option<JoinHandle<()>>>,
}

impl Client {
    /// Dial `address` and start the receive loop.
    ///
    /// The transport is chosen from the address scheme unless forced in
    /// `options`. Nothing is left running if this fails.
    pub async fn connect(address: &str, options: ConnectOptions) -> Result<Self> {
        let codec = connect_codec(address, &options).await?;
        info!(address, local_id = options.local_id(), "connected");
        Ok(Self::start(
            codec,
            options.local_id().to_string(),
            options.fail_fast_send(),
        ))
    }

    /// Run a client over an already established codec.
    ///
    /// Must be called within a Tokio runtime.
    pub fn from_codec(codec: impl Codec + 'static, local_id: impl Into<String>) -> Self {
        Self::start(Box::new(codec), local_id.into(), false)
    }

    /// Like [`from_codec`](Self::from_codec), taking settings from `options`.
    pub fn from_codec_with_options(codec: impl Codec + 'static, options: &ConnectOptions) -> Self {
        Self::start(
            Box::new(codec),
            options.local_id().to_string(),
            options.fail_fast_send(),
        )
    }

    fn start(codec: Box<dyn Codec>, local_id: String, fail_fast_send: bool) -> Self {
        let (state, _) = watch::channel(ConnectionState::Connecting);
        let shared = Arc::new(Shared {
            codec,
            pending: PendingTable::default(),
            local_id,
            fail_fast_send,
            state,
            shutdown: CancellationToken::new(),
        });
        shared.state.send_replace(ConnectionState::Connected);
        let receiver = tokio::spawn(receive_loop(Arc::clone(&shared)));
        Self {
            shared,
            receiver: Mutex::new(Some(receiver)),
        }
    }

    pub fn local_id(&self) -> &str {
        &self.shared.local_id
    }

    pub fn transport_name(&self) -> &'static str {
        self.shared.codec.transport_name()
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    /// Subscribe to connection state transitions.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Number of calls currently awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.shared.pending.len()
    }

    /// Whether a call with `id` is awaiting a response.
    pub fn is_pending(&self, id: i64) -> bool {
        self.shared.pending.contains(id)
    }

    /// Send `cmd` to `dst` and wait for its response.
    ///
    /// A zero `cmd.id` is replaced with a fresh process-unique ID. Resolves
    /// with the response (whatever its status) or with the error that
    /// stopped the receive loop. There is no deadline; see
    /// [`call_timeout`](Self::call_timeout). Dropping the future
    /// deregisters the call.
    ///
    /// WebSocket and TCP clients reconnect without ending the receive loop,
    /// and requests are not replayed. A call whose reply was lost with a
    /// dropped connection therefore waits forever unless the new connection
    /// answers it. Use [`call_timeout`](Self::call_timeout) or
    /// [`call_cancellable`](Self::call_cancellable) on those transports.
    pub async fn call(&self, dst: &str, cmd: Command) -> Result<Response> {
        self.call_inner(dst, cmd, |_| std::future::pending::<ClientError>())
            .await
    }

    /// [`call`](Self::call) with a deadline.
    pub async fn call_timeout(
        &self,
        dst: &str,
        cmd: Command,
        timeout: Duration,
    ) -> Result<Response> {
        self.call_inner(dst, cmd, move |id| async move {
            tokio::time::sleep(timeout).await;
            ClientError::Timeout { id, timeout }
        })
        .await
    }

    /// [`call`](Self::call) that gives up when `token` is cancelled.
    pub async fn call_cancellable(
        &self,
        dst: &str,
        cmd: Command,
        token: &CancellationToken,
    ) -> Result<Response> {
        self.call_inner(dst, cmd, |id| async move {
            token.cancelled().await;
            ClientError::Cancelled(id)
        })
        .await
    }

    /// [`call_timeout`](Self::call_timeout) that turns a nonzero status
    /// into [`ClientError::Status`] and returns the response body.
    pub async fn call_checked(
        &self,
        dst: &str,
        cmd: Command,
        timeout: Duration,
    ) -> Result<Option<serde_json::Value>> {
        let response = self.call_timeout(dst, cmd, timeout).await?;
        Ok(response.into_result()?)
    }

    async fn call_inner<A, F>(&self, dst: &str, mut cmd: Command, abort: A) -> Result<Response>
    where
        A: FnOnce(i64) -> F,
        F: Future<Output = ClientError>,
    {
        if cmd.id == 0 {
            cmd.id = next_command_id();
        }
        let id = cmd.id;
        let waiter = self.shared.pending.register(id)?;
        let mut guard = Registration {
            table: &self.shared.pending,
            id,
            armed: true,
        };
        debug!(id, method = %cmd.cmd, dst, "created request");

        let frame = Frame::request(self.shared.local_id.as_str(), dst, "", cmd);
        let exchange = async {
            if let Err(err) = self.shared.codec.send(frame).await {
                if self.shared.fail_fast_send {
                    return Err(ClientError::Send { id, source: err });
                }
                warn!(id, error = %err, "failed to send request; awaiting response anyway");
            }
            Ok(waiter.wait().await)
        };

        let outcome = tokio::select! {
            biased;
            err = abort(id) => {
                debug!(id, error = %err, "request abandoned");
                return Err(err);
            }
            outcome = exchange => outcome?,
        };

        guard.disarm();
        match outcome {
            Outcome::Response(response) => {
                debug!(id, status = response.status, "request completed");
                Ok(response)
            }
            Outcome::Failed(source) => Err(ClientError::ConnectionLost { id, source }),
            Outcome::Abandoned => Err(ClientError::ConnectionLost {
                id,
                source: Arc::new(TransportError::Closed),
            }),
        }
    }

    /// Stop the receive loop and close the transport.
    ///
    /// Outstanding calls fail with [`ClientError::ConnectionLost`]. Safe
    /// to call more than once.
    pub async fn disconnect(&self) -> Result<()> {
        info!("disconnecting");
        self.shared.shutdown.cancel();
        let closed = self.shared.codec.close().await;
        let receiver = self
            .receiver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(receiver) = receiver {
            if let Err(err) = receiver.await {
                warn!(error = %err, "receive loop ended abnormally");
            }
        }
        match closed {
            Ok(()) | Err(TransportError::Closed) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.shared.shutdown.cancel();
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("local_id", &self.shared.local_id)
            .field("transport", &self.transport_name())
            .field("state", &self.state())
            .field("pending", &self.pending_count())
            .finish()
    }
}

/// Removes a call from the pending table unless its outcome was delivered.
struct Registration<'a> {
    table: &'a PendingTable,
    id: i64,
    armed: bool,
}

impl Registration<'_> {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        if self.armed && self.table.remove(self.id) {
            debug!(id = self.id, "deregistered request");
        }
    }
}

async fn receive_loop(shared: Arc<Shared>) {
    let failure = loop {
        let received = tokio::select! {
            biased;
            _ = shared.shutdown.cancelled() => Err(TransportError::Closed),
            received = shared.codec.recv() => received,
        };
        let frame = match received {
            Ok(frame) => frame,
            Err(err) => break err,
        };
        if tracing::enabled!(Level::TRACE) {
            trace!(frame = %frame.preview(TRACE_PREVIEW_LIMIT), "received frame");
        }
        match frame.into_response() {
            Some(response) => {
                let id = response.id;
                if !shared.pending.complete(response) {
                    info!(id, "ignoring response with no pending request");
                }
            }
            None => debug!("ignoring frame without a response"),
        }
    };

    info!(error = %failure, "receive loop stopped");
    shared.state.send_replace(ConnectionState::Disconnected);
    let failed = shared.pending.fail_all(Arc::new(failure));
    if failed > 0 {
        warn!(failed, "failed outstanding requests");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;
    use mgrpc_frame::Response;
    use serde_json::json;
    use tokio::sync::{mpsc, Mutex as AsyncMutex};

    type Inbound = std::result::Result<Frame, TransportError>;

    /// Codec whose far end is driven by a [`Remote`].
    struct MockCodec {
        outbound: mpsc::UnboundedSender<Frame>,
        inbound: AsyncMutex<mpsc::UnboundedReceiver<Inbound>>,
        fail_send: Arc<AtomicBool>,
        closed: CancellationToken,
    }

    struct Remote {
        outbound: mpsc::UnboundedReceiver<Frame>,
        inbound: mpsc::UnboundedSender<Inbound>,
        fail_send: Arc<AtomicBool>,
    }

    fn mock() -> (MockCodec, Remote) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let fail_send = Arc::new(AtomicBool::new(false));
        (
            MockCodec {
                outbound: out_tx,
                inbound: AsyncMutex::new(in_rx),
                fail_send: Arc::clone(&fail_send),
                closed: CancellationToken::new(),
            },
            Remote {
                outbound: out_rx,
                inbound: in_tx,
                fail_send,
            },
        )
    }

    #[async_trait]
    impl Codec for MockCodec {
        async fn send(&self, frame: Frame) -> mgrpc_transport::Result<()> {
            if self.fail_send.load(Ordering::SeqCst) {
                return Err(TransportError::ConnectionClosed);
            }
            self.outbound
                .send(frame)
                .map_err(|_| TransportError::ConnectionClosed)
        }

        async fn recv(&self) -> mgrpc_transport::Result<Frame> {
            let mut inbound = self.inbound.lock().await;
            tokio::select! {
                _ = self.closed.cancelled() => Err(TransportError::Closed),
                next = inbound.recv() => match next {
                    Some(item) => item,
                    None => Err(TransportError::ConnectionClosed),
                },
            }
        }

        async fn close(&self) -> mgrpc_transport::Result<()> {
            self.closed.cancel();
            Ok(())
        }

        fn transport_name(&self) -> &'static str {
            "mock"
        }
    }

    impl Remote {
        async fn next_request(&mut self) -> Frame {
            self.outbound.recv().await.expect("client sent a frame")
        }

        fn reply(&self, response: Response) {
            let frame = Frame::response("device", "client", response);
            self.inbound.send(Ok(frame)).unwrap();
        }

        fn fail(&self, err: TransportError) {
            self.inbound.send(Err(err)).unwrap();
        }
    }

    /// Answer every request with its own ID and method name.
    fn spawn_echo(mut remote: Remote) {
        tokio::spawn(async move {
            while let Some(frame) = remote.outbound.recv().await {
                let Some(cmd) = frame.cmd else { continue };
                remote.reply(Response::ok(cmd.id, Some(json!({ "echo": cmd.cmd }))));
            }
        });
    }

    async fn wait_for_pending(client: &Client, count: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while client.pending_count() != count {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("pending table never reached the expected size");
    }

    #[tokio::test]
    async fn ping_round_trip() {
        let (codec, remote) = mock();
        spawn_echo(remote);
        let client = Client::from_codec(codec, "laptop");
        assert_eq!(client.state(), ConnectionState::Connected);

        let response = client
            .call("device", Command::new("Sys.Ping"))
            .await
            .unwrap();
        assert_eq!(response.status, 0);
        assert_eq!(response.resp, Some(json!({ "echo": "Sys.Ping" })));
        assert_eq!(client.pending_count(), 0);
    }

    #[tokio::test]
    async fn request_frame_carries_addressing() {
        let (codec, mut remote) = mock();
        let client = Client::from_codec(codec, "laptop");

        let call = tokio::spawn(async move {
            client
                .call("device", Command::new("Sys.Ping").with_args(json!({"a": 1})))
                .await
        });
        let frame = remote.next_request().await;
        assert_eq!(frame.src, "laptop");
        assert_eq!(frame.dst, "device");
        let cmd = frame.cmd.expect("request carries a command");
        assert_ne!(cmd.id, 0);
        assert_eq!(cmd.args, Some(json!({"a": 1})));

        remote.reply(Response::ok(cmd.id, None));
        assert_eq!(call.await.unwrap().unwrap().id, cmd.id);
    }

    #[tokio::test]
    async fn timeout_deregisters_the_call() {
        let (codec, _remote) = mock();
        let client = Client::from_codec(codec, "");

        let started = std::time::Instant::now();
        let err = client
            .call_timeout("", Command::new("Sys.Ping").with_id(42), Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Timeout { id: 42, .. }));
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(!client.is_pending(42));
        assert_eq!(client.pending_count(), 0);
    }

    #[tokio::test]
    async fn late_response_after_timeout_is_ignored() {
        let (codec, mut remote) = mock();
        let client = Client::from_codec(codec, "");

        let err = client
            .call_timeout("", Command::new("Slow").with_id(8), Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Timeout { .. }));
        remote.next_request().await;
        remote.reply(Response::ok(8, None));

        // The loop survives the stray response and keeps serving calls.
        spawn_echo(remote);
        client.call("", Command::new("Next")).await.unwrap();
    }

    #[tokio::test]
    async fn transport_failure_fails_every_outstanding_call() {
        let (codec, remote) = mock();
        let client = Arc::new(Client::from_codec(codec, ""));
        let mut states = client.state_changes();

        let calls: Vec<_> = (0..16)
            .map(|_| {
                let client = Arc::clone(&client);
                tokio::spawn(async move { client.call("", Command::new("Hang")).await })
            })
            .collect();
        wait_for_pending(&client, 16).await;

        remote.fail(TransportError::ConnectionClosed);
        for call in calls {
            match call.await.unwrap() {
                Err(ClientError::ConnectionLost { source, .. }) => {
                    assert!(matches!(*source, TransportError::ConnectionClosed))
                }
                other => panic!("expected connection lost, got {other:?}"),
            }
        }
        assert_eq!(client.pending_count(), 0);

        states
            .wait_for(|state| *state == ConnectionState::Disconnected)
            .await
            .unwrap();
        let err = client.call("", Command::new("After")).await.unwrap_err();
        assert!(matches!(err, ClientError::ConnectionLost { .. }));
    }

    #[tokio::test]
    async fn unsolicited_response_does_not_disturb_pending_calls() {
        let (codec, mut remote) = mock();
        let client = Arc::new(Client::from_codec(codec, ""));

        let call = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.call("", Command::new("A").with_id(1)).await })
        };
        remote.next_request().await;
        remote.reply(Response::ok(999, None));
        remote.reply(Response::ok(1, Some(json!("a"))));

        let response = call.await.unwrap().unwrap();
        assert_eq!(response.resp, Some(json!("a")));
        assert_eq!(client.state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn cancelling_one_call_leaves_others_alone() {
        let (codec, mut remote) = mock();
        let client = Arc::new(Client::from_codec(codec, ""));
        let token = CancellationToken::new();

        let a = {
            let client = Arc::clone(&client);
            let token = token.clone();
            tokio::spawn(async move {
                client
                    .call_cancellable("", Command::new("A").with_id(1), &token)
                    .await
            })
        };
        let b = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.call("", Command::new("B").with_id(2)).await })
        };
        remote.next_request().await;
        remote.next_request().await;

        token.cancel();
        assert!(matches!(a.await.unwrap(), Err(ClientError::Cancelled(1))));
        assert!(!client.is_pending(1));
        assert!(client.is_pending(2));

        remote.reply(Response::ok(2, None));
        assert_eq!(b.await.unwrap().unwrap().id, 2);
    }

    #[tokio::test]
    async fn dropped_call_future_deregisters() {
        let (codec, _remote) = mock();
        let client = Arc::new(Client::from_codec(codec, ""));

        let call = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.call("", Command::new("Hang").with_id(77)).await })
        };
        wait_for_pending(&client, 1).await;
        call.abort();
        let _ = call.await;
        assert!(!client.is_pending(77));
    }

    #[tokio::test]
    async fn duplicate_outstanding_id_is_rejected() {
        let (codec, _remote) = mock();
        let client = Arc::new(Client::from_codec(codec, ""));

        let first = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.call("", Command::new("A").with_id(5)).await })
        };
        wait_for_pending(&client, 1).await;

        let err = client
            .call("", Command::new("B").with_id(5))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::DuplicateId(5)));
        assert!(client.is_pending(5));
        first.abort();
    }

    #[tokio::test]
    async fn send_failure_keeps_waiting_by_default() {
        let (codec, mut remote) = mock();
        remote.fail_send.store(true, Ordering::SeqCst);
        let client = Arc::new(Client::from_codec(codec, ""));

        let call = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.call("", Command::new("A").with_id(3)).await })
        };
        wait_for_pending(&client, 1).await;
        assert!(remote.outbound.try_recv().is_err());

        remote.reply(Response::ok(3, None));
        assert_eq!(call.await.unwrap().unwrap().id, 3);
    }

    #[tokio::test]
    async fn send_failure_fails_fast_when_enabled() {
        let (codec, remote) = mock();
        remote.fail_send.store(true, Ordering::SeqCst);
        let options = ConnectOptions::default().with_fail_fast_send(true);
        let client = Client::from_codec_with_options(codec, &options);

        let err = client
            .call("", Command::new("A").with_id(4))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Send { id: 4, .. }));
        assert!(!client.is_pending(4));
    }

    #[tokio::test]
    async fn generated_ids_are_unique_under_concurrency() {
        let (codec, mut remote) = mock();
        let client = Arc::new(Client::from_codec(codec, ""));

        let calls: Vec<_> = (0..64)
            .map(|_| {
                let client = Arc::clone(&client);
                tokio::spawn(async move { client.call("", Command::new("Id")).await })
            })
            .collect();

        let mut ids = HashSet::new();
        for _ in 0..64 {
            let frame = remote.next_request().await;
            let id = frame.cmd.unwrap().id;
            assert!(ids.insert(id), "duplicate id {id}");
            remote.reply(Response::ok(id, None));
        }
        for call in calls {
            call.await.unwrap().unwrap();
        }
    }

    #[tokio::test]
    async fn call_checked_surfaces_status() {
        let (codec, mut remote) = mock();
        let client = Arc::new(Client::from_codec(codec, ""));

        let call = {
            let client = Arc::clone(&client);
            tokio::spawn(async move {
                client
                    .call_checked("", Command::new("Fail"), Duration::from_secs(5))
                    .await
            })
        };
        let id = remote.next_request().await.cmd.unwrap().id;
        remote.reply(Response::error(id, 404, "no such method"));

        match call.await.unwrap() {
            Err(ClientError::Status(err)) => {
                assert_eq!(err.to_string(), "(404) no such method");
            }
            other => panic!("expected status error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn disconnect_fails_outstanding_calls_and_stops_the_loop() {
        let (codec, _remote) = mock();
        let client = Arc::new(Client::from_codec(codec, ""));

        let call = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.call("", Command::new("Hang")).await })
        };
        wait_for_pending(&client, 1).await;

        client.disconnect().await.unwrap();
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert!(matches!(
            call.await.unwrap(),
            Err(ClientError::ConnectionLost { .. })
        ));
        client.disconnect().await.unwrap();
    }
}
