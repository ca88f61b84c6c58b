use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use mgrpc_frame::Response;
use mgrpc_transport::TransportError;
use tokio::sync::oneshot;

use crate::error::ClientError;

pub(crate) type SharedError = Arc<TransportError>;

/// Delivery slots for one outstanding call. Exactly one is ever filled.
struct PendingRequest {
    response: oneshot::Sender<Response>,
    error: oneshot::Sender<SharedError>,
}

/// Receiving half handed back to the caller on registration.
pub(crate) struct Waiter {
    response: oneshot::Receiver<Response>,
    error: oneshot::Receiver<SharedError>,
}

pub(crate) enum Outcome {
    Response(Response),
    Failed(SharedError),
    /// Both slots were dropped without delivery.
    Abandoned,
}

impl Waiter {
    pub(crate) async fn wait(self) -> Outcome {
        let Waiter {
            mut response,
            mut error,
        } = self;
        tokio::select! {
            received = &mut response => match received {
                Ok(response) => Outcome::Response(response),
                Err(_) => match error.await {
                    Ok(err) => Outcome::Failed(err),
                    Err(_) => Outcome::Abandoned,
                },
            },
            failed = &mut error => match failed {
                Ok(err) => Outcome::Failed(err),
                Err(_) => match response.await {
                    Ok(response) => Outcome::Response(response),
                    Err(_) => Outcome::Abandoned,
                },
            },
        }
    }
}

#[derive(Default)]
struct TableState {
    entries: HashMap<i64, PendingRequest>,
    /// Set once the receive loop has stopped; later registrations fail with it.
    closed: Option<SharedError>,
}

/// Outstanding calls keyed by request ID.
///
/// Shared by callers (register, remove) and the receive loop (complete,
/// fail). Deliveries happen after the entry is removed and the lock is
/// released.
#[derive(Default)]
pub(crate) struct PendingTable {
    state: Mutex<TableState>,
}

impl PendingTable {
    fn lock(&self) -> MutexGuard<'_, TableState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn register(&self, id: i64) -> Result<Waiter, ClientError> {
        let mut state = self.lock();
        if let Some(source) = &state.closed {
            return Err(ClientError::ConnectionLost {
                id,
                source: Arc::clone(source),
            });
        }
        if state.entries.contains_key(&id) {
            return Err(ClientError::DuplicateId(id));
        }
        let (response_tx, response_rx) = oneshot::channel();
        let (error_tx, error_rx) = oneshot::channel();
        state.entries.insert(
            id,
            PendingRequest {
                response: response_tx,
                error: error_tx,
            },
        );
        Ok(Waiter {
            response: response_rx,
            error: error_rx,
        })
    }

    /// Route a response to its caller. Returns false if nobody is waiting.
    pub(crate) fn complete(&self, response: Response) -> bool {
        let entry = self.lock().entries.remove(&response.id);
        match entry {
            Some(entry) => {
                // A caller that gave up between removal and delivery is fine.
                let _ = entry.response.send(response);
                true
            }
            None => false,
        }
    }

    /// Drop an entry without delivering anything.
    pub(crate) fn remove(&self, id: i64) -> bool {
        self.lock().entries.remove(&id).is_some()
    }

    /// Fail every outstanding call with `err` and refuse new ones.
    ///
    /// Returns the number of calls failed.
    pub(crate) fn fail_all(&self, err: SharedError) -> usize {
        let drained: Vec<PendingRequest> = {
            let mut state = self.lock();
            state.closed = Some(Arc::clone(&err));
            state.entries.drain().map(|(_, entry)| entry).collect()
        };
        let count = drained.len();
        for entry in drained {
            let _ = entry.error.send(Arc::clone(&err));
        }
        count
    }

    pub(crate) fn contains(&self, id: i64) -> bool {
        self.lock().entries.contains_key(&id)
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn response_reaches_its_waiter() {
        let table = PendingTable::default();
        let waiter = table.register(7).unwrap();
        assert!(table.contains(7));

        assert!(table.complete(Response::ok(7, None)));
        assert!(!table.contains(7));
        match waiter.wait().await {
            Outcome::Response(response) => assert_eq!(response.id, 7),
            _ => panic!("expected a response"),
        }
    }

    #[test]
    fn unknown_response_is_not_delivered() {
        let table = PendingTable::default();
        let _waiter = table.register(1).unwrap();
        assert!(!table.complete(Response::ok(2, None)));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn duplicate_id_is_rejected_while_outstanding() {
        let table = PendingTable::default();
        let _waiter = table.register(5).unwrap();
        assert!(matches!(table.register(5), Err(ClientError::DuplicateId(5))));

        assert!(table.remove(5));
        assert!(table.register(5).is_ok());
    }

    #[tokio::test]
    async fn fail_all_reaches_every_waiter_once() {
        let table = PendingTable::default();
        let waiters: Vec<_> = (1..=4).map(|id| table.register(id).unwrap()).collect();

        let failed = table.fail_all(Arc::new(TransportError::ConnectionClosed));
        assert_eq!(failed, 4);
        assert_eq!(table.len(), 0);

        for waiter in waiters {
            match waiter.wait().await {
                Outcome::Failed(err) => {
                    assert!(matches!(*err, TransportError::ConnectionClosed))
                }
                _ => panic!("expected the shared failure"),
            }
        }
    }

    #[test]
    fn registration_after_failure_is_refused() {
        let table = PendingTable::default();
        table.fail_all(Arc::new(TransportError::Closed));
        assert!(matches!(
            table.register(9),
            Err(ClientError::ConnectionLost { id: 9, .. })
        ));
    }

    #[tokio::test]
    async fn removed_entry_is_abandoned() {
        let table = PendingTable::default();
        let waiter = table.register(3).unwrap();
        table.remove(3);
        assert!(matches!(waiter.wait().await, Outcome::Abandoned));
    }
}
