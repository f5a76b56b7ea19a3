//! In-process transport.
//!
//! Every connection opened through a [`MemoryTransportFactory`] writes what
//! it does into a shared journal, and events can be injected per
//! connection. Used by the test suites and handy for driving a session
//! without a bus.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use dunebugger_protocol::{InboundEnvelope, OutboundRequest};
use tokio::sync::{mpsc, Notify};
use tracing::debug;

use super::{Transport, TransportError, TransportEvent, TransportFactory, TransportLink};

/// One thing a memory connection did, in order of occurrence.
#[derive(Debug, Clone, PartialEq)]
pub enum MemoryRecord {
    Opened {
        connection: usize,
        bus_url: String,
    },
    Joined {
        connection: usize,
        group: String,
    },
    Sent {
        connection: usize,
        group: String,
        request: OutboundRequest,
    },
    Stopped {
        connection: usize,
    },
}

impl MemoryRecord {
    /// Index of the connection that produced the record.
    pub fn connection(&self) -> usize {
        match self {
            MemoryRecord::Opened { connection, .. }
            | MemoryRecord::Joined { connection, .. }
            | MemoryRecord::Sent { connection, .. }
            | MemoryRecord::Stopped { connection } => *connection,
        }
    }
}

#[derive(Default)]
struct Shared {
    journal: Mutex<Vec<MemoryRecord>>,
    senders: Mutex<Vec<mpsc::UnboundedSender<TransportEvent>>>,
    changed: Notify,
    fail_sends: AtomicBool,
}

impl Shared {
    fn record(&self, record: MemoryRecord) {
        debug!(?record, "Memory transport activity");
        lock(&self.journal).push(record);
        self.changed.notify_waiters();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Factory for in-memory connections. Clones share the same journal.
#[derive(Clone, Default)]
pub struct MemoryTransportFactory {
    shared: Arc<Shared>,
}

impl MemoryTransportFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything recorded so far.
    pub fn journal(&self) -> Vec<MemoryRecord> {
        lock(&self.shared.journal).clone()
    }

    /// Number of connections opened so far.
    pub fn connection_count(&self) -> usize {
        lock(&self.shared.senders).len()
    }

    /// Requests sent on `connection`, in order.
    pub fn sent(&self, connection: usize) -> Vec<OutboundRequest> {
        lock(&self.shared.journal)
            .iter()
            .filter_map(|record| match record {
                MemoryRecord::Sent {
                    connection: c,
                    request,
                    ..
                } if *c == connection => Some(request.clone()),
                _ => None,
            })
            .collect()
    }

    /// Makes every subsequent send fail with [`TransportError::Send`].
    pub fn set_fail_sends(&self, fail: bool) {
        self.shared.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// Injects an event on `connection`.
    ///
    /// Returns false if the connection does not exist or its receiver is gone.
    pub fn emit(&self, connection: usize, event: TransportEvent) -> bool {
        match lock(&self.shared.senders).get(connection) {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }

    /// Delivers an envelope on `connection` as group message data.
    pub fn deliver(&self, connection: usize, envelope: &InboundEnvelope) -> bool {
        match serde_json::to_value(envelope) {
            Ok(data) => self.emit(connection, TransportEvent::GroupMessage(data)),
            Err(_) => false,
        }
    }

    /// Waits until the journal satisfies `predicate`.
    pub async fn wait_until<F>(&self, predicate: F)
    where
        F: Fn(&[MemoryRecord]) -> bool,
    {
        loop {
            let changed = self.shared.changed.notified();
            let satisfied = predicate(&lock(&self.shared.journal));
            if satisfied {
                return;
            }
            changed.await;
        }
    }
}

impl TransportFactory for MemoryTransportFactory {
    fn connect(&self, bus_url: &str) -> Result<TransportLink, TransportError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let connection = {
            let mut senders = lock(&self.shared.senders);
            senders.push(tx);
            senders.len() - 1
        };

        self.shared.record(MemoryRecord::Opened {
            connection,
            bus_url: bus_url.to_string(),
        });

        Ok(TransportLink {
            transport: Arc::new(MemoryTransport {
                connection,
                shared: self.shared.clone(),
            }),
            events: rx,
        })
    }
}

struct MemoryTransport {
    connection: usize,
    shared: Arc<Shared>,
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn join_group(&self, group: &str) -> Result<(), TransportError> {
        self.shared.record(MemoryRecord::Joined {
            connection: self.connection,
            group: group.to_string(),
        });
        Ok(())
    }

    async fn send_to_group(
        &self,
        group: &str,
        request: &OutboundRequest,
    ) -> Result<(), TransportError> {
        if self.shared.fail_sends.load(Ordering::SeqCst) {
            return Err(TransportError::Send("memory transport refused".to_string()));
        }
        self.shared.record(MemoryRecord::Sent {
            connection: self.connection,
            group: group.to_string(),
            request: request.clone(),
        });
        Ok(())
    }

    async fn stop(&self) {
        self.shared.record(MemoryRecord::Stopped {
            connection: self.connection,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_connect_records_and_delivers_events() {
        let factory = MemoryTransportFactory::new();
        let mut link = factory.connect("wss://bus.example").unwrap();

        assert_eq!(factory.connection_count(), 1);
        assert_eq!(
            factory.journal(),
            vec![MemoryRecord::Opened {
                connection: 0,
                bus_url: "wss://bus.example".to_string()
            }]
        );

        assert!(factory.emit(
            0,
            TransportEvent::Connected {
                connection_id: "c1".to_string()
            }
        ));
        assert_eq!(
            link.events.recv().await,
            Some(TransportEvent::Connected {
                connection_id: "c1".to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_send_and_stop_are_journaled() {
        let factory = MemoryTransportFactory::new();
        let link = factory.connect("wss://bus.example").unwrap();
        let request = OutboundRequest::new("refresh", json!("null"), Some("c1".to_string()));

        link.transport.join_group("deviceA").await.unwrap();
        link.transport.send_to_group("deviceA", &request).await.unwrap();
        link.transport.stop().await;

        assert_eq!(factory.sent(0), vec![request]);
        assert!(matches!(
            factory.journal().last(),
            Some(MemoryRecord::Stopped { connection: 0 })
        ));
    }

    #[tokio::test]
    async fn test_failing_sends() {
        let factory = MemoryTransportFactory::new();
        let link = factory.connect("wss://bus.example").unwrap();
        factory.set_fail_sends(true);

        let request = OutboundRequest::new("refresh", json!("null"), None);
        let result = link.transport.send_to_group("deviceA", &request).await;

        assert!(matches!(result, Err(TransportError::Send(_))));
        assert!(factory.sent(0).is_empty());
    }

    #[test]
    fn test_emit_to_unknown_connection() {
        let factory = MemoryTransportFactory::new();
        assert!(!factory.emit(3, TransportEvent::Error("x".to_string())));
    }
}
