//! An in-process broker with partitions and consumer groups, for tests and
//! for running workers without a Kafka cluster.

use std::collections::{BTreeMap, HashMap};
use std::hash::Hasher;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use siphasher::sip::SipHasher13;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;

use crate::config::{ConnectionConfig, OffsetReset};
use crate::message::Message;
use crate::source::{
    validate_stream_name, ConnectionError, SourceConnector, StreamSource, TransientError,
};

pub const DEFAULT_MEMORY_ADDRESS: &str = "memory:9092";

/// Handle to a shared in-memory broker. Clones refer to the same broker.
#[derive(Clone)]
pub struct MemoryBroker {
    address: String,
    partitions: usize,
    state: Arc<Mutex<BrokerState>>,
    published: Arc<Notify>,
}

#[derive(Default)]
struct BrokerState {
    reachable: bool,
    streams: HashMap<String, Stream>,
    // (group, stream) -> next offset to hand out, per partition
    groups: HashMap<(String, String), Vec<usize>>,
    failing_polls: HashMap<String, usize>,
    round_robin: usize,
}

struct Stream {
    partitions: Vec<Vec<Message>>,
}

impl MemoryBroker {
    pub fn new(partitions: usize) -> Self {
        Self::with_address(DEFAULT_MEMORY_ADDRESS, partitions)
    }

    pub fn with_address(address: &str, partitions: usize) -> Self {
        let state = BrokerState {
            reachable: true,
            ..Default::default()
        };
        Self {
            address: address.to_owned(),
            partitions: partitions.max(1),
            state: Arc::new(Mutex::new(state)),
            published: Arc::new(Notify::new()),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// A connector whose sources all talk to this broker.
    pub fn connector(&self) -> MemoryConnector {
        MemoryConnector {
            broker: self.clone(),
        }
    }

    /// Append a message to `stream` and return its `(partition, offset)`.
    ///
    /// Keyed messages always land on the same partition; keyless ones are spread round-robin.
    pub fn publish(
        &self,
        stream: &str,
        key: Option<&[u8]>,
        value: &[u8],
        headers: BTreeMap<String, Vec<u8>>,
    ) -> (i32, i64) {
        let mut state = self.lock();
        let partition_count = self.partitions;
        let partition = match key {
            Some(key) => {
                let mut hasher = SipHasher13::new();
                hasher.write(key);
                (hasher.finish() % partition_count as u64) as usize
            }
            None => {
                state.round_robin = state.round_robin.wrapping_add(1);
                state.round_robin % partition_count
            }
        };

        let stream_state = state
            .streams
            .entry(stream.to_owned())
            .or_insert_with(|| Stream {
                partitions: vec![Vec::new(); partition_count],
            });
        let log = &mut stream_state.partitions[partition];
        let offset = log.len() as i64;
        log.push(Message {
            stream: stream.to_owned(),
            key: key.map(<[u8]>::to_vec),
            value: value.to_vec(),
            headers,
            partition: partition as i32,
            offset,
        });
        drop(state);

        self.published.notify_waiters();
        (partition as i32, offset)
    }

    /// Total number of messages ever published to `stream`.
    pub fn stream_len(&self, stream: &str) -> usize {
        self.lock()
            .streams
            .get(stream)
            .map(|s| s.partitions.iter().map(Vec::len).sum())
            .unwrap_or(0)
    }

    /// Make subsequent `connect` calls fail as if the broker was down.
    pub fn set_reachable(&self, reachable: bool) {
        self.lock().reachable = reachable;
    }

    /// The next `count` polls on `stream`, from any group, fail with a transient error.
    pub fn fail_next_polls(&self, stream: &str, count: usize) {
        self.lock().failing_polls.insert(stream.to_owned(), count);
        self.published.notify_waiters();
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        // A panic while holding the lock leaves plain data behind, keep serving it.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn join_group(&self, group: &str, stream: &str, offset_reset: OffsetReset) {
        let mut state = self.lock();
        let partition_count = self.partitions;
        let start: Vec<usize> = match offset_reset {
            OffsetReset::Earliest => vec![0; partition_count],
            OffsetReset::Latest => (0..partition_count)
                .map(|p| {
                    state
                        .streams
                        .get(stream)
                        .map(|s| s.partitions[p].len())
                        .unwrap_or(0)
                })
                .collect(),
        };
        state
            .groups
            .entry((group.to_owned(), stream.to_owned()))
            .or_insert(start);
    }

    /// Hand out the next message for the group and commit it in the same step.
    fn take_next(
        &self,
        group: &str,
        stream: &str,
        first_partition: usize,
    ) -> Result<Option<Message>, TransientError> {
        let mut state = self.lock();

        if let Some(remaining) = state.failing_polls.get_mut(stream) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(TransientError::Unavailable(format!(
                    "leader for {stream} is not available"
                )));
            }
        }

        let BrokerState {
            streams, groups, ..
        } = &mut *state;
        let Some(stream_state) = streams.get(stream) else {
            return Ok(None);
        };
        let Some(cursors) = groups.get_mut(&(group.to_owned(), stream.to_owned())) else {
            return Ok(None);
        };

        let partition_count = cursors.len();
        for i in 0..partition_count {
            let partition = (first_partition + i) % partition_count;
            let log = &stream_state.partitions[partition];
            if let Some(message) = log.get(cursors[partition]) {
                cursors[partition] += 1;
                return Ok(Some(message.clone()));
            }
        }
        Ok(None)
    }
}

#[derive(Clone)]
pub struct MemoryConnector {
    broker: MemoryBroker,
}

#[async_trait]
impl SourceConnector for MemoryConnector {
    async fn connect(
        &self,
        config: &ConnectionConfig,
    ) -> Result<Box<dyn StreamSource>, ConnectionError> {
        config.validate().map_err(ConnectionError::InvalidConfig)?;

        let reachable = self.broker.lock().reachable;
        if !reachable || !config.endpoints.iter().any(|e| e == self.broker.address()) {
            return Err(ConnectionError::Unreachable {
                endpoints: config.bootstrap_servers(),
                reason: "connection refused".to_owned(),
            });
        }

        Ok(Box::new(MemorySource {
            broker: self.broker.clone(),
            group: config.group_id.clone(),
            offset_reset: config.offset_reset,
            subscribed: None,
            next_partition: 0,
            closed: false,
        }))
    }
}

pub struct MemorySource {
    broker: MemoryBroker,
    group: String,
    offset_reset: OffsetReset,
    subscribed: Option<String>,
    next_partition: usize,
    closed: bool,
}

#[async_trait]
impl StreamSource for MemorySource {
    fn subscribe(&mut self, stream: &str) -> Result<(), ConnectionError> {
        validate_stream_name(stream)?;
        if self.closed {
            return Err(ConnectionError::InvalidConfig(
                "cannot subscribe a closed source".to_owned(),
            ));
        }
        if self.subscribed.as_deref() == Some(stream) {
            return Ok(());
        }

        self.broker.join_group(&self.group, stream, self.offset_reset);
        self.subscribed = Some(stream.to_owned());
        Ok(())
    }

    async fn poll(&mut self, timeout: Duration) -> Result<Option<Message>, TransientError> {
        if self.closed {
            return Err(TransientError::Unavailable(
                "source has been closed".to_owned(),
            ));
        }
        let Some(stream) = self.subscribed.clone() else {
            return Err(TransientError::Unavailable(
                "source is not subscribed".to_owned(),
            ));
        };

        let deadline = Instant::now() + timeout;
        loop {
            // Register for wakeups before looking, so a publish in between is not missed.
            let published = self.broker.published.notified();
            tokio::pin!(published);
            published.as_mut().enable();

            if let Some(message) =
                self.broker
                    .take_next(&self.group, &stream, self.next_partition)?
            {
                self.next_partition = self.next_partition.wrapping_add(1);
                return Ok(Some(message));
            }

            if tokio::time::timeout_at(deadline, published).await.is_err() {
                return Ok(None);
            }
        }
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            debug!(group = %self.group, stream = ?self.subscribed, "memory source closed");
        }
    }
}
