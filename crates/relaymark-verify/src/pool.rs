//! Bounded-concurrency relay pool and the per-(relay, writer) query
//! cache.
//!
//! The pool speaks NIP-01 frames directly over `tokio-tungstenite`:
//! send a `REQ`, collect `EVENT` frames until `EOSE` or the timeout,
//! then `CLOSE`. A timeout is a degraded success: whatever arrived is
//! kept and the relay's outcome records `reached_eose = false`.
//!
//! Sockets are taken out of the shared table while in use and returned
//! idle afterwards, so the table mutex is never held across an await.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::Semaphore;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use relaymark_core::{Pubkey, RelayUrl};

use crate::types::{Phase2Options, RelayOutcome};

/// Cache-size high-water mark that triggers a warning.
const CACHE_WARN_EVENT_IDS: usize = 500_000;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Minimal event shape: everything the benchmark reads.
#[derive(Debug, Clone, Deserialize)]
pub struct NostrEvent {
    pub id: String,
    pub pubkey: String,
    pub created_at: i64,
}

/// Subscription filter for a batched query.
#[derive(Debug, Clone)]
pub struct QueryFilter {
    pub kinds: Vec<u16>,
    pub since: u64,
}

/// `(relay, writer) -> event ids` cache populated during collection and
/// read back during verification. Insertion overwrites and recounts, so
/// repeating a query never double-counts.
#[derive(Default)]
pub struct QueryCache {
    inner: Mutex<CacheInner>,
}

#[derive(Default)]
struct CacheInner {
    map: BTreeMap<(RelayUrl, Pubkey), BTreeSet<String>>,
    total_event_ids: usize,
}

impl QueryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, relay: &str, pubkey: &str, event_ids: BTreeSet<String>) {
        let mut inner = self.inner.lock();
        let key = (relay.to_string(), pubkey.to_string());
        if let Some(existing) = inner.map.get(&key) {
            inner.total_event_ids -= existing.len();
        }
        inner.total_event_ids += event_ids.len();
        inner.map.insert(key, event_ids);
    }

    pub fn get(&self, relay: &str, pubkey: &str) -> Option<BTreeSet<String>> {
        self.inner
            .lock()
            .map
            .get(&(relay.to_string(), pubkey.to_string()))
            .cloned()
    }

    /// Union of one writer's events across several relays.
    pub fn union_across<'a>(
        &self,
        pubkey: &str,
        relays: impl IntoIterator<Item = &'a RelayUrl>,
    ) -> BTreeSet<String> {
        let inner = self.inner.lock();
        let mut out = BTreeSet::new();
        for relay in relays {
            if let Some(ids) = inner.map.get(&(relay.clone(), pubkey.to_string())) {
                out.extend(ids.iter().cloned());
            }
        }
        out
    }

    pub fn total_entries(&self) -> usize {
        self.inner.lock().map.len()
    }

    pub fn total_event_ids(&self) -> usize {
        self.inner.lock().total_event_ids
    }
}

/// Result of one batched relay query.
#[derive(Debug, Default)]
pub struct QueryBatchResult {
    pub per_pubkey: BTreeMap<Pubkey, BTreeSet<String>>,
    pub reached_eose: bool,
}

struct PooledSocket {
    stream: Socket,
    last_used: Instant,
    idle: bool,
    connect_ms: f64,
}

/// Connection pool: a counting semaphore gates concurrent queries, a
/// socket table capped at `max_open_sockets` reuses connections across
/// queries, evicting idle-then-LRU when full.
pub struct RelayPool {
    semaphore: Semaphore,
    max_open_sockets: usize,
    connect_timeout: Duration,
    eose_timeout: Duration,
    max_events_per_pair: usize,
    connections: Mutex<BTreeMap<RelayUrl, PooledSocket>>,
    outcomes: Mutex<BTreeMap<RelayUrl, RelayOutcome>>,
    sub_counter: AtomicU64,
    subscription_timeouts: AtomicUsize,
}

impl RelayPool {
    pub fn new(options: &Phase2Options) -> Self {
        Self {
            semaphore: Semaphore::new(options.max_concurrent_conns),
            max_open_sockets: options.max_open_sockets,
            connect_timeout: Duration::from_millis(options.connect_timeout_ms),
            eose_timeout: Duration::from_millis(options.eose_timeout_ms),
            max_events_per_pair: options.max_events_per_pair,
            connections: Mutex::new(BTreeMap::new()),
            outcomes: Mutex::new(BTreeMap::new()),
            sub_counter: AtomicU64::new(0),
            subscription_timeouts: AtomicUsize::new(0),
        }
    }

    /// Query one relay for several writers, split into sequential
    /// batches. Results land in `cache`; the relay's outcome is
    /// recorded either way.
    pub async fn query_batched(
        &self,
        relay: &str,
        pubkeys: &[Pubkey],
        filter: &QueryFilter,
        batch_size: usize,
        cache: &QueryCache,
    ) -> QueryBatchResult {
        let Ok(_permit) = self.semaphore.acquire().await else {
            return QueryBatchResult::default();
        };

        let mut socket = match self.take_or_connect(relay).await {
            Some(socket) => socket,
            None => return QueryBatchResult::default(),
        };

        let query_start = Instant::now();
        let mut events_per_pubkey: BTreeMap<&Pubkey, Vec<NostrEvent>> =
            pubkeys.iter().map(|pk| (pk, Vec::new())).collect();
        let mut reached_eose = false;
        let mut timed_out = false;
        let mut first_event_ms: Option<f64> = None;
        let mut socket_error: Option<String> = None;

        'batches: for batch in pubkeys.chunks(batch_size.max(1)) {
            let sub_id = format!("p2-{}", self.sub_counter.fetch_add(1, Ordering::Relaxed));
            let req = build_req(&sub_id, batch, filter);
            if let Err(err) = socket.stream.send(Message::Text(req)).await {
                socket_error = Some(err.to_string());
                break;
            }

            let deadline = Instant::now() + self.eose_timeout;
            loop {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    timed_out = true;
                    self.subscription_timeouts.fetch_add(1, Ordering::Relaxed);
                    break;
                }
                match tokio::time::timeout(remaining, socket.stream.next()).await {
                    Err(_) => {
                        timed_out = true;
                        self.subscription_timeouts.fetch_add(1, Ordering::Relaxed);
                        break;
                    }
                    Ok(None) => {
                        socket_error = Some("connection closed".to_string());
                        break 'batches;
                    }
                    Ok(Some(Err(err))) => {
                        socket_error = Some(err.to_string());
                        break 'batches;
                    }
                    Ok(Some(Ok(Message::Text(text)))) => {
                        match parse_frame(&text, &sub_id) {
                            Frame::Event(event) => {
                                first_event_ms.get_or_insert_with(|| {
                                    query_start.elapsed().as_secs_f64() * 1000.0
                                });
                                if let Some(bucket) =
                                    events_per_pubkey.get_mut(&event.pubkey)
                                {
                                    bucket.push(event);
                                }
                            }
                            Frame::Eose => {
                                reached_eose = true;
                                break;
                            }
                            Frame::Other => {}
                        }
                    }
                    Ok(Some(Ok(_))) => {}
                }
            }

            let close = json!(["CLOSE", sub_id]).to_string();
            let _ = socket.stream.send(Message::Text(close)).await;
        }

        let query_ms = query_start.elapsed().as_secs_f64() * 1000.0;
        let connect_ms = socket.connect_ms;

        if socket_error.is_none() {
            socket.idle = true;
            socket.last_used = Instant::now();
            self.store_socket(relay, socket);
        }

        self.outcomes.lock().insert(
            relay.to_string(),
            RelayOutcome {
                connected: true,
                reached_eose,
                timed_out,
                connect_ms,
                query_ms,
                first_event_ms,
                error: socket_error,
            },
        );

        let mut result = QueryBatchResult {
            per_pubkey: BTreeMap::new(),
            reached_eose,
        };
        for pubkey in pubkeys {
            let events = events_per_pubkey.remove(pubkey).unwrap_or_default();
            let ids = cap_events(events, self.max_events_per_pair);
            cache.set(relay, pubkey, ids.clone());
            result.per_pubkey.insert(pubkey.clone(), ids);
        }

        let cached_ids = cache.total_event_ids();
        if cached_ids > CACHE_WARN_EVENT_IDS {
            warn!(cached_ids, "query cache exceeds high-water mark");
        }

        result
    }

    pub fn outcome(&self, relay: &str) -> Option<RelayOutcome> {
        self.outcomes.lock().get(relay).cloned()
    }

    pub fn all_outcomes(&self) -> BTreeMap<RelayUrl, RelayOutcome> {
        self.outcomes.lock().clone()
    }

    /// Subscription-level timeouts seen so far.
    pub fn timeout_count(&self) -> usize {
        self.subscription_timeouts.load(Ordering::Relaxed)
    }

    pub fn close_all(&self) {
        self.connections.lock().clear();
    }

    async fn take_or_connect(&self, relay: &str) -> Option<PooledSocket> {
        if let Some(mut socket) = self.connections.lock().remove(relay) {
            socket.idle = false;
            socket.last_used = Instant::now();
            return Some(socket);
        }

        let started = Instant::now();
        let connected =
            tokio::time::timeout(self.connect_timeout, connect_async(relay)).await;
        let connect_ms = started.elapsed().as_secs_f64() * 1000.0;

        match connected {
            Ok(Ok((stream, _response))) => {
                debug!(relay, connect_ms, "connected");
                Some(PooledSocket {
                    stream,
                    last_used: Instant::now(),
                    idle: false,
                    connect_ms,
                })
            }
            Ok(Err(err)) => {
                self.record_connect_failure(relay, connect_ms, err.to_string());
                None
            }
            Err(_) => {
                self.record_connect_failure(relay, connect_ms, "connect timeout".to_string());
                None
            }
        }
    }

    fn record_connect_failure(&self, relay: &str, connect_ms: f64, error: String) {
        debug!(relay, error, "connect failed");
        self.outcomes.lock().insert(
            relay.to_string(),
            RelayOutcome {
                connected: false,
                reached_eose: false,
                timed_out: false,
                connect_ms,
                query_ms: 0.0,
                first_event_ms: None,
                error: Some(error),
            },
        );
    }

    fn store_socket(&self, relay: &str, socket: PooledSocket) {
        let mut connections = self.connections.lock();
        while connections.len() >= self.max_open_sockets {
            let candidates: Vec<(RelayUrl, bool, Instant)> = connections
                .iter()
                .map(|(url, s)| (url.clone(), s.idle, s.last_used))
                .collect();
            let Some(victim) = pick_eviction_victim(&candidates) else {
                break;
            };
            connections.remove(&victim);
        }
        connections.insert(relay.to_string(), socket);
    }
}

/// Eviction order: idle sockets by least-recently-used first, then any
/// socket by least-recently-used.
fn pick_eviction_victim(candidates: &[(RelayUrl, bool, Instant)]) -> Option<RelayUrl> {
    candidates
        .iter()
        .filter(|(_, idle, _)| *idle)
        .min_by_key(|(_, _, last_used)| *last_used)
        .or_else(|| candidates.iter().min_by_key(|(_, _, last_used)| *last_used))
        .map(|(url, _, _)| url.clone())
}

/// Keep the newest `cap` events: highest `created_at` first, smallest
/// id on ties.
fn cap_events(mut events: Vec<NostrEvent>, cap: usize) -> BTreeSet<String> {
    if events.len() > cap {
        events.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        events.truncate(cap);
    }
    events.into_iter().map(|e| e.id).collect()
}

enum Frame {
    Event(NostrEvent),
    Eose,
    Other,
}

fn parse_frame(text: &str, sub_id: &str) -> Frame {
    let Ok(value) = serde_json::from_str::<Value>(text) else {
        return Frame::Other;
    };
    let Some(arr) = value.as_array() else {
        return Frame::Other;
    };
    let kind = arr.first().and_then(Value::as_str);
    let id = arr.get(1).and_then(Value::as_str);
    match (kind, id) {
        (Some("EVENT"), Some(id)) if id == sub_id => arr
            .get(2)
            .and_then(|v| serde_json::from_value::<NostrEvent>(v.clone()).ok())
            .map_or(Frame::Other, Frame::Event),
        (Some("EOSE"), Some(id)) if id == sub_id => Frame::Eose,
        _ => Frame::Other,
    }
}

fn build_req(sub_id: &str, authors: &[Pubkey], filter: &QueryFilter) -> String {
    json!([
        "REQ",
        sub_id,
        {
            "kinds": filter.kinds,
            "authors": authors,
            "since": filter.since,
        }
    ])
    .to_string()
}
