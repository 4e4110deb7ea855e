//! Keyed pool of reusable outbound SSH clients (spec.md §4.4). Modelled,
//! per spec.md §9, as a single-threaded cooperative owner loop served by
//! request/reply channels rather than a map behind a mutex, so "pick
//! least-loaded and insert on miss" stays a single atomic step. Generic
//! over the concrete client type so this crate does not depend on
//! `bastion-ssh`; the Dialer supplies the client and implements
//! [`CacheableClient`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bastion_common::model::ClientKey;
use tokio::sync::{mpsc, oneshot};
use tracing::info;

const IDLE_GC_INTERVAL: Duration = Duration::from_secs(60);

#[async_trait]
pub trait CacheableClient: Send + Sync + 'static {
    async fn close(&self);
}

pub struct ClientEntry<C: CacheableClient> {
    pub client: Arc<C>,
    ref_count: AtomicI64,
    #[allow(dead_code)]
    insertion_time: Instant,
}

impl<C: CacheableClient> ClientEntry<C> {
    pub fn ref_count(&self) -> i64 {
        self.ref_count.load(Ordering::SeqCst)
    }

    /// Opens a new logical use of this client; the caller is responsible
    /// for actually opening the SSH session on `client`.
    pub fn acquire(&self) -> i64 {
        self.ref_count.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn release(&self) -> i64 {
        self.ref_count.fetch_sub(1, Ordering::SeqCst) - 1
    }
}

struct Group<C: CacheableClient> {
    name: String,
    clients: Vec<Arc<ClientEntry<C>>>,
}

enum Command<C: CacheableClient> {
    Lookup {
        key: ClientKey,
        reply: oneshot::Sender<Option<Arc<ClientEntry<C>>>>,
    },
    PrefixLookup {
        prefix: String,
        reply: oneshot::Sender<Option<Arc<ClientEntry<C>>>>,
    },
    Store {
        key: ClientKey,
        client: Arc<C>,
        reply: oneshot::Sender<Arc<ClientEntry<C>>>,
    },
}

#[derive(Clone)]
pub struct ClientCache<C: CacheableClient> {
    tx: mpsc::Sender<Command<C>>,
}

impl<C: CacheableClient> ClientCache<C> {
    pub fn spawn() -> Self {
        let (tx, rx) = mpsc::channel(256);
        tokio::spawn(Self::run(rx));
        Self { tx }
    }

    /// Returns the **lowest**-refcount client in the group, per spec.md
    /// §4.4. The original source's comparison (`refCount <=
    /// clientItem.RefCount()` against a rising threshold) almost always
    /// selects the *last* scanned client instead — an open question
    /// (spec.md §9) not silently corrected there. Here the comparison is
    /// written straightforwardly as a true minimum-refcount scan; the
    /// ambiguity is recorded in DESIGN.md rather than reproduced as a bug.
    pub async fn lookup(&self, key: ClientKey) -> Option<Arc<ClientEntry<C>>> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(Command::Lookup { key, reply }).await.ok()?;
        rx.await.ok().flatten()
    }

    pub async fn prefix_lookup(&self, prefix: impl Into<String>) -> Option<Arc<ClientEntry<C>>> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::PrefixLookup {
                prefix: prefix.into(),
                reply,
            })
            .await
            .ok()?;
        rx.await.ok().flatten()
    }

    pub async fn store(&self, key: ClientKey, client: Arc<C>) -> Option<Arc<ClientEntry<C>>> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(Command::Store { key, client, reply }).await.ok()?;
        rx.await.ok()
    }

    async fn run(mut rx: mpsc::Receiver<Command<C>>) {
        let mut groups: HashMap<ClientKey, Group<C>> = HashMap::new();
        let mut gc_tick = tokio::time::interval(IDLE_GC_INTERVAL);
        gc_tick.tick().await;

        loop {
            tokio::select! {
                Some(cmd) = rx.recv() => {
                    match cmd {
                        Command::Lookup { key, reply } => {
                            let entry = groups.get(&key).and_then(|group| {
                                group
                                    .clients
                                    .iter()
                                    .min_by_key(|c| c.ref_count())
                                    .cloned()
                            });
                            let _ = reply.send(entry);
                        }
                        Command::PrefixLookup { prefix, reply } => {
                            let entry = groups
                                .iter()
                                .find(|(key, _)| key.0.starts_with(&prefix))
                                .and_then(|(_, group)| group.clients.first().cloned());
                            let _ = reply.send(entry);
                        }
                        Command::Store { key, client, reply } => {
                            let entry = Arc::new(ClientEntry {
                                client,
                                ref_count: AtomicI64::new(0),
                                insertion_time: Instant::now(),
                            });
                            groups
                                .entry(key.clone())
                                .or_insert_with(|| Group { name: key.0.clone(), clients: Vec::new() })
                                .clients
                                .push(entry.clone());
                            let _ = reply.send(entry);
                        }
                    }
                }
                _ = gc_tick.tick() => {
                    let mut empty_groups = Vec::new();
                    for (key, group) in groups.iter_mut() {
                        let mut remaining = Vec::with_capacity(group.clients.len());
                        for entry in group.clients.drain(..) {
                            if entry.ref_count() <= 0 {
                                entry.client.close().await;
                                info!(group = %group.name, "idle-GC closed client");
                            } else {
                                remaining.push(entry);
                            }
                        }
                        group.clients = remaining;
                        if group.clients.is_empty() {
                            empty_groups.push(key.clone());
                        }
                    }
                    for key in empty_groups {
                        groups.remove(&key);
                    }
                }
                else => break,
            }
        }
    }
}

/// Reuse predicate invoked by Frontend/Dialer (spec.md §4.4): reuse is
/// allowed only when globally enabled, the asset is Linux, and the
/// system-user's protocol is ssh.
pub fn reuse_allowed(reuse_connection_enabled: bool, asset_platform: &str, system_user_protocol: &str) -> bool {
    reuse_connection_enabled
        && asset_platform.eq_ignore_ascii_case("linux")
        && system_user_protocol.eq_ignore_ascii_case("ssh")
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopClient;

    #[async_trait]
    impl CacheableClient for NoopClient {
        async fn close(&self) {}
    }

    #[tokio::test]
    async fn acquire_then_release_restores_refcount() {
        let cache = ClientCache::<NoopClient>::spawn();
        let key = ClientKey("u_a_s_1.2.3.4_root".into());
        let entry = cache.store(key.clone(), Arc::new(NoopClient)).await.unwrap();

        assert_eq!(entry.ref_count(), 0);
        entry.acquire();
        entry.acquire();
        assert_eq!(entry.ref_count(), 2);
        entry.release();
        entry.release();
        assert_eq!(entry.ref_count(), 0);
    }

    #[tokio::test]
    async fn lookup_returns_the_lowest_refcount_client() {
        let cache = ClientCache::<NoopClient>::spawn();
        let key = ClientKey("u_a_s_1.2.3.4_root".into());
        let busy = cache.store(key.clone(), Arc::new(NoopClient)).await.unwrap();
        busy.acquire();
        busy.acquire();
        let idle = cache.store(key.clone(), Arc::new(NoopClient)).await.unwrap();
        idle.acquire();

        let found = cache.lookup(key).await.unwrap();
        assert_eq!(found.ref_count(), 1);
    }

    #[test]
    fn reuse_requires_all_three_conditions() {
        assert!(reuse_allowed(true, "Linux", "ssh"));
        assert!(!reuse_allowed(false, "Linux", "ssh"));
        assert!(!reuse_allowed(true, "Windows", "ssh"));
        assert!(!reuse_allowed(true, "Linux", "rdp"));
    }

    /// S5: two concurrent sessions for the same ClientKey share one
    /// outbound client instead of each storing their own.
    #[tokio::test]
    async fn two_concurrent_sessions_share_one_client() {
        let cache = ClientCache::<NoopClient>::spawn();
        let key = ClientKey("u_a_s_1.2.3.4_root".into());

        let first = cache.store(key.clone(), Arc::new(NoopClient)).await.unwrap();
        first.acquire();

        let reused = cache.lookup(key).await.expect("second session reuses the first client");
        assert!(Arc::ptr_eq(&first, &reused));
        reused.acquire();
        assert_eq!(first.ref_count(), 2);

        first.release();
        reused.release();
        assert_eq!(first.ref_count(), 0);
    }
}
