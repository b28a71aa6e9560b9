use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Reasoning artifacts captured from one upstream response, immutable once
/// stored. Signatures are opaque blobs keyed by tool-call id.
#[derive(Debug, Clone)]
pub struct ThoughtSignatureEntry {
    pub message_id: String,
    pub signatures: HashMap<String, String>,
    pub tool_call_ids: HashSet<String>,
    pub conversation_id: Option<String>,
}

struct StoredEntry {
    entry: ThoughtSignatureEntry,
    stored_at: Instant,
    /// Insertion order, used as the recency tiebreaker.
    seq: u64,
}

struct Inner {
    entries: HashMap<u64, StoredEntry>,
    by_tool_call: HashMap<String, Vec<u64>>,
    by_conversation: HashMap<String, Vec<u64>>,
    next_seq: u64,
}

/// TTL + capacity bounded store of thought-signature entries with two
/// auxiliary indices: by tool-call id and by conversation id.
///
/// All mutators and readers go through a single lock; operations are
/// O(|ids|) on average.
pub struct SignatureCache {
    inner: Mutex<Inner>,
    ttl: Duration,
    max_entries: usize,
}

impl SignatureCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                by_tool_call: HashMap::new(),
                by_conversation: HashMap::new(),
                next_seq: 0,
            }),
            ttl,
            max_entries: max_entries.max(1),
        }
    }

    pub fn insert(&self, entry: ThoughtSignatureEntry) {
        let mut inner = self.inner.lock().expect("signature cache lock poisoned");
        Self::purge(&mut inner, self.ttl);

        if inner.entries.len() >= self.max_entries {
            Self::evict_oldest(&mut inner, self.max_entries);
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;

        for id in &entry.tool_call_ids {
            inner.by_tool_call.entry(id.clone()).or_default().push(seq);
        }
        if let Some(conv) = &entry.conversation_id {
            inner
                .by_conversation
                .entry(conv.clone())
                .or_default()
                .push(seq);
        }
        inner.entries.insert(
            seq,
            StoredEntry {
                entry,
                stored_at: Instant::now(),
                seq,
            },
        );
    }

    /// Find the entry whose stored tool-call id set best overlaps the given
    /// ids, scoped to the conversation when one is supplied. Ties break to
    /// the most recently stored entry.
    pub fn retrieve(
        &self,
        tool_call_ids: &HashSet<String>,
        conversation_id: Option<&str>,
    ) -> Option<HashMap<String, String>> {
        let mut inner = self.inner.lock().expect("signature cache lock poisoned");
        Self::purge(&mut inner, self.ttl);

        let mut candidates: HashSet<u64> = HashSet::new();
        for id in tool_call_ids {
            if let Some(seqs) = inner.by_tool_call.get(id) {
                candidates.extend(seqs.iter().copied());
            }
        }
        if let Some(conv) = conversation_id {
            let scoped: HashSet<u64> = inner
                .by_conversation
                .get(conv)
                .map(|seqs| seqs.iter().copied().collect())
                .unwrap_or_default();
            candidates.retain(|seq| scoped.contains(seq));
        }

        candidates
            .into_iter()
            .filter_map(|seq| inner.entries.get(&seq))
            .map(|stored| {
                let overlap = stored
                    .entry
                    .tool_call_ids
                    .intersection(tool_call_ids)
                    .count();
                (overlap, stored.seq, stored)
            })
            .filter(|(overlap, _, _)| *overlap > 0)
            .max_by_key(|(overlap, seq, _)| (*overlap, *seq))
            .map(|(_, _, stored)| stored.entry.signatures.clone())
    }

    /// Drop entries older than the TTL. Also invoked inline by mutators.
    pub fn purge_expired(&self) {
        let mut inner = self.inner.lock().expect("signature cache lock poisoned");
        Self::purge(&mut inner, self.ttl);
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .expect("signature cache lock poisoned")
            .entries
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Spawn a background task sweeping expired entries on an interval.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                cache.purge_expired();
            }
        });
    }

    fn purge(inner: &mut Inner, ttl: Duration) {
        let expired: Vec<u64> = inner
            .entries
            .values()
            .filter(|stored| stored.stored_at.elapsed() > ttl)
            .map(|stored| stored.seq)
            .collect();
        Self::remove(inner, &expired);
    }

    /// Evict the oldest ~10% of entries (at least one) to make room.
    fn evict_oldest(inner: &mut Inner, max_entries: usize) {
        let count = (max_entries / 10).max(1);
        let mut seqs: Vec<u64> = inner.entries.keys().copied().collect();
        seqs.sort_unstable();
        seqs.truncate(count);
        Self::remove(inner, &seqs);
    }

    fn remove(inner: &mut Inner, seqs: &[u64]) {
        for seq in seqs {
            if let Some(stored) = inner.entries.remove(seq) {
                for id in &stored.entry.tool_call_ids {
                    if let Some(refs) = inner.by_tool_call.get_mut(id) {
                        refs.retain(|s| s != seq);
                        if refs.is_empty() {
                            inner.by_tool_call.remove(id);
                        }
                    }
                }
                if let Some(conv) = &stored.entry.conversation_id
                    && let Some(refs) = inner.by_conversation.get_mut(conv)
                {
                    refs.retain(|s| s != seq);
                    if refs.is_empty() {
                        inner.by_conversation.remove(conv);
                    }
                }
            }
        }
    }
}
