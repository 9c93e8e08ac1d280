//! Per-key, per-window state storage.
//!
//! State is addressed by `(key, window)`. The [`StateStore`] trait models the opaque
//! key-value stores runners provide; [`InMemoryStateStore`] keeps live values and
//! [`EncodedStateStore`] keeps everything as bytes produced by [`Coder`]s, the way a remote
//! or on-disk store would.

use crate::coder::{Coder, PostcardCoder};
use crate::combine::Accumulator;
use crate::error::Result;
use crate::time::TimestampMs;
use crate::trigger::TriggerState;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;

/// Storage for state `S` keyed by `(K, W)`.
pub trait StateStore<K, W, S>: Send {
    fn get(&self, key: &K, window: &W) -> Result<Option<S>>;
    fn put(&mut self, key: &K, window: &W, state: S) -> Result<()>;
    fn remove(&mut self, key: &K, window: &W) -> Result<Option<S>>;
    /// Windows that currently hold state for `key`.
    fn windows_for(&self, key: &K) -> Result<Vec<W>>;
    /// Number of `(key, window)` entries.
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    /// Every entry, in no particular order.
    fn entries(&self) -> Result<Vec<(K, W, S)>>;
    fn clear(&mut self);
}

/// State of one window of one key inside the group-also-by-window runner.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WindowState<A> {
    pub accumulator: Accumulator<A>,
    /// Combined output timestamp of the inputs since the last pane.
    pub timestamp: Option<TimestampMs>,
    /// Inputs folded in since the last pane.
    pub pending_elements: u64,
    /// Index of the next pane.
    pub pane_index: u64,
    /// Index of the next non-early pane.
    pub non_speculative_index: i64,
    pub fired_on_time: bool,
    /// The trigger finished; further input for the window is dropped.
    pub closed: bool,
    pub trigger: TriggerState,
}

impl<A> WindowState<A> {
    pub fn new(zero: A) -> Self {
        Self {
            accumulator: Accumulator::new(zero),
            timestamp: None,
            pending_elements: 0,
            pane_index: 0,
            non_speculative_index: 0,
            fired_on_time: false,
            closed: false,
            trigger: TriggerState::default(),
        }
    }
}

/* ===================== InMemoryStateStore ===================== */

/// Live values in a hash map of ordered per-key maps.
#[derive(Clone, Debug)]
pub struct InMemoryStateStore<K, W, S> {
    map: HashMap<K, BTreeMap<W, S>>,
    len: usize,
}

impl<K, W, S> Default for InMemoryStateStore<K, W, S> {
    fn default() -> Self {
        Self { map: HashMap::new(), len: 0 }
    }
}

impl<K, W, S> InMemoryStateStore<K, W, S> {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<K, W, S> StateStore<K, W, S> for InMemoryStateStore<K, W, S>
where
    K: Clone + Eq + Hash + Send,
    W: Clone + Ord + Send,
    S: Clone + Send,
{
    fn get(&self, key: &K, window: &W) -> Result<Option<S>> {
        Ok(self.map.get(key).and_then(|m| m.get(window)).cloned())
    }

    fn put(&mut self, key: &K, window: &W, state: S) -> Result<()> {
        let windows = self.map.entry(key.clone()).or_default();
        if windows.insert(window.clone(), state).is_none() {
            self.len += 1;
        }
        Ok(())
    }

    fn remove(&mut self, key: &K, window: &W) -> Result<Option<S>> {
        let Some(windows) = self.map.get_mut(key) else { return Ok(None) };
        let out = windows.remove(window);
        if out.is_some() {
            self.len -= 1;
        }
        if windows.is_empty() {
            self.map.remove(key);
        }
        Ok(out)
    }

    fn windows_for(&self, key: &K) -> Result<Vec<W>> {
        Ok(self.map.get(key).map(|m| m.keys().cloned().collect()).unwrap_or_default())
    }

    fn len(&self) -> usize {
        self.len
    }

    fn entries(&self) -> Result<Vec<(K, W, S)>> {
        Ok(self
            .map
            .iter()
            .flat_map(|(k, m)| m.iter().map(move |(w, s)| (k.clone(), w.clone(), s.clone())))
            .collect())
    }

    fn clear(&mut self) {
        self.map.clear();
        self.len = 0;
    }
}

/* ===================== EncodedStateStore ===================== */

/// Bytes-in, bytes-out storage: keys, windows and state pass through coders on every
/// access, so values round-trip exactly as they would through an external store.
pub struct EncodedStateStore<K, W, S> {
    map: BTreeMap<Vec<u8>, BTreeMap<Vec<u8>, Vec<u8>>>,
    len: usize,
    key_coder: Box<dyn Coder<K>>,
    window_coder: Box<dyn Coder<W>>,
    state_coder: Box<dyn Coder<S>>,
}

impl<K, W, S> EncodedStateStore<K, W, S> {
    pub fn new(
        key_coder: impl Coder<K> + 'static,
        window_coder: impl Coder<W> + 'static,
        state_coder: impl Coder<S> + 'static,
    ) -> Self {
        Self {
            map: BTreeMap::new(),
            len: 0,
            key_coder: Box::new(key_coder),
            window_coder: Box::new(window_coder),
            state_coder: Box::new(state_coder),
        }
    }

    /// Total encoded size of all stored state, in bytes.
    pub fn encoded_size(&self) -> usize {
        self.map
            .iter()
            .map(|(k, m)| k.len() + m.iter().map(|(w, s)| w.len() + s.len()).sum::<usize>())
            .sum()
    }
}

impl<K, W, S> EncodedStateStore<K, W, S>
where
    K: Serialize + DeserializeOwned + 'static,
    W: Serialize + DeserializeOwned + 'static,
    S: Serialize + DeserializeOwned + 'static,
{
    /// Every part encoded with [`PostcardCoder`].
    pub fn with_postcard() -> Self {
        Self::new(PostcardCoder::new(), PostcardCoder::new(), PostcardCoder::new())
    }
}

impl<K, W, S> StateStore<K, W, S> for EncodedStateStore<K, W, S> {
    fn get(&self, key: &K, window: &W) -> Result<Option<S>> {
        let k = self.key_coder.encode(key)?;
        let w = self.window_coder.encode(window)?;
        self.map
            .get(&k)
            .and_then(|m| m.get(&w))
            .map(|bytes| self.state_coder.decode(bytes))
            .transpose()
    }

    fn put(&mut self, key: &K, window: &W, state: S) -> Result<()> {
        let k = self.key_coder.encode(key)?;
        let w = self.window_coder.encode(window)?;
        let s = self.state_coder.encode(&state)?;
        if self.map.entry(k).or_default().insert(w, s).is_none() {
            self.len += 1;
        }
        Ok(())
    }

    fn remove(&mut self, key: &K, window: &W) -> Result<Option<S>> {
        let k = self.key_coder.encode(key)?;
        let w = self.window_coder.encode(window)?;
        let Some(windows) = self.map.get_mut(&k) else { return Ok(None) };
        let removed = windows.remove(&w);
        if windows.is_empty() {
            self.map.remove(&k);
        }
        match removed {
            Some(bytes) => {
                self.len -= 1;
                self.state_coder.decode(&bytes).map(Some)
            }
            None => Ok(None),
        }
    }

    fn windows_for(&self, key: &K) -> Result<Vec<W>> {
        let k = self.key_coder.encode(key)?;
        match self.map.get(&k) {
            Some(m) => m.keys().map(|w| self.window_coder.decode(w)).collect(),
            None => Ok(Vec::new()),
        }
    }

    fn len(&self) -> usize {
        self.len
    }

    fn entries(&self) -> Result<Vec<(K, W, S)>> {
        let mut out = Vec::with_capacity(self.len);
        for (k, m) in &self.map {
            for (w, s) in m {
                out.push((
                    self.key_coder.decode(k)?,
                    self.window_coder.decode(w)?,
                    self.state_coder.decode(s)?,
                ));
            }
        }
        Ok(out)
    }

    fn clear(&mut self) {
        self.map.clear();
        self.len = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coder::IntervalWindowCoder;
    use crate::window::IntervalWindow;

    fn exercise(store: &mut dyn StateStore<String, IntervalWindow, u64>) -> Result<()> {
        let k = "k".to_string();
        let w1 = IntervalWindow::new(0, 10);
        let w2 = IntervalWindow::new(10, 20);
        store.put(&k, &w1, 1)?;
        store.put(&k, &w2, 2)?;
        store.put(&k, &w1, 3)?;
        assert_eq!(store.len(), 2);
        assert_eq!(store.get(&k, &w1)?, Some(3));
        let mut ws = store.windows_for(&k)?;
        ws.sort();
        assert_eq!(ws, vec![w1, w2]);
        assert_eq!(store.remove(&k, &w1)?, Some(3));
        assert_eq!(store.remove(&k, &w1)?, None);
        assert_eq!(store.entries()?, vec![(k.clone(), w2, 2)]);
        store.clear();
        assert!(store.is_empty());
        assert!(store.windows_for(&k)?.is_empty());
        Ok(())
    }

    #[test]
    fn in_memory_store() -> Result<()> {
        exercise(&mut InMemoryStateStore::new())
    }

    #[test]
    fn encoded_store() -> Result<()> {
        exercise(&mut EncodedStateStore::new(
            PostcardCoder::new(),
            IntervalWindowCoder,
            PostcardCoder::new(),
        ))?;
        exercise(&mut EncodedStateStore::with_postcard())
    }
}
