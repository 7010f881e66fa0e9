//! Preset collections and the selection/crossfade protocol for generative
//! layers.

use std::collections::BTreeMap;
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

use crate::{CompositorError, Result};

/// Structured preset data as understood by the generative library.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PresetPayload(Value);

impl PresetPayload {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Preset {
    pub name: String,
    pub payload: PresetPayload,
}

impl Preset {
    pub fn new(name: impl Into<String>, payload: PresetPayload) -> Self {
        Self {
            name: name.into(),
            payload,
        }
    }
}

/// Ordered, immutable list of presets.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PresetCollection {
    entries: Vec<Preset>,
}

impl PresetCollection {
    pub fn new(entries: Vec<Preset>) -> Self {
        Self { entries }
    }

    /// Builds a collection from a name-to-payload mapping, ordered by name.
    pub fn from_map(map: BTreeMap<String, PresetPayload>) -> Self {
        Self {
            entries: map
                .into_iter()
                .map(|(name, payload)| Preset { name, payload })
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Preset> {
        self.entries.get(index)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|p| p.name.as_str())
    }
}

/// A resolved selection to be issued as `load_preset` on a backend.
#[derive(Debug, Clone, PartialEq)]
pub struct PresetLoad {
    pub index: usize,
    pub preset: Preset,
    pub transition_seconds: f32,
}

/// Current position in a preset collection.
///
/// The first resolved selection is an instant cut; every later one requests
/// the configured crossfade.
#[derive(Debug, Clone)]
pub struct PresetSelector {
    collection: Arc<PresetCollection>,
    index: Option<usize>,
    crossfade_seconds: f32,
}

impl PresetSelector {
    pub fn new(collection: Arc<PresetCollection>, crossfade_seconds: f32) -> Self {
        Self {
            collection,
            index: None,
            crossfade_seconds,
        }
    }

    /// Selector over a single preset that is already loaded.
    pub fn one_off(preset: Preset, crossfade_seconds: f32) -> Self {
        Self {
            collection: Arc::new(PresetCollection::new(vec![preset])),
            index: Some(0),
            crossfade_seconds,
        }
    }

    pub fn len(&self) -> usize {
        self.collection.len()
    }

    pub fn is_empty(&self) -> bool {
        self.collection.is_empty()
    }

    /// `None` until a preset has been chosen.
    pub fn index(&self) -> Option<usize> {
        self.index
    }

    pub fn current(&self) -> Option<&Preset> {
        self.index.and_then(|i| self.collection.get(i))
    }

    pub fn collection(&self) -> &PresetCollection {
        &self.collection
    }

    /// Picks a uniformly random entry.
    pub fn select_random(&mut self, rng: &mut fastrand::Rng) -> Result<PresetLoad> {
        if self.collection.is_empty() {
            return Err(CompositorError::EmptyCollection);
        }
        let index = rng.usize(..self.collection.len());
        self.resolve(index)
    }

    /// Steps forward cyclically. `Ok(None)` when there is nothing to cycle to.
    pub fn select_next(&mut self) -> Result<Option<PresetLoad>> {
        let len = self.cyclable_len()?;
        if len <= 1 {
            return Ok(None);
        }
        let index = self.index.map_or(0, |i| (i + 1) % len);
        self.resolve(index).map(Some)
    }

    /// Steps backward cyclically. `Ok(None)` when there is nothing to cycle to.
    pub fn select_previous(&mut self) -> Result<Option<PresetLoad>> {
        let len = self.cyclable_len()?;
        if len <= 1 {
            return Ok(None);
        }
        let index = self.index.map_or(len - 1, |i| (i + len - 1) % len);
        self.resolve(index).map(Some)
    }

    pub fn select_explicit(&mut self, index: usize) -> Result<PresetLoad> {
        if self.collection.is_empty() {
            return Err(CompositorError::EmptyCollection);
        }
        if index >= self.collection.len() {
            return Err(CompositorError::invalid(format!(
                "preset index {index} out of range for {} presets",
                self.collection.len()
            )));
        }
        self.resolve(index)
    }

    /// Selector labels, truncated to `limit` characters.
    pub fn labels(&self, limit: usize) -> Vec<String> {
        self.collection.names().map(|name| truncate_label(name, limit)).collect()
    }

    fn cyclable_len(&self) -> Result<usize> {
        match self.collection.len() {
            0 => Err(CompositorError::EmptyCollection),
            len => Ok(len),
        }
    }

    fn resolve(&mut self, index: usize) -> Result<PresetLoad> {
        let preset = self
            .collection
            .get(index)
            .cloned()
            .ok_or_else(|| CompositorError::invalid(format!("preset index {index} out of range")))?;
        let transition_seconds = if self.index.is_some() {
            self.crossfade_seconds
        } else {
            0.0
        };
        self.index = Some(index);
        Ok(PresetLoad {
            index,
            preset,
            transition_seconds,
        })
    }
}

fn truncate_label(name: &str, limit: usize) -> String {
    if name.chars().count() <= limit {
        return name.to_string();
    }
    let mut label: String = name.chars().take(limit).collect();
    label.push_str("...");
    label
}

/// Converts a text-format preset description into structured data.
pub trait PresetConverter: Send + Sync {
    fn convert(&self, text: &str) -> Result<PresetPayload>;
}

/// Converter for `key=value` preset text.
///
/// `[section]` headers, blank lines and `//` comments are skipped. Numeric
/// values land in `baseVals` as numbers, everything else as strings.
#[derive(Debug, Default, Clone, Copy)]
pub struct MilkTextConverter;

impl PresetConverter for MilkTextConverter {
    fn convert(&self, text: &str) -> Result<PresetPayload> {
        let mut base = Map::new();
        for (line_no, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with("//") || line.starts_with('[') {
                continue;
            }
            let (key, value) = line.split_once('=').ok_or_else(|| {
                CompositorError::decode(format!("line {}: expected `key=value`", line_no + 1))
            })?;
            let key = key.trim();
            if key.is_empty() {
                return Err(CompositorError::decode(format!("line {}: empty key", line_no + 1)));
            }
            let value = value.trim();
            let value = value
                .parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .map(Value::Number)
                .unwrap_or_else(|| Value::String(value.to_string()));
            base.insert(key.to_string(), value);
        }
        if base.is_empty() {
            return Err(CompositorError::decode("preset text contains no values"));
        }
        let mut root = Map::new();
        root.insert("baseVals".into(), Value::Object(base));
        Ok(PresetPayload::new(Value::Object(root)))
    }
}

/// Parses one-off preset text: structured JSON first, the converter for
/// anything that is not valid JSON.
pub fn parse_preset_text(text: &str, converter: &dyn PresetConverter) -> Result<PresetPayload> {
    match serde_json::from_str::<Value>(text) {
        Ok(value @ Value::Object(_)) => Ok(PresetPayload::new(value)),
        Ok(_) => Err(CompositorError::unsupported("preset JSON must be an object")),
        Err(_) => converter.convert(text),
    }
}

/// Producer half of a [`PresetBank`].
#[derive(Debug, Clone)]
pub struct PresetBankSender(Sender<Vec<Preset>>);

impl PresetBankSender {
    /// Makes the bank available. Returns false if the bank was dropped.
    pub fn publish(self, presets: Vec<Preset>) -> bool {
        self.0.send(presets).is_ok()
    }
}

enum BankState {
    Pending(Receiver<Vec<Preset>>),
    Ready(Arc<PresetCollection>),
    Unavailable,
}

/// Shared, library-provided preset bank that becomes available at some point
/// after startup.
pub struct PresetBank {
    state: BankState,
}

impl PresetBank {
    pub fn pending() -> (PresetBankSender, Self) {
        let (tx, rx) = mpsc::channel();
        (
            PresetBankSender(tx),
            Self {
                state: BankState::Pending(rx),
            },
        )
    }

    pub fn ready(presets: Vec<Preset>) -> Self {
        Self {
            state: BankState::Ready(Arc::new(PresetCollection::new(presets))),
        }
    }

    pub fn unavailable() -> Self {
        Self {
            state: BankState::Unavailable,
        }
    }

    /// Checks for the bank without blocking; returns it once available.
    pub fn poll(&mut self) -> Option<Arc<PresetCollection>> {
        if let BankState::Pending(rx) = &self.state {
            match rx.try_recv() {
                Ok(presets) => {
                    tracing::info!(presets = presets.len(), "preset bank available");
                    self.state = BankState::Ready(Arc::new(PresetCollection::new(presets)));
                }
                Err(TryRecvError::Empty) => {}
                Err(TryRecvError::Disconnected) => {
                    tracing::warn!("preset bank provider went away before publishing");
                    self.state = BankState::Unavailable;
                }
            }
        }
        match &self.state {
            BankState::Ready(collection) => Some(collection.clone()),
            _ => None,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state, BankState::Ready(_))
    }
}

impl std::fmt::Debug for PresetBank {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &self.state {
            BankState::Pending(_) => "pending".to_string(),
            BankState::Ready(c) => format!("ready({})", c.len()),
            BankState::Unavailable => "unavailable".to_string(),
        };
        f.debug_struct("PresetBank").field("state", &state).finish()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn collection(len: usize) -> Arc<PresetCollection> {
        Arc::new(PresetCollection::new(
            (0..len)
                .map(|i| Preset::new(format!("preset {i}"), PresetPayload::new(json!({ "id": i }))))
                .collect(),
        ))
    }

    #[test]
    fn first_selection_cuts_and_later_ones_crossfade() {
        let mut selector = PresetSelector::new(collection(5), 2.0);
        assert_eq!(selector.index(), None);

        let first = selector.select_explicit(3).unwrap();
        assert_eq!(first.transition_seconds, 0.0);
        let second = selector.select_next().unwrap().unwrap();
        assert_eq!(second.index, 4);
        assert_eq!(second.transition_seconds, 2.0);
    }

    #[test]
    fn next_cycles_through_the_whole_collection() {
        let mut selector = PresetSelector::new(collection(7), 2.0);
        selector.select_explicit(2).unwrap();
        for _ in 0..7 {
            selector.select_next().unwrap();
        }
        assert_eq!(selector.index(), Some(2));

        selector.select_next().unwrap();
        selector.select_previous().unwrap();
        assert_eq!(selector.index(), Some(2));

        selector.select_explicit(0).unwrap();
        let load = selector.select_previous().unwrap().unwrap();
        assert_eq!(load.index, 6);
    }

    #[test]
    fn cycling_small_collections_is_a_no_op() {
        let mut single = PresetSelector::one_off(
            Preset::new("only", PresetPayload::new(json!({}))),
            2.0,
        );
        assert_eq!(single.select_next().unwrap(), None);
        assert_eq!(single.select_previous().unwrap(), None);
        assert_eq!(single.index(), Some(0));

        let mut empty = PresetSelector::new(collection(0), 2.0);
        assert!(matches!(empty.select_next(), Err(CompositorError::EmptyCollection)));
        let mut rng = fastrand::Rng::with_seed(1);
        assert!(matches!(
            empty.select_random(&mut rng),
            Err(CompositorError::EmptyCollection)
        ));
    }

    #[test]
    fn explicit_selection_is_bounds_checked() {
        let mut selector = PresetSelector::new(collection(3), 2.0);
        assert!(selector.select_explicit(3).is_err());
        assert_eq!(selector.index(), None);
    }

    #[test]
    fn random_selection_stays_in_range() {
        let mut selector = PresetSelector::new(collection(10), 2.0);
        let mut rng = fastrand::Rng::with_seed(7);
        for _ in 0..200 {
            let load = selector.select_random(&mut rng).unwrap();
            assert!(load.index < 10);
        }
    }

    #[test]
    fn labels_are_truncated() {
        let long = "x".repeat(70);
        let selector = PresetSelector::one_off(
            Preset::new(long, PresetPayload::new(json!({}))),
            2.0,
        );
        let labels = selector.labels(60);
        assert_eq!(labels[0].len(), 63);
        assert!(labels[0].ends_with("..."));
    }

    #[test]
    fn converts_milk_text() {
        let text = "[preset00]\nzoom=1.02\nrot = -0.1\n// comment\nper_frame_1=wave_r = 0.5\n";
        let payload = parse_preset_text(text, &MilkTextConverter).unwrap();
        let base = &payload.as_value()["baseVals"];

        assert_eq!(base["zoom"], json!(1.02));
        assert_eq!(base["rot"], json!(-0.1));
        assert_eq!(base["per_frame_1"], json!("wave_r = 0.5"));
    }

    #[test]
    fn rejects_unconvertible_text() {
        assert!(parse_preset_text("not a preset", &MilkTextConverter).is_err());
        assert!(matches!(
            parse_preset_text("[1, 2]", &MilkTextConverter),
            Err(CompositorError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn bank_becomes_ready_after_publish() {
        let (sender, mut bank) = PresetBank::pending();
        assert!(bank.poll().is_none());

        assert!(sender.publish(vec![Preset::new("a", PresetPayload::new(json!({})))]));
        let collection = bank.poll().expect("bank should be ready");
        assert_eq!(collection.len(), 1);
        assert!(bank.is_ready());
    }

    #[test]
    fn dropped_provider_leaves_bank_unavailable() {
        let (sender, mut bank) = PresetBank::pending();
        drop(sender);
        assert!(bank.poll().is_none());
        assert!(!bank.is_ready());
    }
}
