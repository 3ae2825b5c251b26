//! Trace sequences and the hitlist codec.
//!
//! A sequence is an ordered list of (surface key, options) pairs; a surface
//! key may repeat (multi-pass systems, cat's eye retroreflectors). The
//! hitlist disambiguates repeated traversals of the same ordered surface
//! pair with a 1-based occurrence counter, which is what keys the pilot
//! transfer matrices.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Per-hit options. `is_mirror` selects reflection over refraction; any
/// further key/value data is opaque to the tracer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurfaceOptions {
    pub is_mirror: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

impl SurfaceOptions {
    pub fn refracting() -> Self {
        SurfaceOptions::default()
    }

    pub fn mirror() -> Self {
        SurfaceOptions {
            is_mirror: true,
            extra: BTreeMap::new(),
        }
    }
}

/// Ordered list of surfaces to traverse, with per-hit options.
pub type Sequence = Vec<(String, SurfaceOptions)>;

/// One disambiguated surface-pair traversal: `hit` is the 1-based count of
/// how often the ordered pair (start, end) has occurred so far.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HitKey {
    pub start: String,
    pub end: String,
    pub hit: u32,
}

impl HitKey {
    pub fn new(start: &str, end: &str, hit: u32) -> Self {
        HitKey {
            start: start.to_owned(),
            end: end.to_owned(),
            hit,
        }
    }

    /// Key of the reverse traversal, under which the inverse transfer
    /// matrix is stored.
    pub fn reversed(&self) -> Self {
        HitKey {
            start: self.end.clone(),
            end: self.start.clone(),
            hit: self.hit,
        }
    }
}

/// Options of the start and end surface of one hit.
pub type HitOptions = HashMap<HitKey, (SurfaceOptions, SurfaceOptions)>;

/// Walk consecutive pairs of the sequence and emit disambiguated hit
/// triples plus the per-triple options. Single pass; the hitlist is one
/// shorter than the sequence.
pub fn sequence_to_hitlist(seq: &Sequence) -> (Vec<HitKey>, HitOptions) {
    let mut counters: HashMap<(&str, &str), u32> = HashMap::new();
    let mut hitlist = Vec::with_capacity(seq.len().saturating_sub(1));
    let mut options = HitOptions::new();
    for window in seq.windows(2) {
        let (start, start_opts) = &window[0];
        let (end, end_opts) = &window[1];
        let counter = counters.entry((start.as_str(), end.as_str())).or_insert(0);
        *counter += 1;
        let key = HitKey::new(start, end, *counter);
        options.insert(key.clone(), (start_opts.clone(), end_opts.clone()));
        hitlist.push(key);
    }
    (hitlist, options)
}

/// Reconstruct a sequence from a hitlist.
///
/// This is a lossy inverse, kept as the original behaves: every triple
/// emits its start key, but only the final triple also emits its end key,
/// so intermediate end keys that differ from the following start key are
/// dropped. The round trip is exact only for boundary-pair sequences where
/// every intermediate hop occurs once. Downstream callers rely on this
/// asymmetry; do not "fix" it.
pub fn hitlist_to_sequence(hitlist: &[HitKey], options: &HitOptions) -> Sequence {
    let mut seq = Sequence::new();
    for (i, key) in hitlist.iter().enumerate() {
        let (start_opts, end_opts) = options.get(key).cloned().unwrap_or_default();
        seq.push((key.start.clone(), start_opts));
        if i == hitlist.len() - 1 {
            seq.push((key.end.clone(), end_opts));
        }
    }
    seq
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seq_of(keys: &[&str]) -> Sequence {
        keys.iter()
            .map(|k| (k.to_string(), SurfaceOptions::refracting()))
            .collect()
    }

    #[test]
    fn hitlist_is_one_shorter_than_sequence() {
        for len in 1..6 {
            let seq = seq_of(&["a", "b", "c", "d", "e"][..len]);
            let (hitlist, _) = sequence_to_hitlist(&seq);
            assert_eq!(hitlist.len(), len - 1);
        }
    }

    #[test]
    fn repeated_pairs_count_up_from_one() {
        // double pass through the same pair: a b a b
        let seq = seq_of(&["a", "b", "a", "b"]);
        let (hitlist, _) = sequence_to_hitlist(&seq);
        assert_eq!(
            hitlist,
            vec![
                HitKey::new("a", "b", 1),
                HitKey::new("b", "a", 1),
                HitKey::new("a", "b", 2),
            ]
        );
    }

    #[test]
    fn hit_indices_strictly_increase_per_pair() {
        let seq = seq_of(&["m", "m", "m", "m", "m"]);
        let (hitlist, _) = sequence_to_hitlist(&seq);
        let hits: Vec<u32> = hitlist.iter().map(|h| h.hit).collect();
        assert_eq!(hits, vec![1, 2, 3, 4]);
    }

    #[test]
    fn roundtrip_without_repeated_pairs() {
        let mut seq = seq_of(&["front", "back", "detector"]);
        seq[1].1.is_mirror = true;
        let (hitlist, options) = sequence_to_hitlist(&seq);
        let rebuilt = hitlist_to_sequence(&hitlist, &options);
        assert_eq!(rebuilt, seq);
    }

    #[test]
    fn options_keyed_by_full_triple() {
        let mut seq = seq_of(&["a", "b", "a", "b"]);
        seq[3].1.is_mirror = true;
        let (_, options) = sequence_to_hitlist(&seq);
        let first = &options[&HitKey::new("a", "b", 1)];
        let second = &options[&HitKey::new("a", "b", 2)];
        assert!(!first.1.is_mirror);
        assert!(second.1.is_mirror);
    }
}
