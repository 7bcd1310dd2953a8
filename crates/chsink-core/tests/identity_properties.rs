//! Property-based tests for run identity and tag canonicalization.

use std::collections::{BTreeMap, HashMap};

use chrono::{TimeZone, Utc};
use chsink_core::sample::Sample;
use chsink_core::{canonicalize, Row, Run, SampleBuffer};
use proptest::prelude::*;

fn tag_map() -> impl Strategy<Value = BTreeMap<String, String>> {
    prop::collection::btree_map("[a-z_\\-]{1,8}", "[A-Za-z0-9/=. ]{0,10}", 0..12)
}

// 1970 .. 2200, inside the range that fits in i64 nanoseconds.
fn epoch_nanos() -> impl Strategy<Value = i64> {
    0i64..7_258_118_400_000_000_000
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(512))]

    #[test]
    fn canonicalize_ignores_insertion_order(tags in tag_map(), seed in any::<u64>()) {
        let mut pairs: Vec<(String, String)> = tags.clone().into_iter().collect();
        // Deterministic shuffle driven by the seed.
        let mut state = seed | 1;
        for i in (1..pairs.len()).rev() {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            pairs.swap(i, (state % (i as u64 + 1)) as usize);
        }
        let hashed: HashMap<String, String> = pairs.iter().cloned().collect();

        let expected = canonicalize(&tags);
        prop_assert_eq!(canonicalize(pairs.iter().map(|(k, v)| (k, v))), expected.clone());
        prop_assert_eq!(canonicalize(&hashed), expected);
    }

    #[test]
    fn canonical_pairs_are_sorted(tags in tag_map()) {
        let rendered = canonicalize(&tags);
        if tags.is_empty() {
            prop_assert_eq!(rendered, "");
        } else {
            let mut pairs: Vec<String> = tags.iter().map(|(k, v)| format!("{k}={v}")).collect();
            pairs.sort();
            prop_assert_eq!(rendered, pairs.join(" "));
        }
    }

    #[test]
    fn run_is_pure(nanos in epoch_nanos(), name in "[a-z ]{0,12}") {
        let now = Utc.timestamp_nanos(nanos);
        let a = Run::new(Some(name.as_str()), now, "p");
        let b = Run::new(Some(name.as_str()), now, "p");
        prop_assert_eq!(&a, &b);
        prop_assert_eq!(a.id.0, nanos as u64);
    }

    #[test]
    fn run_id_increases_with_time(nanos in epoch_nanos(), step in 1i64..1_000_000_000) {
        let earlier = Run::new(None, Utc.timestamp_nanos(nanos), "");
        let later = Run::new(None, Utc.timestamp_nanos(nanos.saturating_add(step)), "");
        prop_assert!(later.id > earlier.id);
        // Fixed-width names sort like the ids.
        prop_assert!(later.name > earlier.name);
    }

    #[test]
    fn row_derivation_is_deterministic(tags in tag_map(), value in any::<f64>()) {
        let run = Run::new(Some("prop"), Utc.timestamp_opt(1_669_909_784, 10).unwrap(), "");
        let sample = Sample::new("m", Utc.timestamp_opt(1_669_909_785, 0).unwrap(), value)
            .with_tags(tags.clone());
        let a = Row::derive(&run, &sample);
        let b = Row::derive(&run, &sample);
        prop_assert_eq!(&a.name, &b.name);
        prop_assert_eq!(a.name, canonicalize(&tags));
        prop_assert_eq!(a.value.to_bits(), b.value.to_bits());
    }

    #[test]
    fn buffer_drains_each_sample_once(batches in prop::collection::vec(0usize..6, 0..10)) {
        let buffer = SampleBuffer::new();
        let mut next = 0u32;
        let mut drained = Vec::new();
        for (i, size) in batches.iter().enumerate() {
            let batch: Vec<Sample> = (0..*size)
                .map(|_| {
                    next += 1;
                    Sample::new("m", Utc.timestamp_opt(0, 0).unwrap(), f64::from(next))
                })
                .collect();
            buffer.add(batch);
            if i % 2 == 1 {
                drained.extend(buffer.drain_all());
            }
        }
        drained.extend(buffer.drain_all());
        prop_assert!(buffer.drain_all().is_empty());

        let values: Vec<f64> = drained.iter().map(|s| s.value).collect();
        let expected: Vec<f64> = (1..=next).map(f64::from).collect();
        prop_assert_eq!(values, expected);
    }
}
