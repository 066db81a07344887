use std::collections::BTreeSet;
use std::sync::Arc;
use std::thread;
use anyhow::Result;
use rand::seq::SliceRandom;
use rand::thread_rng;

use coraldb::common::types::Rid;
use coraldb::BPlusTree;

mod common;
use common::create_test_buffer_pool;

fn rid_for(key: i64) -> Rid {
    Rid::new((key >> 16) as u32 + 1, (key & 0xffff) as u32)
}

#[test]
fn test_insert_and_lookup() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(50)?;
    let tree = BPlusTree::<i64>::new(buffer_pool, 4, 5)?;

    assert!(tree.is_empty()?);
    assert_eq!(tree.get_value(&1)?, None);

    assert!(tree.insert(&1, rid_for(1))?);
    assert!(tree.insert(&2, rid_for(2))?);
    assert!(!tree.is_empty()?);

    assert_eq!(tree.get_value(&1)?, Some(rid_for(1)));
    assert_eq!(tree.get_value(&2)?, Some(rid_for(2)));
    assert_eq!(tree.get_value(&3)?, None);

    // Duplicate keys are rejected
    assert!(!tree.insert(&1, rid_for(99))?);
    assert_eq!(tree.get_value(&1)?, Some(rid_for(1)));

    Ok(())
}

#[test]
fn test_sequential_inserts_split_correctly() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(50)?;
    let tree = BPlusTree::<i64>::new(buffer_pool, 4, 5)?;

    for key in 0..200i64 {
        assert!(tree.insert(&key, rid_for(key))?);
    }
    for key in 0..200i64 {
        assert_eq!(tree.get_value(&key)?, Some(rid_for(key)), "key {}", key);
    }

    let scanned: Vec<i64> = tree.iter()?.map(|(key, _)| key).collect();
    let expected: Vec<i64> = (0..200).collect();
    assert_eq!(scanned, expected);

    Ok(())
}

#[test]
fn test_random_insert_full_iteration() -> Result<()> {
    // Insert 1..=1000 in random order into a small-fanout tree, then a
    // full forward scan must yield 1..=1000 in order
    let (buffer_pool, _temp_file) = create_test_buffer_pool(300)?;
    let tree = BPlusTree::<i64>::new(buffer_pool, 4, 5)?;

    let mut keys: Vec<i64> = (1..=1000).collect();
    keys.shuffle(&mut thread_rng());
    for &key in &keys {
        assert!(tree.insert(&key, rid_for(key))?);
    }

    for key in 1..=1000i64 {
        assert_eq!(tree.get_value(&key)?, Some(rid_for(key)), "key {}", key);
    }

    let scanned: Vec<i64> = tree.iter()?.map(|(key, _)| key).collect();
    let expected: Vec<i64> = (1..=1000).collect();
    assert_eq!(scanned, expected);

    Ok(())
}

#[test]
fn test_iter_from_positions_at_lower_bound() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(50)?;
    let tree = BPlusTree::<i64>::new(buffer_pool, 4, 5)?;

    for key in (0..100i64).map(|k| k * 2) {
        tree.insert(&key, rid_for(key))?;
    }

    // Exact key
    let from_exact: Vec<i64> = tree.iter_from(&40)?.take(3).map(|(k, _)| k).collect();
    assert_eq!(from_exact, vec![40, 42, 44]);

    // Missing key positions at the next larger one
    let from_missing: Vec<i64> = tree.iter_from(&41)?.take(3).map(|(k, _)| k).collect();
    assert_eq!(from_missing, vec![42, 44, 46]);

    // Past the maximum key the iterator is exhausted
    assert_eq!(tree.iter_from(&1000)?.next(), None);

    Ok(())
}

#[test]
fn test_remove_with_redistribute_and_merge() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(100)?;
    let tree = BPlusTree::<i64>::new(buffer_pool, 4, 5)?;

    for key in 0..100i64 {
        tree.insert(&key, rid_for(key))?;
    }

    // Removing absent keys is a no-op
    tree.remove(&1000)?;
    assert_eq!(tree.iter()?.count(), 100);

    // Remove odd keys, forcing redistributions and merges
    for key in (1..100i64).step_by(2) {
        tree.remove(&key)?;
    }
    for key in 0..100i64 {
        let expected = if key % 2 == 0 { Some(rid_for(key)) } else { None };
        assert_eq!(tree.get_value(&key)?, expected, "key {}", key);
    }
    let scanned: Vec<i64> = tree.iter()?.map(|(key, _)| key).collect();
    let expected: Vec<i64> = (0..100).step_by(2).collect();
    assert_eq!(scanned, expected);

    Ok(())
}

#[test]
fn test_remove_everything_then_reuse() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(100)?;
    let tree = BPlusTree::<i64>::new(buffer_pool, 4, 5)?;

    for key in 0..150i64 {
        tree.insert(&key, rid_for(key))?;
    }
    // Drain in an order that exercises both leftmost and rightmost merges
    for key in (0..150i64).rev() {
        tree.remove(&key)?;
    }

    assert!(tree.is_empty()?);
    assert_eq!(tree.iter()?.next(), None);

    // The tree stays usable after being emptied
    for key in 0..50i64 {
        assert!(tree.insert(&key, rid_for(key))?);
    }
    let scanned: Vec<i64> = tree.iter()?.map(|(key, _)| key).collect();
    let expected: Vec<i64> = (0..50).collect();
    assert_eq!(scanned, expected);

    Ok(())
}

#[test]
fn test_interleaved_insert_remove_matches_model() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(200)?;
    let tree = BPlusTree::<i64>::new(buffer_pool, 4, 5)?;
    let mut model = BTreeSet::new();

    let mut keys: Vec<i64> = (0..400).collect();
    keys.shuffle(&mut thread_rng());
    for (i, &key) in keys.iter().enumerate() {
        tree.insert(&key, rid_for(key))?;
        model.insert(key);
        // Every third step, remove some earlier key
        if i % 3 == 2 {
            let doomed = keys[i / 3];
            tree.remove(&doomed)?;
            model.remove(&doomed);
        }
    }

    let scanned: Vec<i64> = tree.iter()?.map(|(key, _)| key).collect();
    let expected: Vec<i64> = model.into_iter().collect();
    assert_eq!(scanned, expected);

    Ok(())
}

#[test]
fn test_concurrent_disjoint_inserts() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(300)?;
    let tree = Arc::new(BPlusTree::<i64>::new(buffer_pool, 8, 8)?);

    let mut handles = Vec::new();
    for worker in 0..4i64 {
        let tree = tree.clone();
        handles.push(thread::spawn(move || {
            for i in 0..250i64 {
                let key = worker * 250 + i;
                tree.insert(&key, rid_for(key)).expect("insert succeeds");
            }
        }));
    }
    for handle in handles {
        handle.join().expect("worker panicked");
    }

    for key in 0..1000i64 {
        assert_eq!(tree.get_value(&key)?, Some(rid_for(key)), "key {}", key);
    }
    let scanned: Vec<i64> = tree.iter()?.map(|(key, _)| key).collect();
    let expected: Vec<i64> = (0..1000).collect();
    assert_eq!(scanned, expected);

    Ok(())
}

#[test]
fn test_concurrent_readers_and_writers() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(300)?;
    let tree = Arc::new(BPlusTree::<i64>::new(buffer_pool, 8, 8)?);

    // Pre-load even keys
    for key in (0..500i64).step_by(2) {
        tree.insert(&key, rid_for(key))?;
    }

    let writer = {
        let tree = tree.clone();
        thread::spawn(move || {
            for key in (1..500i64).step_by(2) {
                tree.insert(&key, rid_for(key)).expect("insert succeeds");
            }
        })
    };
    let reader = {
        let tree = tree.clone();
        thread::spawn(move || {
            // Pre-loaded keys stay visible throughout
            for _ in 0..10 {
                for key in (0..500i64).step_by(50) {
                    let found = tree.get_value(&key).expect("lookup succeeds");
                    assert_eq!(found, Some(rid_for(key)));
                }
            }
        })
    };
    writer.join().expect("writer panicked");
    reader.join().expect("reader panicked");

    for key in 0..500i64 {
        assert_eq!(tree.get_value(&key)?, Some(rid_for(key)), "key {}", key);
    }

    Ok(())
}
