use std::sync::Arc;
use std::thread;
use std::time::Duration;
use anyhow::Result;

use coraldb::common::types::Rid;
use coraldb::transaction::concurrency::{
    IndexWriteRecord, IsolationLevel, TransactionState, WriteType,
};
use coraldb::{BPlusTree, IndexKey};

mod common;
use common::{create_test_buffer_pool, ScenarioDb};

#[test]
fn test_committed_insert_is_visible() -> Result<()> {
    // T1 inserts row 1 and commits; T2 scans and observes {1, 233, 234}
    let db = ScenarioDb::new();

    let t1 = db.txn_manager.begin(IsolationLevel::ReadUncommitted);
    db.insert(&t1, 1)?;
    db.txn_manager.commit(&t1)?;

    let t2 = db.txn_manager.begin(IsolationLevel::ReadUncommitted);
    let mut seen = db.scan(&t2)?;
    seen.sort_unstable();
    assert_eq!(seen, vec![1, 233, 234]);
    db.txn_manager.commit(&t2)?;

    Ok(())
}

#[test]
fn test_aborted_insert_is_invisible() -> Result<()> {
    // T1 inserts row 1 then aborts; T2 observes {233, 234} and no partial state
    let db = ScenarioDb::new();

    let t1 = db.txn_manager.begin(IsolationLevel::ReadUncommitted);
    db.insert(&t1, 1)?;
    db.txn_manager.abort(&t1)?;
    assert_eq!(t1.state(), TransactionState::Aborted);

    let t2 = db.txn_manager.begin(IsolationLevel::ReadUncommitted);
    let mut seen = db.scan(&t2)?;
    seen.sort_unstable();
    assert_eq!(seen, vec![233, 234]);
    db.txn_manager.commit(&t2)?;

    Ok(())
}

#[test]
fn test_committed_delete_is_visible() -> Result<()> {
    let db = ScenarioDb::new();

    let t1 = db.txn_manager.begin(IsolationLevel::ReadCommitted);
    db.delete(&t1, 233)?;
    db.txn_manager.commit(&t1)?;

    let t2 = db.txn_manager.begin(IsolationLevel::ReadCommitted);
    assert_eq!(db.scan(&t2)?, vec![234]);
    db.txn_manager.commit(&t2)?;

    Ok(())
}

#[test]
fn test_own_writes_are_visible_before_commit() -> Result<()> {
    let db = ScenarioDb::new();

    let t1 = db.txn_manager.begin(IsolationLevel::ReadCommitted);
    db.delete(&t1, 233)?;
    assert_eq!(db.scan(&t1)?, vec![234]);
    db.txn_manager.commit(&t1)?;

    Ok(())
}

#[test]
fn test_aborted_delete_restores_row() -> Result<()> {
    let db = ScenarioDb::new();

    let t1 = db.txn_manager.begin(IsolationLevel::ReadCommitted);
    db.delete(&t1, 233)?;
    db.txn_manager.abort(&t1)?;

    let t2 = db.txn_manager.begin(IsolationLevel::ReadCommitted);
    let mut seen = db.scan(&t2)?;
    seen.sort_unstable();
    assert_eq!(seen, vec![233, 234]);
    db.txn_manager.commit(&t2)?;

    Ok(())
}

#[test]
fn test_dirty_read_under_read_uncommitted() -> Result<()> {
    // T1 inserts but does not commit; a READ_UNCOMMITTED scan must already
    // observe the row
    let db = ScenarioDb::new();

    let t1 = db.txn_manager.begin(IsolationLevel::ReadUncommitted);
    db.insert(&t1, 1)?;

    let t2 = db.txn_manager.begin(IsolationLevel::ReadUncommitted);
    let mut seen = db.scan(&t2)?;
    seen.sort_unstable();
    assert_eq!(seen, vec![1, 233, 234]);
    db.txn_manager.commit(&t2)?;
    db.txn_manager.commit(&t1)?;

    Ok(())
}

#[test]
fn test_read_committed_scan_blocks_on_uncommitted_delete() -> Result<()> {
    // T1 deletes row 233 and holds its X lock; a READ_COMMITTED scan must
    // block until T1 resolves, then see the delete
    let db = ScenarioDb::new();

    let t1 = db.txn_manager.begin(IsolationLevel::ReadCommitted);
    db.delete(&t1, 233)?;

    let scanner = {
        let db = db.clone();
        thread::spawn(move || {
            let t2 = db.txn_manager.begin(IsolationLevel::ReadCommitted);
            let seen = db.scan(&t2).expect("scan succeeds after t1 commits");
            db.txn_manager.commit(&t2).expect("commit succeeds");
            seen
        })
    };

    thread::sleep(Duration::from_millis(100));
    assert!(!scanner.is_finished(), "scan must block on the X-locked row");

    db.txn_manager.commit(&t1)?;
    let seen = scanner.join().expect("scanner panicked");
    assert_eq!(seen, vec![234]);

    Ok(())
}

#[test]
fn test_abort_rolls_back_index_writes() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(50)?;
    let index = Arc::new(BPlusTree::<i64>::new(buffer_pool, 8, 8)?);
    let db = ScenarioDb::new();

    // Seed the index with one committed entry
    let rid_seed = Rid::new(1, 0);
    index.insert(&233, rid_seed)?;

    let t1 = db.txn_manager.begin(IsolationLevel::RepeatableRead);

    // Tracked insert of key 1
    let rid_new = Rid::new(1, 9);
    index.insert(&1, rid_new)?;
    t1.append_index_write(IndexWriteRecord {
        wtype: WriteType::Insert,
        key: 1i64.encoded(),
        rid: rid_new,
        index: index.clone(),
    });

    // Tracked delete of the seeded key 233
    index.remove(&233)?;
    t1.append_index_write(IndexWriteRecord {
        wtype: WriteType::Delete,
        key: 233i64.encoded(),
        rid: rid_seed,
        index: index.clone(),
    });

    assert_eq!(index.get_value(&1)?, Some(rid_new));
    assert_eq!(index.get_value(&233)?, None);

    // Abort undoes the entries in reverse order
    db.txn_manager.abort(&t1)?;
    assert_eq!(index.get_value(&1)?, None);
    assert_eq!(index.get_value(&233)?, Some(rid_seed));

    Ok(())
}

#[test]
fn test_repeatable_read_holds_scan_locks() -> Result<()> {
    let db = ScenarioDb::new();

    let t1 = db.txn_manager.begin(IsolationLevel::RepeatableRead);
    let mut seen = db.scan(&t1)?;
    seen.sort_unstable();
    assert_eq!(seen, vec![233, 234]);

    // The scan keeps its shared locks: a writer cannot take X on row 233
    let writer = {
        let db = db.clone();
        thread::spawn(move || {
            let t2 = db.txn_manager.begin(IsolationLevel::ReadCommitted);
            db.delete(&t2, 233).expect("delete proceeds after t1 commits");
            db.txn_manager.commit(&t2).expect("commit succeeds");
        })
    };
    thread::sleep(Duration::from_millis(100));
    assert!(!writer.is_finished(), "writer must block on the S-locked row");

    db.txn_manager.commit(&t1)?;
    writer.join().expect("writer panicked");

    let t3 = db.txn_manager.begin(IsolationLevel::ReadCommitted);
    assert_eq!(db.scan(&t3)?, vec![234]);
    db.txn_manager.commit(&t3)?;

    Ok(())
}
