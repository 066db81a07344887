use std::sync::Arc;
use anyhow::Result;

use coraldb::common::config::{DEFAULT_POOL_SIZE, DEFAULT_REPLACER_K};
use coraldb::common::types::Rid;
use coraldb::transaction::concurrency::LockMode;
use coraldb::{BPlusTree, BufferPoolManager, IsolationLevel, LockManager, PageManager, TransactionManager};

fn main() -> Result<()> {
    env_logger::init();

    let db_path = "coral.db";

    let buffer_pool = Arc::new(BufferPoolManager::new(
        DEFAULT_POOL_SIZE,
        DEFAULT_REPLACER_K,
        db_path,
    )?);
    println!("Buffer pool manager initialized");

    // Lock manager with its background deadlock detector, and transactions
    let lock_manager = Arc::new(LockManager::default());
    lock_manager.start_deadlock_detection();
    let txn_manager = TransactionManager::new(lock_manager.clone(), IsolationLevel::RepeatableRead);

    // Store a record in a slotted data page
    let page_manager = PageManager::new();
    let (page_id, page) = buffer_pool.new_page()?;
    let slot = {
        let mut page_guard = page.write();
        page_manager.init_page(&mut page_guard);
        page_manager.insert_record(&mut page_guard, b"Hello, database!")?
    };
    buffer_pool.unpin_page(page_id, true)?;
    let rid = Rid::new(page_id, slot);
    println!("Inserted record at rid {}", rid);

    // Index some keys
    let index = BPlusTree::<i64>::new(buffer_pool.clone(), 64, 64)?;
    let table_oid = 1;
    let txn = txn_manager.begin_default();
    lock_manager.lock_table(&txn, LockMode::IntentionExclusive, table_oid)?;
    lock_manager.lock_row(&txn, LockMode::Exclusive, table_oid, rid)?;
    for key in 0..100i64 {
        index.insert(&key, rid)?;
    }
    txn_manager.commit(&txn)?;

    let found = index.get_value(&42)?;
    println!("Lookup of key 42 -> {:?}", found);

    let scanned: Vec<i64> = index.iter()?.map(|(key, _)| key).collect();
    println!("Scanned {} keys in order", scanned.len());

    buffer_pool.flush_all_pages()?;
    lock_manager.stop_deadlock_detection();
    println!("Done");

    Ok(())
}
