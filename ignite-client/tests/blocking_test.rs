//! Synchronous facade driven from a plain thread.

mod common;

use common::{build, config, CursorStore, KvStore, MockNode, Reply};
use ignite_client::blocking::BlockingClient;
use ignite_client::{ScanQuery, WireValue};
use ignite_core::protocol::OP_RESOURCE_CLOSE;
use tokio::runtime::Runtime;

fn start(rt: &Runtime, kv: KvStore, cursors: CursorStore) -> MockNode {
    rt.block_on(
        MockNode::builder()
            .handler(move |req| {
                kv.handle(req)
                    .or_else(|| cursors.handle(req))
                    .unwrap_or_else(Reply::empty)
            })
            .start(),
    )
}

#[test]
fn test_blocking_key_value_and_scan() {
    common::init_tracing();
    let server = Runtime::new().unwrap();
    let entries = (0..5)
        .map(|i| (WireValue::Int(i), WireValue::Int(i * 10)))
        .collect();
    let node = start(&server, KvStore::default(), CursorStore::with_entries(entries));

    let client = BlockingClient::connect(build(
        config(&[node.addr()]).partition_awareness(false),
    ))
    .unwrap();
    let cache = client.cache::<i32, i32>("numbers");
    cache.put(&1, &10).unwrap();
    assert_eq!(cache.get(&1).unwrap(), Some(10));
    assert!(cache.contains_key(&1).unwrap());
    assert!(cache.remove(&1).unwrap());

    let rows: Vec<_> = cache
        .scan(ScanQuery::new().page_size(2))
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(rows.len(), 5);
    assert_eq!(rows[4], (WireValue::Int(4), WireValue::Int(40)));
    assert_eq!(node.count(OP_RESOURCE_CLOSE), 0);

    client.close();
    drop(node);
}

#[test]
fn test_blocking_cursor_closes_early() {
    common::init_tracing();
    let server = Runtime::new().unwrap();
    let entries = (0..10)
        .map(|i| (WireValue::Int(i), WireValue::Int(i)))
        .collect();
    let cursors = CursorStore::with_entries(entries);
    let node = start(&server, KvStore::default(), cursors.clone());

    let client = BlockingClient::connect(build(
        config(&[node.addr()]).partition_awareness(false),
    ))
    .unwrap();
    let cache = client.cache::<i32, i32>("numbers");

    let mut cursor = cache.scan(ScanQuery::new().page_size(3)).unwrap();
    let first = cursor.next().unwrap().unwrap();
    assert_eq!(first.0, WireValue::Int(0));
    assert!(cursor.has_more());
    cursor.close().unwrap();
    assert!(!cursor.has_more());

    assert_eq!(node.count(OP_RESOURCE_CLOSE), 1);
    assert_eq!(cursors.open_cursors(), 0);
    drop(cursor);
    client.close();
}
