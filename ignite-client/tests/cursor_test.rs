//! Cursor paging and release against a mock node.

mod common;

use std::time::Duration;

use common::{build, config, partitions_body, CursorStore, MockNode, Reply};
use futures::StreamExt;
use ignite_client::query::CursorState;
use ignite_client::{IgniteClient, IgniteError, ScanQuery, SqlFieldsQuery, WireValue};
use ignite_core::protocol::{
    AffinityVersion, OP_CACHE_PARTITIONS, OP_QUERY_SCAN, OP_QUERY_SCAN_CURSOR_GET_PAGE,
    OP_QUERY_SQL_FIELDS, OP_QUERY_SQL_FIELDS_CURSOR_GET_PAGE, OP_RESOURCE_CLOSE,
};
use ignite_core::DataInput;
use uuid::Uuid;

fn entries(n: i32) -> Vec<(WireValue, WireValue)> {
    (0..n)
        .map(|i| (WireValue::Int(i), WireValue::String(format!("value-{}", i))))
        .collect()
}

async fn cursor_node(store: &CursorStore) -> MockNode {
    let store = store.clone();
    MockNode::builder()
        .handler(move |req| store.handle(req).unwrap_or_else(common::Reply::empty))
        .start()
        .await
}

async fn client_for(node: &MockNode) -> IgniteClient {
    common::init_tracing();
    IgniteClient::connect(build(config(&[node.addr()]).partition_awareness(false)))
        .await
        .unwrap()
}

#[tokio::test]
async fn test_scan_pages_through_all_entries() {
    let store = CursorStore::with_entries(entries(10));
    let node = cursor_node(&store).await;
    let client = client_for(&node).await;

    let mut cursor = client
        .cache::<i32, String>("people")
        .scan(ScanQuery::new().page_size(3))
        .await
        .unwrap();
    assert_eq!(cursor.pages_fetched(), 1);
    assert_eq!(cursor.buffered(), 3);

    let mut more = vec![cursor.has_more()];
    while cursor.has_more() {
        cursor.fetch_next_page().await.unwrap();
        more.push(cursor.has_more());
    }
    assert_eq!(more, vec![true, true, true, false]);
    assert_eq!(cursor.buffered(), 10);
    assert_eq!(cursor.pages_fetched(), 4);
    assert_eq!(cursor.state(), CursorState::Exhausted);

    let mut keys = Vec::new();
    while let Some((key, _)) = cursor.next().await.unwrap() {
        keys.push(key);
    }
    assert_eq!(keys, (0..10).map(WireValue::Int).collect::<Vec<_>>());

    assert_eq!(node.count(OP_QUERY_SCAN), 1);
    assert_eq!(node.count(OP_QUERY_SCAN_CURSOR_GET_PAGE), 3);
}

#[tokio::test]
async fn test_exhausted_cursor_is_not_closed_on_server() {
    let store = CursorStore::with_entries(entries(4));
    let node = cursor_node(&store).await;
    let client = client_for(&node).await;

    let mut cursor = client
        .cache::<i32, String>("people")
        .scan(ScanQuery::new().page_size(10))
        .await
        .unwrap();
    assert!(!cursor.has_more());
    let mut count = 0;
    while cursor.next().await.unwrap().is_some() {
        count += 1;
    }
    assert_eq!(count, 4);

    let err = cursor.fetch_next_page().await.unwrap_err();
    assert!(matches!(err, IgniteError::Usage(_)));
    assert!(cursor.next().await.unwrap().is_none());

    cursor.close().await.unwrap();
    drop(cursor);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(node.count(OP_RESOURCE_CLOSE), 0);
}

#[tokio::test]
async fn test_close_releases_cursor_once() {
    let store = CursorStore::with_entries(entries(10));
    let node = cursor_node(&store).await;
    let client = client_for(&node).await;

    let mut cursor = client
        .cache::<i32, String>("people")
        .scan(ScanQuery::new().page_size(3))
        .await
        .unwrap();
    assert_eq!(store.open_cursors(), 1);

    cursor.close().await.unwrap();
    cursor.close().await.unwrap();
    assert_eq!(cursor.state(), CursorState::Closed);
    assert_eq!(node.count(OP_RESOURCE_CLOSE), 1);
    assert_eq!(store.open_cursors(), 0);

    assert!(matches!(cursor.next().await, Err(IgniteError::Usage(_))));
    assert!(matches!(
        cursor.fetch_next_page().await,
        Err(IgniteError::Usage(_))
    ));

    drop(cursor);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(node.count(OP_RESOURCE_CLOSE), 1);
}

#[tokio::test]
async fn test_dropped_cursor_is_released() {
    let store = CursorStore::with_entries(entries(10));
    let node = cursor_node(&store).await;
    let client = client_for(&node).await;

    let cursor = client
        .cache::<i32, String>("people")
        .scan(ScanQuery::new().page_size(3))
        .await
        .unwrap();
    drop(cursor);

    for _ in 0..50 {
        if store.open_cursors() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(store.open_cursors(), 0);
    assert_eq!(node.count(OP_RESOURCE_CLOSE), 1);
}

#[tokio::test]
async fn test_callback_error_closes_cursor() {
    let store = CursorStore::with_entries(entries(10));
    let node = cursor_node(&store).await;
    let client = client_for(&node).await;

    let cursor = client
        .cache::<i32, String>("people")
        .scan(ScanQuery::new().page_size(3))
        .await
        .unwrap();

    let mut seen = 0;
    let err = cursor
        .try_for_each(|_| {
            seen += 1;
            if seen == 5 {
                Err(IgniteError::Usage("stop here".to_string()))
            } else {
                Ok(())
            }
        })
        .await
        .unwrap_err();

    assert!(matches!(err, IgniteError::Usage(ref m) if m == "stop here"));
    assert_eq!(seen, 5);
    assert_eq!(node.count(OP_RESOURCE_CLOSE), 1);
    assert_eq!(store.open_cursors(), 0);
}

#[tokio::test]
async fn test_cursor_as_stream() {
    let store = CursorStore::with_entries(entries(7));
    let node = cursor_node(&store).await;
    let client = client_for(&node).await;

    let cursor = client
        .cache::<i32, String>("people")
        .scan(ScanQuery::new().page_size(2))
        .await
        .unwrap();
    let rows: Vec<_> = cursor.into_stream().collect().await;
    assert_eq!(rows.len(), 7);
    assert!(rows.iter().all(Result::is_ok));
    assert_eq!(node.count(OP_QUERY_SCAN_CURSOR_GET_PAGE), 3);
}

#[tokio::test]
async fn test_sql_fields_with_names() {
    let rows = (1..=3)
        .map(|i| vec![WireValue::Long(i), WireValue::String(format!("name-{}", i))])
        .collect();
    let store = CursorStore::with_rows(&["ID", "NAME"], rows);
    let node = cursor_node(&store).await;
    let client = client_for(&node).await;

    let cursor = client
        .cache::<i64, String>("people")
        .sql_fields(
            SqlFieldsQuery::new("SELECT id, name FROM Person")
                .page_size(2)
                .include_field_names(true),
        )
        .await
        .unwrap();
    assert_eq!(cursor.field_count(), 2);
    assert_eq!(cursor.field_names(), ["ID", "NAME"]);

    let rows = cursor.collect_all().await.unwrap();
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[2][1], WireValue::String("name-3".into()));
    assert_eq!(node.count(OP_QUERY_SQL_FIELDS), 1);
    assert_eq!(node.count(OP_QUERY_SQL_FIELDS_CURSOR_GET_PAGE), 1);
}

#[tokio::test]
async fn test_connection_loss_closes_cursor() {
    let store = CursorStore::with_entries(entries(10));
    let handler_store = store.clone();
    let node = MockNode::builder()
        .handler(move |req| {
            if req.op == OP_QUERY_SCAN_CURSOR_GET_PAGE {
                common::Reply::Disconnect
            } else {
                handler_store.handle(req).unwrap_or_else(common::Reply::empty)
            }
        })
        .start()
        .await;
    let client = client_for(&node).await;

    let mut cursor = client
        .cache::<i32, String>("people")
        .scan(ScanQuery::new().page_size(3))
        .await
        .unwrap();
    let err = cursor.fetch_next_page().await.unwrap_err();
    assert!(err.is_connection_error());
    assert_eq!(cursor.state(), CursorState::Closed);
    assert!(matches!(cursor.next().await, Err(IgniteError::Usage(_))));
}

#[tokio::test]
async fn test_client_close_releases_open_cursors() {
    let store = CursorStore::with_entries(entries(10));
    let node = cursor_node(&store).await;
    let client = client_for(&node).await;
    let cache = client.cache::<i32, String>("people");

    let mut open = cache.scan(ScanQuery::new().page_size(3)).await.unwrap();
    let mut drained = cache.scan(ScanQuery::new().page_size(20)).await.unwrap();
    assert_eq!(store.open_cursors(), 1);
    assert_eq!(client.open_cursor_count(), 1);

    client.close().await;
    assert_eq!(node.count(OP_RESOURCE_CLOSE), 1);
    assert_eq!(store.open_cursors(), 0);
    assert_eq!(client.open_cursor_count(), 0);

    assert_eq!(open.state(), CursorState::Closed);
    assert!(!open.has_more());
    assert!(matches!(open.next().await, Err(IgniteError::Usage(_))));
    assert!(matches!(
        open.fetch_next_page().await,
        Err(IgniteError::Usage(_))
    ));
    open.close().await.unwrap();

    // the server already released this one; its buffered rows stay readable
    assert_eq!(drained.state(), CursorState::Exhausted);
    assert!(drained.next().await.unwrap().is_some());

    drop(open);
    drop(drained);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(node.count(OP_RESOURCE_CLOSE), 1);
}

#[tokio::test]
async fn test_finished_cursors_leave_the_client_table() {
    let store = CursorStore::with_entries(entries(10));
    let node = cursor_node(&store).await;
    let client = client_for(&node).await;
    let cache = client.cache::<i32, String>("people");

    let mut closed = cache.scan(ScanQuery::new().page_size(3)).await.unwrap();
    let exhausted = cache.scan(ScanQuery::new().page_size(3)).await.unwrap();
    let dropped = cache.scan(ScanQuery::new().page_size(3)).await.unwrap();
    assert_eq!(client.open_cursor_count(), 3);

    closed.close().await.unwrap();
    assert_eq!(exhausted.collect_all().await.unwrap().len(), 10);
    drop(dropped);
    assert_eq!(client.open_cursor_count(), 0);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(node.count(OP_RESOURCE_CLOSE), 2);

    client.close().await;
    assert_eq!(node.count(OP_RESOURCE_CLOSE), 2);
    assert_eq!(store.open_cursors(), 0);
}

const PARTITIONS: i32 = 4;

async fn partitioned_node(store: &CursorStore, id: Uuid, owners: &[(Uuid, Vec<i32>)]) -> MockNode {
    let store = store.clone();
    let owners = owners.to_vec();
    MockNode::builder()
        .node_id(id)
        .handler(move |req| {
            if req.op == OP_CACHE_PARTITIONS {
                let mut input = req.reader();
                let count = input.read_int().unwrap();
                let cache_ids: Vec<i32> = (0..count).map(|_| input.read_int().unwrap()).collect();
                return Reply::ok(partitions_body(AffinityVersion::new(1, 0), &cache_ids, &owners));
            }
            store.handle(req).unwrap_or_else(Reply::empty)
        })
        .start()
        .await
}

#[tokio::test]
async fn test_partition_scans_page_on_owning_nodes() {
    common::init_tracing();
    // partition 0 holds four keys, the others three, two and one
    let keys = [0, 4, 8, 12, 1, 5, 9, 2, 6, 3];
    let store = CursorStore::with_entries(
        keys.iter()
            .map(|&k| (WireValue::Int(k), WireValue::String(format!("value-{}", k))))
            .collect(),
    )
    .partitioned(PARTITIONS as usize);
    let (a_id, b_id) = (Uuid::new_v4(), Uuid::new_v4());
    let owners = vec![(a_id, vec![0, 2]), (b_id, vec![1, 3])];
    let a = partitioned_node(&store, a_id, &owners).await;
    let b = partitioned_node(&store, b_id, &owners).await;

    let client = IgniteClient::connect(build(config(&[a.addr(), b.addr()])))
        .await
        .unwrap();
    let cache = client.cache::<i32, String>("people");

    let mut seen = Vec::new();
    let mut pages = Vec::new();
    for partition in 0..PARTITIONS as usize {
        let mut cursor = cache
            .scan(ScanQuery::new().partition(partition).page_size(3))
            .await
            .unwrap();
        while let Some((key, _)) = cursor.next().await.unwrap() {
            assert_eq!(store.partition_of(&key), partition);
            seen.push(key);
        }
        pages.push(cursor.pages_fetched());
    }
    assert_eq!(pages, vec![2, 1, 1, 1]);
    seen.sort_by_key(|k| match k {
        WireValue::Int(i) => *i,
        _ => i32::MIN,
    });
    let mut expected = keys.to_vec();
    expected.sort_unstable();
    assert_eq!(seen, expected.into_iter().map(WireValue::Int).collect::<Vec<_>>());

    assert_eq!(a.count(OP_QUERY_SCAN), 2);
    assert_eq!(b.count(OP_QUERY_SCAN), 2);
    assert_eq!(a.count(OP_QUERY_SCAN_CURSOR_GET_PAGE), 1);
    assert_eq!(b.count(OP_QUERY_SCAN_CURSOR_GET_PAGE), 0);
    assert_eq!(a.count(OP_CACHE_PARTITIONS) + b.count(OP_CACHE_PARTITIONS), 1);

    // a whole-cache scan pages on whichever node ran it
    let mut cursor = cache.scan(ScanQuery::new().page_size(3)).await.unwrap();
    let mut count = 0;
    while cursor.next().await.unwrap().is_some() {
        count += 1;
    }
    assert_eq!(count, 10);
    assert_eq!(cursor.pages_fetched(), 4);
    let scans = |n: &MockNode| n.count(OP_QUERY_SCAN) - 2;
    let page_requests = |n: &MockNode| n.count(OP_QUERY_SCAN_CURSOR_GET_PAGE);
    assert_eq!(scans(&a) + scans(&b), 1);
    assert_eq!(page_requests(&a) - 1 + page_requests(&b), 3);
    let runner = if scans(&a) == 1 { &a } else { &b };
    assert!(page_requests(runner) >= 3);
    assert_eq!(store.open_cursors(), 0);
}
