//! Version negotiation, authentication and feature-gated operations.

mod common;

use common::{body, build, config, MockNode, Reply};
use ignite_client::{ClusterState, IgniteClient, IgniteError};
use ignite_core::protocol::{
    ProtocolVersion, OP_CLUSTER_CHANGE_STATE, OP_CLUSTER_GET_STATE, STATUS_AUTH_FAILED,
};
use ignite_core::{DataInput, DataOutput};

#[tokio::test]
async fn test_rejected_credentials() {
    common::init_tracing();
    let node = MockNode::builder()
        .credentials("ignite", "secret")
        .start()
        .await;

    let err = IgniteClient::connect(build(
        config(&[node.addr()])
            .credentials("ignite", "wrong")
            .retry(|r| r.max_retries(0)),
    ))
    .await
    .unwrap_err();
    assert!(matches!(err, IgniteError::Authentication(_)), "got {:?}", err);
    assert!(err.is_connection_error());
    assert!(!err.is_retryable());
    assert_eq!(STATUS_AUTH_FAILED, 2000);
}

#[tokio::test]
async fn test_accepted_credentials() {
    common::init_tracing();
    let node = MockNode::builder()
        .credentials("ignite", "secret")
        .start()
        .await;

    let client = IgniteClient::connect(build(
        config(&[node.addr()]).credentials("ignite", "secret"),
    ))
    .await
    .unwrap();
    assert_eq!(client.connection_count(), 1);
}

#[tokio::test]
async fn test_older_node_is_spoken_to_in_its_version() {
    common::init_tracing();
    let node = MockNode::builder()
        .version(ProtocolVersion::V1_5_0)
        .start()
        .await;

    let client = IgniteClient::connect(build(config(&[node.addr()])))
        .await
        .unwrap();
    let connection = client.router().any_connection().unwrap();
    assert_eq!(connection.protocol_version(), ProtocolVersion::V1_5_0);
    assert_eq!(connection.node_id(), Some(node.node_id()));
    // one rejected attempt, one accepted
    assert_eq!(node.accepted(), 2);

    let err = client.cluster().state().await.unwrap_err();
    assert!(matches!(err, IgniteError::Usage(_)), "got {:?}", err);
    assert_eq!(node.count(OP_CLUSTER_GET_STATE), 0);
}

#[tokio::test]
async fn test_cluster_state_on_current_node() {
    common::init_tracing();
    let node = MockNode::builder()
        .handler(|req| match req.op {
            OP_CLUSTER_GET_STATE => Reply::ok(body(|out| out.write_u8(1).unwrap())),
            OP_CLUSTER_CHANGE_STATE => {
                assert_eq!(req.reader().read_u8().unwrap(), 0);
                Reply::empty()
            }
            _ => Reply::empty(),
        })
        .start()
        .await;

    let client = IgniteClient::connect(build(config(&[node.addr()])))
        .await
        .unwrap();
    let connection = client.router().any_connection().unwrap();
    assert_eq!(connection.protocol_version(), ProtocolVersion::V1_7_0);

    let cluster = client.cluster();
    let state = cluster.state().await.unwrap();
    assert_eq!(state, ClusterState::Active);
    assert!(state.is_active());

    cluster.deactivate().await.unwrap();
    assert_eq!(node.count(OP_CLUSTER_CHANGE_STATE), 1);
}

#[tokio::test]
async fn test_cluster_api_requires_feature_bit() {
    common::init_tracing();
    let node = MockNode::builder().features(&[0]).start().await;

    let client = IgniteClient::connect(build(config(&[node.addr()])))
        .await
        .unwrap();
    let err = client.cluster().activate().await.unwrap_err();
    assert!(matches!(err, IgniteError::Usage(_)));
    assert_eq!(node.count(OP_CLUSTER_CHANGE_STATE), 0);
}
