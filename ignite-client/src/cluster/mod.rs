//! Cluster topology and administration.

mod state;
mod topology;

pub use state::{Cluster, ClusterState};
pub use topology::{
    AffinityTarget, CacheAffinity, NodeInfo, PartitionMap, TopologySnapshot, TopologyTracker,
};
