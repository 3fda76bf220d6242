//! Test support for jobnode.
//!
//! [`FakeCluster`] is an in-memory [`ClusterExecutor`](jobnode_kube::ClusterExecutor)
//! that models jobs, their pods and the retry budget closely enough to
//! drive the node end to end without a cluster.

mod cluster;

pub use cluster::{FakeCluster, Fault, Method};
