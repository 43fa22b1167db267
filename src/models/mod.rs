// Domain models for the autoscaler

mod lag;
mod replica;
mod state;

pub use lag::{LagSnapshot, PartitionOffsets};
pub use replica::{
    LaunchSpec, ReplicaStatus, ReplicaTemplate, WorkerReplica, is_primary, next_replica_name,
    replica_number,
};
pub use state::ScalingState;
