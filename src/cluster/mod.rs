//! Cluster collaborators: pool service, remote execution, and the simulated pool.

pub mod dmg;
pub mod pool;
pub mod remote;
pub mod sim;
