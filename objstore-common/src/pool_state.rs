/// A mockable snapshot of pool occupancy, independent of the pooling crate
/// in use, so callers outside this workspace can report on it uniformly.
#[derive(Debug, Default, Clone, Copy)]
pub struct PoolState {
    pub connections: u32,
    pub idle_connections: u32,
}

pub trait GetPoolState {
    fn state(&self) -> PoolState;
}

impl From<deadpool_postgres::Status> for PoolState {
    fn from(status: deadpool_postgres::Status) -> PoolState {
        PoolState {
            connections: status.size as u32,
            idle_connections: status.available.max(0) as u32,
        }
    }
}
