pub mod lookup;
pub mod maintenance;
pub mod query;
pub mod snapshot;
