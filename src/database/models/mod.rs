pub mod tenant;

pub use tenant::{StorageStatus, Tenant};
