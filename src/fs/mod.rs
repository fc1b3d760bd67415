pub mod backend;
pub mod local;
pub mod memory;
pub mod s3;

pub use backend::{
    AccessPolicy, Inventory, ObjectStore, Payload, RemoteObject, S3Provider, TransferHeaders,
};
pub use local::{scan_local, LocalFile};
pub use memory::MemoryStore;
pub use s3::{S3Settings, S3Store};
