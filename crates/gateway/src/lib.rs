pub mod backend;
pub mod error;
mod models;
mod path;
pub mod url;

pub use crate::backend::Gateway;
pub use crate::models::{
    BuildStatus, DirEntry, EntryKind, Owner, RemoteFile, RemoteRepository, SearchQuery, WriteRequest,
};
pub use crate::path::validate as validate_path;
use std::sync::Arc;

pub type GatewayHandle = Arc<dyn Gateway + Send + Sync>;
