pub(crate) mod change_sets;
pub mod db;
pub mod models;
pub(crate) mod shares;
mod tables;
pub(crate) mod versions;

pub use change_sets::ChangeSetFilter;
pub use db::{Database, DatabaseError, PurgeStats};
pub use shares::ShareFlag;
pub use tables::*;
pub use versions::LedgerStats;
