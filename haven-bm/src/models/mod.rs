//! Fragment inventories, supplier roster and the pure computations over them

pub mod fragments;
pub mod list_files;
pub mod local_files;
pub mod missing;
pub mod stats;
pub mod suppliers;

pub use fragments::{BackupFragments, BlockFragments, FileInventory, FragmentKind, FragmentStatus};
pub use suppliers::{RemoteTest, SupplierChange, SuppliersSet};
