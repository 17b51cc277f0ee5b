//! Collaborators of the backup monitor
//!
//! Each collaborator is a trait the monitor drives, plus the implementation
//! the daemon wires in. Completion is always reported back as a monitor event.

pub mod block_repair;
pub mod fire_hire;
pub mod janitor;
pub mod orator;
pub mod rebuilder;
pub mod registry;
pub mod roster;
pub mod transport;

pub use block_repair::{BlockJob, BlockOutcome, BlockRepair, LocalCopyRepair};
pub use fire_hire::{FireHire, InactivityFireHire};
pub use janitor::{BackupJanitor, DeleteReport};
pub use orator::{ListFilesOrator, TransportOrator};
pub use rebuilder::{BackupRebuilder, QueueRebuilder};
pub use registry::BackupRegistry;
pub use roster::SupplierRoster;
pub use transport::{HttpTransport, OfflineTransport, SupplierTransport};
