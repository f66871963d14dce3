//! Device bookkeeping and the transport-agnostic allocation logic.
//!
//! Nothing in here performs I/O: the gRPC adapter, the lifecycle controller
//! and the debug endpoint all go through these types.

pub mod allocation;
pub mod device;
pub mod discovery;
pub mod error;
pub mod inventory;

pub use allocation::AllocationService;
pub use allocation::AllocationSpec;
pub use allocation::PluginOptions;
pub use device::ClaimState;
pub use device::Device;
pub use device::Health;
pub use discovery::DeviceDiscovery;
pub use discovery::DeviceMounts;
pub use discovery::MountDescriptor;
pub use discovery::PlaceholderMounts;
pub use discovery::StaticDiscovery;
pub use error::AllocateError;
pub use error::InventoryError;
pub use inventory::DeviceInventory;
