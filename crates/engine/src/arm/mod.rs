//! Azure Resource Manager collaborators over REST.

pub mod adapters;
pub mod alerts;
pub mod client;
pub mod inventory;
pub mod token;

pub use adapters::{
    registry, AppGatewayAdapter, FlexibleServerAdapter, ManagedClusterAdapter, SftpAdapter,
    VirtualMachineAdapter,
};
pub use alerts::ArmAlertSuppressor;
pub use client::ArmClient;
pub use inventory::ResourceGraphInventory;
pub use token::{ManagedIdentityToken, StaticToken, TokenSource};
