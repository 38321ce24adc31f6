//! Protocol implementations.

pub mod ota;

// Re-export common types
pub use ota::{AckStatus, FlashState, OtaClient, OtaConfig, TransferSession};
