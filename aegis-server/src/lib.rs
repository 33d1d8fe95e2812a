//! Aegis Server Library - the storefront's authentication subsystem
//!
//! This library exposes the server components for use in integration tests.
//! The main binary uses these same components.

pub mod account;
pub mod audit;
pub mod challenge;
pub mod config;
pub mod device;
pub mod error;
pub mod gateway;
pub mod openapi;
pub mod principal;
pub mod routes;
pub mod state;
pub mod store;
pub mod token;

pub use account::{Account, AccountStore, Role};
pub use audit::{AuditAction, AuditEvent, AuditLog};
pub use challenge::{ChallengeError, ChallengePurpose, ChallengeStore, ConsumedChallenge};
pub use config::Config;
pub use device::{Device, DeviceRegistry, DeviceStatus, NewDevice, RegistryError};
pub use error::ApiError;
pub use openapi::ApiDoc;
pub use principal::{require_role, Principal};
pub use routes::create_router;
pub use state::AppState;
pub use store::{Database, StorageError};
pub use token::{Claims, TokenError, TokenKeys, TokenPair, TokenService, TokenUse};
