// Library root — exposes the engine for the binary and integration tests.
// The binary entry point is src/main.rs.

pub mod config;
pub mod contact;
pub mod error;
pub mod http;
pub mod logger;
pub mod reconcile;
pub mod service;
pub mod store;

pub use contact::{Contact, ContactId, IdentifyRequest, LinkPrecedence, Submission};
pub use error::{AppError, ReconcileError, StoreError};
pub use reconcile::ConsolidatedIdentity;
pub use service::IdentityService;
pub use store::ContactStore;
