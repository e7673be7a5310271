//! Session tracking for match rooms

pub mod registry;

pub use registry::{Identity, Registration, RegistryError, Session, SessionRegistry, SessionSender};
