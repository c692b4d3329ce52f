#![forbid(unsafe_code)]

pub mod audit;
pub mod comment;
pub mod common;
pub mod directory;
pub mod linked;
pub mod notification;
pub mod record;
pub mod review;

pub use common::{ContractViolation, ReasonCodeId, SchemaVersion, Validate};
