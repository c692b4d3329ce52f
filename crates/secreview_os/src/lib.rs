#![forbid(unsafe_code)]

pub mod admin;
pub mod config;
pub mod discussion;
pub mod emitter;
pub mod lifecycle;
pub mod linked_system;
pub mod records;
pub mod runtime;

#[cfg(test)]
mod testkit;
