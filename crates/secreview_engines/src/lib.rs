#![forbid(unsafe_code)]

pub mod access;
pub mod approval;
pub mod comments;
pub mod review_state;
