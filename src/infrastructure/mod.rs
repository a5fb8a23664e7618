//! Infrastructure layer - chain access and record storage

pub mod blockchain;
pub mod storage;
