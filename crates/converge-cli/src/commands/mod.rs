//! CLI commands

pub mod apply;
pub mod delete;
pub mod info;
pub mod patch;
pub mod power;
pub mod provision;
