//! Apply, create and create-or-update commands

use std::path::Path;

use crate::context::{Context, read_manifest};
use crate::display;
use crate::error::Result;

/// How an existing object is treated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Three-way patch towards the manifest
    Apply,
    /// Leave existing objects alone
    Create,
    /// Always patch existing objects
    CreateOrUpdate,
}

pub async fn run(context: &Context, file: &Path, mode: Mode) -> Result<()> {
    let manifest = read_manifest(file)?;
    let info = context.helper.info(&manifest).await?;

    let helper = &context.helper;
    let result = match mode {
        Mode::Apply => helper.apply(&manifest).await?,
        Mode::Create => helper.create(&manifest).await?,
        Mode::CreateOrUpdate => helper.create_or_update(&manifest).await?,
    };

    display::print_result(&info, result);
    Ok(())
}
