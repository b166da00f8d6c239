//! Info command - resolve the identity of a manifest

use std::path::Path;

use crate::context::{Context, read_manifest};
use crate::display::{self, OutputFormat};
use crate::error::Result;

pub async fn run(context: &Context, file: &Path, output: OutputFormat) -> Result<()> {
    let manifest = read_manifest(file)?;
    let info = context.helper.info(&manifest).await?;
    display::print_info(&info, output)
}
