//! Patch command

use converge_kube::ObjectKey;
use std::path::Path;

use crate::context::{Context, read_manifest};
use crate::display;
use crate::error::{CliError, Result};

#[allow(clippy::too_many_arguments)]
pub async fn run(
    context: &Context,
    kind: &str,
    name: &str,
    api_version: &str,
    namespace: Option<&str>,
    patch: Option<&str>,
    patch_file: Option<&Path>,
    patch_type: &str,
) -> Result<()> {
    let body = match (patch, patch_file) {
        (Some(patch), None) => patch.as_bytes().to_vec(),
        (None, Some(file)) => read_manifest(file)?,
        _ => {
            return Err(CliError::manifest_with_help(
                "no patch given",
                "pass the patch with --patch or --patch-file",
            ));
        }
    };

    let key = ObjectKey::new(namespace, name);
    context
        .helper
        .patch(&key, kind, api_version, &body, patch_type)
        .await?;

    display::print_patched(kind, name);
    Ok(())
}
