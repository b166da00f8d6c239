//! Delete command

use crate::context::Context;
use crate::display;
use crate::error::Result;

pub async fn run(context: &Context, api_version: &str, kind: &str, name: &str, namespace: Option<&str>) -> Result<()> {
    context.helper.delete(api_version, kind, namespace, name).await?;
    display::print_deleted(kind, name);
    Ok(())
}
