//! Sleep and wake commands

use converge_kube::{ObjectKey, PowerState, set_power_state};

use crate::context::Context;
use crate::display;
use crate::error::Result;

pub async fn run(context: &Context, cluster_id: &str, namespace: Option<&str>, state: PowerState) -> Result<()> {
    let key = ObjectKey::new(namespace, cluster_id);
    set_power_state(&context.helper, &key, state).await?;
    display::print_power_state(cluster_id, state);
    Ok(())
}
