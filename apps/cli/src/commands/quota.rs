use super::human_bytes;
use crate::context::Context;

pub async fn run(ctx: &Context) -> anyhow::Result<()> {
    let quota = ctx.storage().get_quota().await?;
    match (quota.limit_bytes, quota.usage_fraction()) {
        (Some(limit), Some(fraction)) => println!(
            "{} of {} used ({:.1}%)",
            human_bytes(quota.used_bytes),
            human_bytes(limit),
            fraction * 100.0
        ),
        _ => println!("{} used (no limit)", human_bytes(quota.used_bytes)),
    }
    Ok(())
}
