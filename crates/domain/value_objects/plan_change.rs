use anyhow::{Result, bail};

/// Every plan is sold as a 30-year commitment billed per cycle.
pub const BILLING_HORIZON_MONTHS: i32 = 360;

/// Total number of billing cycles for a plan over the horizon
/// (3 → 120, 6 → 60, 12 → 30).
pub fn total_count_for_cycle(billing_cycle_months: i32) -> Result<i32> {
    if billing_cycle_months <= 0 || BILLING_HORIZON_MONTHS % billing_cycle_months != 0 {
        bail!("unsupported billing cycle length: {billing_cycle_months} months");
    }
    Ok(BILLING_HORIZON_MONTHS / billing_cycle_months)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleRecount {
    pub total_count: i32,
    pub remaining_count: i32,
}

/// Recomputes the cycle counts when switching to a plan billed every
/// `new_cycle_months`, keeping the cycles already paid.
///
/// Returns an error instead of clamping when nothing would remain.
pub fn recount_for_plan_change(new_cycle_months: i32, paid_count: i32) -> Result<CycleRecount> {
    let total_count = total_count_for_cycle(new_cycle_months)?;
    let remaining_count = total_count - paid_count;
    if remaining_count <= 0 {
        bail!(
            "plan change leaves no billing cycles: {total_count} total, {paid_count} already paid"
        );
    }
    Ok(CycleRecount {
        total_count,
        remaining_count,
    })
}
