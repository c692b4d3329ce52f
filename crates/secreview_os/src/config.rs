#![forbid(unsafe_code)]

use secreview_engines::review_state::ReviewStateConfig;
use secreview_kernel_contracts::record::RECORD_ALLOW_LIST_MAX;
use secreview_kernel_contracts::{ContractViolation, Validate};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReviewPolicyConfig {
    pub state_machine: ReviewStateConfig,
    pub max_allow_list: usize,
    /// Contractor actors always drive the linked system; others only when they opt in.
    pub linked_actions_for_contractors: bool,
    pub notify_approvers_on_pending: bool,
}

impl ReviewPolicyConfig {
    pub fn mvp_v1() -> Self {
        Self {
            state_machine: ReviewStateConfig::mvp_v1(),
            max_allow_list: 256,
            linked_actions_for_contractors: true,
            notify_approvers_on_pending: true,
        }
    }
}

impl Validate for ReviewPolicyConfig {
    fn validate(&self) -> Result<(), ContractViolation> {
        self.state_machine.validate()?;
        if self.max_allow_list == 0 || self.max_allow_list > RECORD_ALLOW_LIST_MAX {
            return Err(ContractViolation::InvalidValue {
                field: "review_policy_config.max_allow_list",
                reason: "must be within 1..=RECORD_ALLOW_LIST_MAX",
            });
        }
        Ok(())
    }
}
