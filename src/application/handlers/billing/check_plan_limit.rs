//! CheckPlanLimitHandler - Query handler for plan limits and features.
//!
//! Read-only and lock-free. Concurrent callers may briefly overshoot a cap.

use std::sync::Arc;

use crate::domain::billing::{
    evaluate_feature, evaluate_limit, subscription_gate, BillingError, GracePolicy,
    LimitDecision, Plan, Subscription,
};
use crate::domain::foundation::{TenantId, Timestamp};
use crate::ports::{PlanCatalog, SubscriptionReader, UsageReader};

/// May `tenant_id` consume `delta` more units of `resource`?
#[derive(Debug, Clone)]
pub struct CheckPlanLimitQuery {
    pub tenant_id: TenantId,
    pub resource: String,
    pub delta: u64,
    pub now: Timestamp,
}

/// Does the tenant's plan include `feature`?
#[derive(Debug, Clone)]
pub struct CheckFeatureQuery {
    pub tenant_id: TenantId,
    pub feature: String,
    pub now: Timestamp,
}

pub struct CheckPlanLimitHandler {
    reader: Arc<dyn SubscriptionReader>,
    catalog: Arc<dyn PlanCatalog>,
    usage: Arc<dyn UsageReader>,
    policy: GracePolicy,
}

impl CheckPlanLimitHandler {
    pub fn new(
        reader: Arc<dyn SubscriptionReader>,
        catalog: Arc<dyn PlanCatalog>,
        usage: Arc<dyn UsageReader>,
        policy: GracePolicy,
    ) -> Self {
        Self {
            reader,
            catalog,
            usage,
            policy,
        }
    }

    pub async fn handle(&self, query: CheckPlanLimitQuery) -> Result<LimitDecision, BillingError> {
        let subscription = self.reader.find_current_for_tenant(query.tenant_id).await?;
        if let Some(denied) = subscription_gate(subscription.as_ref(), &self.policy, query.now) {
            return Ok(self.log_denial(query.tenant_id, &query.resource, denied));
        }
        let plan = self.plan_for(subscription).await?;

        if plan.limit_for(&query.resource).is_none() {
            return Ok(LimitDecision::Allow);
        }
        let current = self
            .usage
            .current_usage(query.tenant_id, &query.resource)
            .await?;

        let decision = evaluate_limit(&plan, &query.resource, current, query.delta);
        Ok(self.log_denial(query.tenant_id, &query.resource, decision))
    }

    pub async fn check_feature(&self, query: CheckFeatureQuery) -> Result<LimitDecision, BillingError> {
        let subscription = self.reader.find_current_for_tenant(query.tenant_id).await?;
        if let Some(denied) = subscription_gate(subscription.as_ref(), &self.policy, query.now) {
            return Ok(self.log_denial(query.tenant_id, &query.feature, denied));
        }
        let plan = self.plan_for(subscription).await?;

        Ok(self.log_denial(
            query.tenant_id,
            &query.feature,
            evaluate_feature(&plan, &query.feature),
        ))
    }

    async fn plan_for(&self, subscription: Option<Subscription>) -> Result<Plan, BillingError> {
        // The gate already denied a missing subscription.
        let Some(subscription) = subscription else {
            return Err(BillingError::permanent("No subscription to resolve a plan for"));
        };
        self.catalog
            .find_by_id(subscription.plan_id)
            .await?
            .ok_or_else(|| {
                BillingError::permanent(format!(
                    "Plan {} of subscription {} is not in the catalog",
                    subscription.plan_id, subscription.id
                ))
            })
    }

    fn log_denial(&self, tenant_id: TenantId, key: &str, decision: LimitDecision) -> LimitDecision {
        if let Some(reason) = decision.reason() {
            tracing::debug!(tenant_id = %tenant_id, key, reason = %reason, "Plan check denied");
        }
        decision
    }
}
