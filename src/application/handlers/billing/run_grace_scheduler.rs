//! RunGraceSchedulerHandler - grace reminders and deadline expiry.
//!
//! Two independent passes. Candidates come from a non-locking scan; every
//! decision is recomputed on the row-locked copy before anything changes.
//! One subscription failing never stops the batch.

use std::sync::Arc;

use crate::domain::billing::{
    BillingError, GracePolicy, LifecycleTrigger, Subscription, SubscriptionStatus,
};
use crate::domain::foundation::Timestamp;
use crate::ports::{
    BillingStore, Delivery, GraceNotice, GraceNotifier, SchedulerPass, SchedulerRunLedger,
    SubscriptionReader,
};

#[derive(Debug, Clone)]
pub struct RunGraceSchedulerCommand {
    pub now: Timestamp,
    pub notifications: bool,
    pub expirations: bool,
    /// Run passes that already completed today.
    pub force: bool,
    /// Count decisions only. Sends nothing, writes nothing.
    pub dry_run: bool,
}

impl RunGraceSchedulerCommand {
    /// Both passes, no flags.
    pub fn all(now: Timestamp) -> Self {
        Self {
            now,
            notifications: true,
            expirations: true,
            force: false,
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunGraceSchedulerResult {
    pub processed: u32,
    pub notified: u32,
    pub expired: u32,
    pub errors: u32,
    /// Deliveries without an acknowledgement; retried next run.
    pub unconfirmed: u32,
    /// Passes skipped because they already completed today.
    pub skipped: Vec<SchedulerPass>,
}

enum NotifyStep {
    NotDue,
    Notified,
    Unconfirmed,
}

pub struct RunGraceSchedulerHandler {
    store: Arc<dyn BillingStore>,
    reader: Arc<dyn SubscriptionReader>,
    notifier: Arc<dyn GraceNotifier>,
    ledger: Arc<dyn SchedulerRunLedger>,
    policy: GracePolicy,
}

impl RunGraceSchedulerHandler {
    pub fn new(
        store: Arc<dyn BillingStore>,
        reader: Arc<dyn SubscriptionReader>,
        notifier: Arc<dyn GraceNotifier>,
        ledger: Arc<dyn SchedulerRunLedger>,
        policy: GracePolicy,
    ) -> Self {
        Self {
            store,
            reader,
            notifier,
            ledger,
            policy,
        }
    }

    pub async fn handle(&self, cmd: RunGraceSchedulerCommand) -> RunGraceSchedulerResult {
        let mut result = RunGraceSchedulerResult::default();

        if cmd.notifications {
            if self.should_run(SchedulerPass::Notifications, &cmd, &mut result).await {
                let errors_before = result.errors;
                self.notification_pass(&cmd, &mut result).await;
                let clean = result.errors == errors_before && result.unconfirmed == 0;
                self.finish_pass(SchedulerPass::Notifications, &cmd, clean, &mut result)
                    .await;
            }
        }

        if cmd.expirations {
            if self.should_run(SchedulerPass::Expirations, &cmd, &mut result).await {
                let errors_before = result.errors;
                self.expiration_pass(&cmd, &mut result).await;
                let clean = result.errors == errors_before;
                self.finish_pass(SchedulerPass::Expirations, &cmd, clean, &mut result)
                    .await;
            }
        }

        if result.errors > 0 {
            tracing::error!(
                alert = true,
                processed = result.processed,
                notified = result.notified,
                expired = result.expired,
                errors = result.errors,
                dry_run = cmd.dry_run,
                "Grace scheduler finished with errors"
            );
        } else {
            tracing::info!(
                processed = result.processed,
                notified = result.notified,
                expired = result.expired,
                unconfirmed = result.unconfirmed,
                dry_run = cmd.dry_run,
                "Grace scheduler finished"
            );
        }
        result
    }

    async fn should_run(
        &self,
        pass: SchedulerPass,
        cmd: &RunGraceSchedulerCommand,
        result: &mut RunGraceSchedulerResult,
    ) -> bool {
        if cmd.force || cmd.dry_run {
            return true;
        }
        match self.ledger.last_completed(pass).await {
            Ok(Some(last)) if last >= cmd.now.date() => {
                tracing::info!(pass = %pass, "Pass already completed today, skipping");
                result.skipped.push(pass);
                false
            }
            Ok(_) => true,
            Err(err) => {
                // Unknown history: running again is safe, every step is idempotent.
                tracing::warn!(pass = %pass, error = %err, "Cannot read run ledger");
                true
            }
        }
    }

    async fn finish_pass(
        &self,
        pass: SchedulerPass,
        cmd: &RunGraceSchedulerCommand,
        clean: bool,
        result: &mut RunGraceSchedulerResult,
    ) {
        if cmd.dry_run || !clean {
            return;
        }
        if let Err(err) = self.ledger.record_completed(pass, cmd.now.date()).await {
            tracing::error!(pass = %pass, error = %err, "Cannot record completed pass");
            result.errors += 1;
        }
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Notification pass
    // ════════════════════════════════════════════════════════════════════════════

    async fn notification_pass(
        &self,
        cmd: &RunGraceSchedulerCommand,
        result: &mut RunGraceSchedulerResult,
    ) {
        let candidates = match self
            .reader
            .list_by_status(&[SubscriptionStatus::PastDue, SubscriptionStatus::Trialing])
            .await
        {
            Ok(rows) => rows,
            Err(err) => {
                tracing::error!(error = %err, "Cannot load notification candidates");
                result.errors += 1;
                return;
            }
        };

        let horizon = i64::from(self.policy.max_notification_day());
        for candidate in candidates.iter().filter(|s| self.in_notification_window(s, cmd.now, horizon)) {
            result.processed += 1;
            match self.notify_one(candidate, cmd).await {
                Ok(NotifyStep::NotDue) => {}
                Ok(NotifyStep::Notified) => result.notified += 1,
                Ok(NotifyStep::Unconfirmed) => result.unconfirmed += 1,
                Err(err) => {
                    tracing::warn!(
                        subscription_id = %candidate.id,
                        error = %err,
                        "Grace notification failed"
                    );
                    result.errors += 1;
                }
            }
        }
    }

    fn in_notification_window(&self, subscription: &Subscription, now: Timestamp, horizon: i64) -> bool {
        match subscription.status {
            SubscriptionStatus::PastDue => true,
            SubscriptionStatus::Trialing => subscription.trial_ends_at.is_some()
                && self
                    .policy
                    .days_until_expiration(subscription, now)
                    .map_or(false, |days| days <= horizon),
            _ => false,
        }
    }

    async fn notify_one(
        &self,
        candidate: &Subscription,
        cmd: &RunGraceSchedulerCommand,
    ) -> Result<NotifyStep, BillingError> {
        if self.policy.due_notification_day(candidate, cmd.now).is_none() {
            return Ok(NotifyStep::NotDue);
        }
        if cmd.dry_run {
            return Ok(NotifyStep::Notified);
        }

        let mut tx = self.store.begin().await?;
        let Some(locked) = tx.lock_subscription(candidate.id).await? else {
            return Ok(NotifyStep::NotDue);
        };
        let (Some(day), Some(grace_deadline)) = (
            self.policy.due_notification_day(&locked, cmd.now),
            self.policy.grace_deadline(&locked),
        ) else {
            return Ok(NotifyStep::NotDue);
        };

        let notice = GraceNotice {
            tenant_id: locked.tenant_id,
            subscription_id: locked.id,
            status: locked.status,
            day,
            grace_deadline,
        };
        let delivery = self
            .notifier
            .notify(&notice)
            .await
            .map_err(|err| BillingError::transient(err.to_string()))?;

        if delivery == Delivery::Unconfirmed {
            tracing::info!(subscription_id = %locked.id, day, "Grace notice unconfirmed");
            return Ok(NotifyStep::Unconfirmed);
        }

        if let Some((updated, audit)) = locked.record_notification(day, grace_deadline, cmd.now) {
            tx.update_subscription(&updated).await?;
            tx.append_event(&audit).await?;
            tx.commit().await?;
            tracing::info!(
                subscription_id = %updated.id,
                tenant_id = %updated.tenant_id,
                day,
                grace_deadline = %grace_deadline,
                "Grace notice sent"
            );
        }
        Ok(NotifyStep::Notified)
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Expiration pass
    // ════════════════════════════════════════════════════════════════════════════

    async fn expiration_pass(
        &self,
        cmd: &RunGraceSchedulerCommand,
        result: &mut RunGraceSchedulerResult,
    ) {
        let candidates = match self
            .reader
            .list_by_status(&SubscriptionStatus::DEADLINE_BOUND)
            .await
        {
            Ok(rows) => rows,
            Err(err) => {
                tracing::error!(error = %err, "Cannot load expiration candidates");
                result.errors += 1;
                return;
            }
        };

        for candidate in candidates
            .iter()
            .filter(|s| self.policy.deadline_passed(s, cmd.now))
        {
            result.processed += 1;
            match self.expire_one(candidate, cmd).await {
                Ok(true) => result.expired += 1,
                Ok(false) => {}
                Err(err) => {
                    tracing::warn!(
                        subscription_id = %candidate.id,
                        error = %err,
                        "Expiration failed"
                    );
                    result.errors += 1;
                }
            }
        }
    }

    async fn expire_one(
        &self,
        candidate: &Subscription,
        cmd: &RunGraceSchedulerCommand,
    ) -> Result<bool, BillingError> {
        if cmd.dry_run {
            return Ok(true);
        }

        let mut tx = self.store.begin().await?;
        let Some(locked) = tx.lock_subscription(candidate.id).await? else {
            return Ok(false);
        };

        let transition = locked.apply(&LifecycleTrigger::DeadlineReached, &self.policy, cmd.now);
        if !transition.is_applied() {
            // Recovered or already expired since the scan.
            return Ok(false);
        }

        tx.update_subscription(&transition.subscription).await?;
        tx.append_event(&transition.event).await?;
        tx.commit().await?;

        tracing::info!(
            subscription_id = %transition.subscription.id,
            tenant_id = %transition.subscription.tenant_id,
            from = %candidate.status,
            "Subscription expired"
        );
        Ok(true)
    }
}
