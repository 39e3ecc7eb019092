//! BackfillSubscriptionsHandler - gives existing tenants a subscription row.
//!
//! Rows it creates are tagged with [`BACKFILL_SOURCE`] so `rollback` can
//! remove exactly those rows and nothing else. Tenants that already hold a
//! current subscription are always skipped.

use std::sync::Arc;

use serde_json::Value;

use crate::domain::billing::{
    BillingError, NewSubscription, Plan, Subscription, SubscriptionMetadata, SubscriptionStatus,
    BACKFILL_SOURCE, PROVIDER_CUSTOMER_KEY,
};
use crate::domain::foundation::{TenantId, Timestamp};
use crate::ports::{
    BillingProvider, BillingStore, CreateCustomerRequest, PlanCatalog, TenantDirectory,
    TenantRecord,
};

pub const DEFAULT_BACKFILL_BATCH_SIZE: u32 = 100;

#[derive(Debug, Clone)]
pub struct BackfillSubscriptionsCommand {
    pub now: Timestamp,
    /// Report what would happen; nothing is written.
    pub dry_run: bool,
    /// Also process tenants whose existing rows are all non-current.
    pub force: bool,
    /// Restrict the run to one tenant.
    pub tenant_id: Option<TenantId>,
    pub batch_size: u32,
    /// Do not create provider customers.
    pub skip_provider: bool,
    /// Delete previously backfilled rows instead of creating.
    pub rollback: bool,
}

impl BackfillSubscriptionsCommand {
    pub fn new(now: Timestamp) -> Self {
        Self {
            now,
            dry_run: false,
            force: false,
            tenant_id: None,
            batch_size: DEFAULT_BACKFILL_BATCH_SIZE,
            skip_provider: false,
            rollback: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackfillSubscriptionsResult {
    pub scanned: u32,
    pub created: u32,
    pub skipped: u32,
    pub failed: u32,
    pub deleted: u64,
}

enum TenantStep {
    Created,
    Skipped(&'static str),
}

pub struct BackfillSubscriptionsHandler {
    store: Arc<dyn BillingStore>,
    directory: Arc<dyn TenantDirectory>,
    catalog: Arc<dyn PlanCatalog>,
    provider: Option<Arc<dyn BillingProvider>>,
}

impl BackfillSubscriptionsHandler {
    pub fn new(
        store: Arc<dyn BillingStore>,
        directory: Arc<dyn TenantDirectory>,
        catalog: Arc<dyn PlanCatalog>,
    ) -> Self {
        Self {
            store,
            directory,
            catalog,
            provider: None,
        }
    }

    /// Provider used to create customers for new rows.
    pub fn with_provider(mut self, provider: Arc<dyn BillingProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// # Errors
    ///
    /// Fails only when the tenant directory or the rollback transaction
    /// fails. Per-tenant failures are counted.
    pub async fn handle(
        &self,
        cmd: BackfillSubscriptionsCommand,
    ) -> Result<BackfillSubscriptionsResult, BillingError> {
        if cmd.batch_size == 0 {
            return Err(BillingError::validation("batch size must be positive"));
        }
        if !cmd.skip_provider && !cmd.rollback && self.provider.is_none() {
            return Err(BillingError::configuration(
                "No billing provider configured; pass skip-provider to backfill without customers",
            ));
        }

        let result = if cmd.rollback {
            self.rollback(&cmd).await?
        } else {
            self.backfill(&cmd).await?
        };

        tracing::info!(
            scanned = result.scanned,
            created = result.created,
            skipped = result.skipped,
            failed = result.failed,
            deleted = result.deleted,
            dry_run = cmd.dry_run,
            rollback = cmd.rollback,
            "Backfill finished"
        );
        Ok(result)
    }

    async fn rollback(
        &self,
        cmd: &BackfillSubscriptionsCommand,
    ) -> Result<BackfillSubscriptionsResult, BillingError> {
        let mut tx = self.store.begin().await?;
        let deleted = tx.delete_migrated(BACKFILL_SOURCE, cmd.tenant_id).await?;
        if cmd.dry_run {
            tx.rollback().await?;
        } else {
            tx.commit().await?;
        }
        Ok(BackfillSubscriptionsResult {
            deleted,
            ..Default::default()
        })
    }

    async fn backfill(
        &self,
        cmd: &BackfillSubscriptionsCommand,
    ) -> Result<BackfillSubscriptionsResult, BillingError> {
        let mut result = BackfillSubscriptionsResult::default();

        if let Some(tenant_id) = cmd.tenant_id {
            let tenant = self
                .directory
                .get(tenant_id)
                .await?
                .ok_or_else(|| BillingError::validation(format!("Unknown tenant {}", tenant_id)))?;
            self.process(&tenant, cmd, &mut result).await;
            return Ok(result);
        }

        let mut after = None;
        loop {
            let page = self.directory.list(after, cmd.batch_size).await?;
            let Some(last) = page.last() else {
                break;
            };
            after = Some(last.tenant_id);
            for tenant in &page {
                self.process(tenant, cmd, &mut result).await;
            }
            if page.len() < cmd.batch_size as usize {
                break;
            }
        }
        Ok(result)
    }

    async fn process(
        &self,
        tenant: &TenantRecord,
        cmd: &BackfillSubscriptionsCommand,
        result: &mut BackfillSubscriptionsResult,
    ) {
        result.scanned += 1;
        match self.backfill_tenant(tenant, cmd).await {
            Ok(TenantStep::Created) => result.created += 1,
            Ok(TenantStep::Skipped(reason)) => {
                tracing::debug!(tenant_id = %tenant.tenant_id, reason, "Tenant skipped");
                result.skipped += 1;
            }
            Err(err) => {
                tracing::warn!(tenant_id = %tenant.tenant_id, error = %err, "Backfill failed for tenant");
                result.failed += 1;
            }
        }
    }

    async fn backfill_tenant(
        &self,
        tenant: &TenantRecord,
        cmd: &BackfillSubscriptionsCommand,
    ) -> Result<TenantStep, BillingError> {
        let mut tx = self.store.begin().await?;
        let existing = tx.subscriptions_for_tenant(tenant.tenant_id).await?;
        if existing.iter().any(|s| s.status.is_current()) {
            return Ok(TenantStep::Skipped("tenant has a current subscription"));
        }
        if !existing.is_empty() && !cmd.force {
            return Ok(TenantStep::Skipped("tenant has subscription history"));
        }

        let plan = self
            .catalog
            .find_by_slug(&tenant.plan_slug)
            .await?
            .ok_or_else(|| {
                BillingError::permanent(format!("Unknown plan '{}'", tenant.plan_slug))
            })?;

        if cmd.dry_run {
            return Ok(TenantStep::Created);
        }

        let mut metadata = SubscriptionMetadata::migrated_from(BACKFILL_SOURCE);
        if !cmd.skip_provider {
            let customer_id = self.create_customer(tenant).await?;
            metadata
                .extra
                .insert(PROVIDER_CUSTOMER_KEY.to_string(), Value::from(customer_id));
        }

        let (status, trial_ends_at) = initial_status(&plan, tenant.created_at, cmd.now);
        let (subscription, created) = Subscription::create(
            NewSubscription {
                tenant_id: tenant.tenant_id,
                plan_id: plan.id,
                status,
                external_subscription_id: None,
                trial_ends_at,
                current_period: None,
                cancel_at_period_end: false,
                metadata,
            },
            cmd.now,
        )?;

        tx.insert_subscription(&subscription).await?;
        tx.append_event(&created).await?;
        tx.commit().await?;

        tracing::info!(
            tenant_id = %tenant.tenant_id,
            subscription_id = %subscription.id,
            plan = %plan.slug,
            status = %status,
            "Backfilled subscription"
        );
        Ok(TenantStep::Created)
    }

    async fn create_customer(&self, tenant: &TenantRecord) -> Result<String, BillingError> {
        let provider = self
            .provider
            .as_ref()
            .ok_or_else(|| BillingError::configuration("No billing provider configured"))?;
        let customer = provider
            .create_customer(CreateCustomerRequest {
                tenant_id: tenant.tenant_id,
                email: tenant.email.clone(),
                name: Some(tenant.name.clone()),
                idempotency_key: Some(format!("backfill-{}", tenant.tenant_id)),
            })
            .await?;
        Ok(customer.id)
    }
}

/// Trialing while the tenant is younger than the plan's trial, else Active.
fn initial_status(
    plan: &Plan,
    tenant_created_at: Timestamp,
    now: Timestamp,
) -> (SubscriptionStatus, Option<Timestamp>) {
    if plan.has_trial() {
        let trial_ends_at = tenant_created_at.add_days(i64::from(plan.trial_days));
        if trial_ends_at > now {
            return (SubscriptionStatus::Trialing, Some(trial_ends_at));
        }
    }
    (SubscriptionStatus::Active, None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::catalog::{YamlPlanCatalog, YamlTenantDirectory};
    use crate::adapters::memory::InMemoryBillingStore;
    use crate::adapters::stripe::MockBillingProvider;
    use crate::application::handlers::billing::fixtures::{now, team_plan};
    use crate::domain::billing::{test_subscription, SubscriptionEventType};
    use crate::ports::ProviderError;

    // ════════════════════════════════════════════════════════════════════════════
    // Test Helpers
    // ════════════════════════════════════════════════════════════════════════════

    struct Harness {
        store: InMemoryBillingStore,
        provider: MockBillingProvider,
        tenants: Vec<TenantRecord>,
        handler: BackfillSubscriptionsHandler,
    }

    fn tenant(plan_slug: &str, age_days: i64) -> TenantRecord {
        let tenant_id = TenantId::new();
        TenantRecord {
            tenant_id,
            name: format!("Tenant {}", tenant_id),
            email: format!("billing+{}@example.test", tenant_id),
            plan_slug: plan_slug.to_string(),
            created_at: now().add_days(-age_days),
        }
    }

    fn harness(tenants: Vec<TenantRecord>) -> Harness {
        let store = InMemoryBillingStore::new();
        let provider = MockBillingProvider::new();
        let catalog = YamlPlanCatalog::from_plans(vec![team_plan()]).unwrap();
        let handler = BackfillSubscriptionsHandler::new(
            Arc::new(store.clone()),
            Arc::new(YamlTenantDirectory::from_records(tenants.clone())),
            Arc::new(catalog),
        )
        .with_provider(Arc::new(provider.clone()));
        Harness {
            store,
            provider,
            tenants,
            handler,
        }
    }

    fn command() -> BackfillSubscriptionsCommand {
        BackfillSubscriptionsCommand::new(now())
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Create Tests
    // ════════════════════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn creates_tagged_rows_with_customer_ids() {
        let h = harness(vec![tenant("team", 100), tenant("team", 200)]);

        let result = h.handler.handle(command()).await.unwrap();

        assert_eq!(result.scanned, 2);
        assert_eq!(result.created, 2);
        let rows = h.store.subscriptions().await;
        assert!(rows.iter().all(|s| s.is_migrated()));
        assert!(rows.iter().all(|s| s.status == SubscriptionStatus::Active));
        assert!(rows
            .iter()
            .all(|s| s.metadata.extra.contains_key(PROVIDER_CUSTOMER_KEY)));
        assert_eq!(h.provider.call_count("create_customer"), 2);

        let events = h.store.events().await;
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.event_type == SubscriptionEventType::Created));
    }

    #[tokio::test]
    async fn young_tenant_starts_in_trial() {
        let h = harness(vec![tenant("team", 3)]);

        h.handler.handle(command()).await.unwrap();

        let row = &h.store.subscriptions().await[0];
        assert_eq!(row.status, SubscriptionStatus::Trialing);
        assert_eq!(row.trial_ends_at, Some(h.tenants[0].created_at.add_days(14)));
    }

    #[tokio::test]
    async fn small_batches_page_through_every_tenant() {
        let tenants: Vec<_> = (0..5).map(|_| tenant("team", 100)).collect();
        let h = harness(tenants);

        let result = h
            .handler
            .handle(BackfillSubscriptionsCommand {
                batch_size: 2,
                ..command()
            })
            .await
            .unwrap();

        assert_eq!(result.scanned, 5);
        assert_eq!(result.created, 5);
    }

    #[tokio::test]
    async fn skip_provider_creates_no_customers() {
        let h = harness(vec![tenant("team", 100)]);

        h.handler
            .handle(BackfillSubscriptionsCommand {
                skip_provider: true,
                ..command()
            })
            .await
            .unwrap();

        assert!(!h.provider.was_called("create_customer"));
        let row = &h.store.subscriptions().await[0];
        assert!(!row.metadata.extra.contains_key(PROVIDER_CUSTOMER_KEY));
    }

    #[tokio::test]
    async fn single_tenant_run_touches_only_that_tenant() {
        let h = harness(vec![tenant("team", 100), tenant("team", 100)]);
        let target = h.tenants[1].tenant_id;

        let result = h
            .handler
            .handle(BackfillSubscriptionsCommand {
                tenant_id: Some(target),
                ..command()
            })
            .await
            .unwrap();

        assert_eq!(result.created, 1);
        assert_eq!(h.store.subscriptions().await[0].tenant_id, target);
    }

    #[tokio::test]
    async fn dry_run_writes_nothing() {
        let h = harness(vec![tenant("team", 100)]);

        let result = h
            .handler
            .handle(BackfillSubscriptionsCommand {
                dry_run: true,
                ..command()
            })
            .await
            .unwrap();

        assert_eq!(result.created, 1);
        assert!(h.store.subscriptions().await.is_empty());
        assert!(!h.provider.was_called("create_customer"));
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Skip & Failure Tests
    // ════════════════════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn tenant_with_current_subscription_is_skipped_even_with_force() {
        let h = harness(vec![tenant("team", 100)]);
        let mut existing = test_subscription(SubscriptionStatus::Active);
        existing.tenant_id = h.tenants[0].tenant_id;
        h.store.seed(existing).await;

        let result = h
            .handler
            .handle(BackfillSubscriptionsCommand {
                force: true,
                ..command()
            })
            .await
            .unwrap();

        assert_eq!(result.skipped, 1);
        assert_eq!(h.store.subscriptions().await.len(), 1);
    }

    #[tokio::test]
    async fn history_is_skipped_unless_forced() {
        let h = harness(vec![tenant("team", 100)]);
        let mut old = test_subscription(SubscriptionStatus::Expired);
        old.tenant_id = h.tenants[0].tenant_id;
        h.store.seed(old).await;

        let plain = h.handler.handle(command()).await.unwrap();
        assert_eq!(plain.skipped, 1);

        let forced = h
            .handler
            .handle(BackfillSubscriptionsCommand {
                force: true,
                ..command()
            })
            .await
            .unwrap();
        assert_eq!(forced.created, 1);
        assert_eq!(h.store.subscriptions().await.len(), 2);
    }

    #[tokio::test]
    async fn rerun_skips_already_backfilled_tenants() {
        let h = harness(vec![tenant("team", 100)]);

        h.handler.handle(command()).await.unwrap();
        let second = h.handler.handle(command()).await.unwrap();

        assert_eq!(second.skipped, 1);
        assert_eq!(h.store.subscriptions().await.len(), 1);
    }

    #[tokio::test]
    async fn unknown_plan_and_provider_errors_are_counted() {
        let h = harness(vec![tenant("enterprise", 100), tenant("team", 100)]);
        h.provider.set_method_error(
            "create_customer",
            ProviderError::rate_limited("slow down"),
        );

        let result = h.handler.handle(command()).await.unwrap();

        assert_eq!(result.failed, 2);
        assert!(h.store.subscriptions().await.is_empty());
    }

    #[tokio::test]
    async fn missing_provider_is_a_configuration_error() {
        let store = InMemoryBillingStore::new();
        let handler = BackfillSubscriptionsHandler::new(
            Arc::new(store),
            Arc::new(YamlTenantDirectory::from_records(vec![])),
            Arc::new(YamlPlanCatalog::from_plans(vec![team_plan()]).unwrap()),
        );

        let err = handler.handle(command()).await.unwrap_err();
        assert!(matches!(err, BillingError::Configuration(_)));
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Rollback Tests
    // ════════════════════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn rollback_removes_only_backfilled_rows() {
        let h = harness(vec![tenant("team", 100)]);
        h.handler.handle(command()).await.unwrap();
        let organic = test_subscription(SubscriptionStatus::Active);
        h.store.seed(organic.clone()).await;

        let result = h
            .handler
            .handle(BackfillSubscriptionsCommand {
                rollback: true,
                ..command()
            })
            .await
            .unwrap();

        assert_eq!(result.deleted, 1);
        let rows = h.store.subscriptions().await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, organic.id);
        assert!(h.store.events().await.is_empty());
    }

    #[tokio::test]
    async fn rollback_dry_run_keeps_rows() {
        let h = harness(vec![tenant("team", 100)]);
        h.handler.handle(command()).await.unwrap();

        let result = h
            .handler
            .handle(BackfillSubscriptionsCommand {
                rollback: true,
                dry_run: true,
                ..command()
            })
            .await
            .unwrap();

        assert_eq!(result.deleted, 1);
        assert_eq!(h.store.subscriptions().await.len(), 1);
    }
}
