//! WebhookApplier - applies one parsed webhook in a single transaction.
//!
//! The dedup claim, the row lock, the state transition and the audit entries
//! all live in the same transaction. Any error drops it, which rolls the
//! dedup row back too, so a failed event can be retried later.

use std::sync::Arc;

use serde_json::Value;

use crate::domain::billing::{
    BillingError, GracePolicy, LifecycleTrigger, NewSubscription, Plan, ProviderEvent,
    ProviderEventType, Subscription, SubscriptionEvent, SubscriptionEventType,
    SubscriptionMetadata, SubscriptionSnapshot, SubscriptionStatus, TransitionOutcome,
    PROVIDER_CUSTOMER_KEY,
};
use crate::domain::foundation::{SubscriptionId, TenantId, Timestamp};
use crate::ports::{BillingStore, BillingTransaction, ClaimResult, PlanCatalog, ProcessedWebhookEvent};

/// What happened to a webhook that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// A subscription was created or changed.
    Applied {
        subscription_id: SubscriptionId,
        event_type: SubscriptionEventType,
        from: SubscriptionStatus,
        to: SubscriptionStatus,
    },
    /// The event matched no edge; recorded for audit only.
    Ignored {
        subscription_id: Option<SubscriptionId>,
        reason: String,
    },
    /// Event id already processed.
    Duplicate,
    /// Older than the last event applied to the subscription.
    Stale { subscription_id: SubscriptionId },
    /// Event type we record but do not act on.
    Acknowledged,
}

pub struct WebhookApplier {
    store: Arc<dyn BillingStore>,
    catalog: Arc<dyn PlanCatalog>,
    policy: GracePolicy,
}

impl WebhookApplier {
    pub fn new(
        store: Arc<dyn BillingStore>,
        catalog: Arc<dyn PlanCatalog>,
        policy: GracePolicy,
    ) -> Self {
        Self {
            store,
            catalog,
            policy,
        }
    }

    /// Claims the event id and applies the event.
    ///
    /// # Errors
    ///
    /// - `TransientProcessing` for store failures and events whose
    ///   subscription does not exist yet
    /// - `PermanentProcessing` for unknown plans, tenants and constraint
    ///   violations
    /// - `Validation` when the event lacks the object its type requires
    pub async fn apply(
        &self,
        provider: &str,
        event: &ProviderEvent,
        now: Timestamp,
    ) -> Result<WebhookOutcome, BillingError> {
        let mut tx = self.store.begin().await?;

        let claim = ProcessedWebhookEvent::new(
            &event.external_event_id,
            provider,
            event.event_type.as_str(),
            now,
        );
        if tx.claim_event(&claim).await? == ClaimResult::AlreadyProcessed {
            tx.rollback().await?;
            tracing::debug!(event_id = %event.external_event_id, "Duplicate webhook");
            return Ok(WebhookOutcome::Duplicate);
        }

        let outcome = match &event.event_type {
            ProviderEventType::SubscriptionCreated => {
                self.on_created(tx.as_mut(), event, now).await?
            }
            ProviderEventType::TrialWillEnd | ProviderEventType::Unknown(_) => {
                WebhookOutcome::Acknowledged
            }
            _ => self.on_lifecycle(tx.as_mut(), event, now).await?,
        };

        tx.commit().await?;

        match &outcome {
            WebhookOutcome::Applied {
                subscription_id,
                event_type,
                from,
                to,
            } => tracing::info!(
                event_id = %event.external_event_id,
                subscription_id = %subscription_id,
                audit = %event_type,
                from = %from,
                to = %to,
                "Webhook applied"
            ),
            other => tracing::info!(
                event_id = %event.external_event_id,
                event_type = event.event_type.as_str(),
                outcome = ?other,
                "Webhook handled without transition"
            ),
        }
        Ok(outcome)
    }

    async fn on_created(
        &self,
        tx: &mut dyn BillingTransaction,
        event: &ProviderEvent,
        now: Timestamp,
    ) -> Result<WebhookOutcome, BillingError> {
        let snapshot = event.subscription().ok_or_else(|| {
            BillingError::validation("Subscription created event carries no subscription")
        })?;
        let external_id = &snapshot.external_subscription_id;

        if let Some(existing) = tx.lock_subscription_by_external_id(external_id).await? {
            let reason = "subscription already exists";
            tx.append_event(&ignored_event(&existing, event, reason, now))
                .await?;
            return Ok(WebhookOutcome::Ignored {
                subscription_id: Some(existing.id),
                reason: reason.to_string(),
            });
        }

        let tenant_id = snapshot
            .tenant_ref
            .as_deref()
            .and_then(|raw| raw.parse::<TenantId>().ok())
            .ok_or_else(|| {
                BillingError::permanent(format!(
                    "Subscription {} does not name a known tenant",
                    external_id
                ))
            })?;

        let price_id = snapshot.price_id.as_deref().ok_or_else(|| {
            BillingError::permanent(format!("Subscription {} has no price", external_id))
        })?;
        let plan = self.plan_for_price(price_id).await?;

        let status = match snapshot.status {
            Some(
                status @ (SubscriptionStatus::Trialing
                | SubscriptionStatus::Active
                | SubscriptionStatus::Incomplete),
            ) => status,
            Some(other) => {
                return Err(BillingError::permanent(format!(
                    "A subscription cannot start as {}",
                    other
                )))
            }
            None => {
                return Err(BillingError::permanent(format!(
                    "Subscription {} has a status we do not model",
                    external_id
                )))
            }
        };

        let existing = tx.subscriptions_for_tenant(tenant_id).await?;
        if existing.iter().any(|s| s.status.is_current()) {
            return Err(BillingError::permanent(format!(
                "Tenant {} already has a current subscription",
                tenant_id
            )));
        }

        let mut metadata = SubscriptionMetadata::default();
        metadata.record_event_ts(event.occurred_at);
        if let Some(customer_id) = &snapshot.customer_id {
            metadata
                .extra
                .insert(PROVIDER_CUSTOMER_KEY.to_string(), Value::from(customer_id.as_str()));
        }

        let (mut subscription, created) = Subscription::create(
            NewSubscription {
                tenant_id,
                plan_id: plan.id,
                status,
                external_subscription_id: Some(external_id.clone()),
                trial_ends_at: snapshot.trial_ends_at(),
                current_period: snapshot.period(),
                cancel_at_period_end: false,
                metadata,
            },
            now,
        )?;
        let mut audit = vec![created];

        if snapshot.cancel_at_period_end {
            let transition = subscription.apply(
                &LifecycleTrigger::CancellationScheduled {
                    ends_at: snapshot.period_end(),
                },
                &self.policy,
                now,
            );
            audit.push(transition.event);
            subscription = transition.subscription;
        }

        tx.insert_subscription(&subscription).await?;
        for entry in &audit {
            tx.append_event(entry).await?;
        }

        Ok(WebhookOutcome::Applied {
            subscription_id: subscription.id,
            event_type: SubscriptionEventType::Created,
            from: status,
            to: subscription.status,
        })
    }

    async fn on_lifecycle(
        &self,
        tx: &mut dyn BillingTransaction,
        event: &ProviderEvent,
        now: Timestamp,
    ) -> Result<WebhookOutcome, BillingError> {
        let Some(external_id) = event.external_subscription_id() else {
            return Ok(WebhookOutcome::Ignored {
                subscription_id: None,
                reason: "event does not reference a subscription".to_string(),
            });
        };

        // The create event may still be in flight.
        let subscription = tx
            .lock_subscription_by_external_id(external_id)
            .await?
            .ok_or_else(|| {
                BillingError::transient(format!("Subscription {} not found", external_id))
            })?;

        if subscription.metadata.is_stale(event.occurred_at) {
            let mut discarded = SubscriptionEvent::new(
                subscription.id,
                SubscriptionEventType::StaleEventDiscarded,
                format!("Discarded out-of-order {}", event.event_type.as_str()),
                now,
            )
            .with_property("external_event_id", event.external_event_id.as_str())
            .with_property("occurred_at", event.occurred_at);
            if let Some(last) = subscription.metadata.last_applied_event_ts() {
                discarded = discarded.with_property("last_applied_event_ts", last);
            }
            tx.append_event(&discarded).await?;
            tracing::info!(
                event_id = %event.external_event_id,
                subscription_id = %subscription.id,
                "Stale webhook discarded"
            );
            return Ok(WebhookOutcome::Stale {
                subscription_id: subscription.id,
            });
        }

        let triggers = self.triggers_for(event, &subscription).await?;
        if triggers.is_empty() {
            let reason = "no lifecycle change";
            tx.append_event(&ignored_event(&subscription, event, reason, now))
                .await?;
            return Ok(WebhookOutcome::Ignored {
                subscription_id: Some(subscription.id),
                reason: reason.to_string(),
            });
        }

        let subscription_id = subscription.id;
        let mut current = subscription;
        let mut first_from = None;
        let mut last_applied = None;
        let mut ignored_reason = None;

        for trigger in &triggers {
            let transition = current.apply(trigger, &self.policy, now);
            tx.append_event(&transition.event).await?;
            match &transition.outcome {
                TransitionOutcome::Applied { from, to } => {
                    first_from.get_or_insert(*from);
                    last_applied = Some((transition.event.event_type, *to));
                }
                TransitionOutcome::Ignored { reason } => {
                    tracing::info!(
                        subscription_id = %subscription_id,
                        trigger = trigger.name(),
                        reason = %reason,
                        "Transition ignored"
                    );
                    ignored_reason = Some(reason.clone());
                }
            }
            current = transition.subscription;
        }

        // Only an applied edge moves the ordering mark.
        Ok(match (first_from, last_applied) {
            (Some(from), Some((event_type, to))) => {
                current.metadata.record_event_ts(event.occurred_at);
                tx.update_subscription(&current).await?;
                WebhookOutcome::Applied {
                    subscription_id,
                    event_type,
                    from,
                    to,
                }
            }
            _ => WebhookOutcome::Ignored {
                subscription_id: Some(subscription_id),
                reason: ignored_reason.unwrap_or_else(|| "no lifecycle change".to_string()),
            },
        })
    }

    async fn triggers_for(
        &self,
        event: &ProviderEvent,
        subscription: &Subscription,
    ) -> Result<Vec<LifecycleTrigger>, BillingError> {
        Ok(match &event.event_type {
            ProviderEventType::PaymentSucceeded => {
                let period = event
                    .invoice()
                    .and_then(|invoice| invoice.period())
                    .or_else(|| event.subscription().and_then(|sub| sub.period()));
                vec![LifecycleTrigger::PaymentSucceeded { period }]
            }
            ProviderEventType::PaymentFailed => {
                if let Some(invoice) = event.invoice() {
                    tracing::info!(
                        subscription_id = %subscription.id,
                        attempt_count = invoice.attempt_count,
                        "Payment attempt failed"
                    );
                }
                vec![LifecycleTrigger::PaymentFailed]
            }
            ProviderEventType::SubscriptionCanceled => {
                vec![LifecycleTrigger::Canceled {
                    at_period_end: false,
                }]
            }
            ProviderEventType::SubscriptionUpdated => {
                let snapshot = event.subscription().ok_or_else(|| {
                    BillingError::validation("Subscription updated event carries no subscription")
                })?;
                self.update_triggers(snapshot, subscription).await?
            }
            _ => Vec::new(),
        })
    }

    /// Diffs the provider's view against ours.
    async fn update_triggers(
        &self,
        snapshot: &SubscriptionSnapshot,
        subscription: &Subscription,
    ) -> Result<Vec<LifecycleTrigger>, BillingError> {
        let mut triggers = Vec::new();

        if let Some(price_id) = &snapshot.price_id {
            let plan = self.plan_for_price(price_id).await?;
            if plan.id != subscription.plan_id {
                triggers.push(LifecycleTrigger::PlanChanged { plan_id: plan.id });
            }
        }

        if snapshot.cancel_at_period_end && !subscription.cancel_at_period_end {
            triggers.push(LifecycleTrigger::CancellationScheduled {
                ends_at: snapshot.period_end(),
            });
        } else if !snapshot.cancel_at_period_end && subscription.cancel_at_period_end {
            triggers.push(LifecycleTrigger::CancellationResumed);
        }

        match snapshot.status {
            Some(SubscriptionStatus::Unpaid) => triggers.push(LifecycleTrigger::RetriesExhausted),
            Some(SubscriptionStatus::IncompleteExpired) => {
                triggers.push(LifecycleTrigger::IncompleteExpired)
            }
            Some(SubscriptionStatus::Canceled) => triggers.push(LifecycleTrigger::Canceled {
                at_period_end: false,
            }),
            _ => {}
        }

        Ok(triggers)
    }

    async fn plan_for_price(&self, price_id: &str) -> Result<Plan, BillingError> {
        self.catalog
            .find_by_provider_price(price_id)
            .await?
            .ok_or_else(|| BillingError::permanent(format!("Unknown price '{}'", price_id)))
    }
}

/// Audit entry for a delivery that matched no edge of `subscription`.
fn ignored_event(
    subscription: &Subscription,
    event: &ProviderEvent,
    reason: &str,
    now: Timestamp,
) -> SubscriptionEvent {
    SubscriptionEvent::new(
        subscription.id,
        SubscriptionEventType::IgnoredTransition,
        format!("Ignored {} while {}", event.event_type.as_str(), subscription.status),
        now,
    )
    .with_property("external_event_id", event.external_event_id.as_str())
    .with_property("status", subscription.status.as_str())
    .with_property("reason", reason)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::catalog::YamlPlanCatalog;
    use crate::adapters::memory::InMemoryBillingStore;
    use crate::application::handlers::billing::fixtures::{
        invoice_event, now, snapshot, subscription_event, team_plan,
    };
    use crate::domain::billing::test_subscription;

    struct Harness {
        store: InMemoryBillingStore,
        applier: WebhookApplier,
        plan: Plan,
    }

    fn harness() -> Harness {
        let store = InMemoryBillingStore::new();
        let plan = team_plan();
        let catalog = YamlPlanCatalog::from_plans(vec![plan.clone()]).unwrap();
        let applier = WebhookApplier::new(
            Arc::new(store.clone()),
            Arc::new(catalog),
            GracePolicy::default(),
        );
        Harness {
            store,
            applier,
            plan,
        }
    }

    async fn seed(h: &Harness, status: SubscriptionStatus) -> Subscription {
        let mut sub = test_subscription(status);
        sub.plan_id = h.plan.id;
        h.store.seed(sub.clone()).await;
        sub
    }

    fn external(sub: &Subscription) -> String {
        sub.external_subscription_id.clone().unwrap()
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Lifecycle Tests
    // ════════════════════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn payment_failed_moves_active_to_past_due() {
        let h = harness();
        let sub = seed(&h, SubscriptionStatus::Active).await;

        let event = invoice_event("evt_1", ProviderEventType::PaymentFailed, &external(&sub), 100);
        let outcome = h.applier.apply("mock", &event, now()).await.unwrap();

        assert_eq!(
            outcome,
            WebhookOutcome::Applied {
                subscription_id: sub.id,
                event_type: SubscriptionEventType::PaymentFailed,
                from: SubscriptionStatus::Active,
                to: SubscriptionStatus::PastDue,
            }
        );
        let stored = &h.store.subscriptions().await[0];
        assert_eq!(stored.ends_at, Some(now().add_days(7)));
        assert_eq!(stored.metadata.last_applied_event_ts(), Some(100));
        assert!(h.store.is_processed("evt_1").await);
    }

    #[tokio::test]
    async fn duplicate_delivery_is_a_no_op() {
        let h = harness();
        let sub = seed(&h, SubscriptionStatus::Active).await;
        let event = invoice_event("evt_1", ProviderEventType::PaymentFailed, &external(&sub), 100);

        h.applier.apply("mock", &event, now()).await.unwrap();
        let second = h.applier.apply("mock", &event, now()).await.unwrap();

        assert_eq!(second, WebhookOutcome::Duplicate);
        assert_eq!(h.store.events().await.len(), 1);
    }

    #[tokio::test]
    async fn older_event_is_discarded_as_stale() {
        let h = harness();
        let sub = seed(&h, SubscriptionStatus::Active).await;

        let newer = invoice_event("evt_b", ProviderEventType::PaymentFailed, &external(&sub), 200);
        let older = invoice_event("evt_a", ProviderEventType::PaymentSucceeded, &external(&sub), 100);
        h.applier.apply("mock", &newer, now()).await.unwrap();
        let outcome = h.applier.apply("mock", &older, now()).await.unwrap();

        assert_eq!(outcome, WebhookOutcome::Stale { subscription_id: sub.id });
        let stored = &h.store.subscriptions().await[0];
        assert_eq!(stored.status, SubscriptionStatus::PastDue);
        assert!(h.store.is_processed("evt_a").await);
        let events = h.store.events().await;
        assert_eq!(
            events.last().unwrap().event_type,
            SubscriptionEventType::StaleEventDiscarded
        );
    }

    #[tokio::test]
    async fn equal_timestamps_are_applied() {
        let h = harness();
        let sub = seed(&h, SubscriptionStatus::Active).await;

        let failed = invoice_event("evt_1", ProviderEventType::PaymentFailed, &external(&sub), 100);
        let paid = invoice_event("evt_2", ProviderEventType::PaymentSucceeded, &external(&sub), 100);
        h.applier.apply("mock", &failed, now()).await.unwrap();
        h.applier.apply("mock", &paid, now()).await.unwrap();

        let stored = &h.store.subscriptions().await[0];
        assert_eq!(stored.status, SubscriptionStatus::Active);
        assert_eq!(stored.ends_at, None);
    }

    #[tokio::test]
    async fn unmatched_edge_is_recorded_as_ignored() {
        let h = harness();
        let sub = seed(&h, SubscriptionStatus::Trialing).await;

        let event = invoice_event("evt_1", ProviderEventType::PaymentFailed, &external(&sub), 100);
        let outcome = h.applier.apply("mock", &event, now()).await.unwrap();

        assert!(matches!(outcome, WebhookOutcome::Ignored { .. }));
        let events = h.store.events().await;
        assert_eq!(events[0].event_type, SubscriptionEventType::IgnoredTransition);
        assert_eq!(h.store.subscriptions().await[0].status, SubscriptionStatus::Trialing);
    }

    #[tokio::test]
    async fn newer_no_op_update_does_not_shadow_older_payment_failure() {
        let h = harness();
        let sub = seed(&h, SubscriptionStatus::Active).await;

        let noop = subscription_event(
            "evt_noop",
            ProviderEventType::SubscriptionUpdated,
            snapshot(&external(&sub)),
            200,
        );
        let failed = invoice_event("evt_failed", ProviderEventType::PaymentFailed, &external(&sub), 150);

        let first = h.applier.apply("mock", &noop, now()).await.unwrap();
        assert!(matches!(first, WebhookOutcome::Ignored { .. }));
        assert_eq!(h.store.subscriptions().await[0].metadata.last_applied_event_ts(), None);

        let second = h.applier.apply("mock", &failed, now()).await.unwrap();

        assert!(matches!(
            second,
            WebhookOutcome::Applied {
                to: SubscriptionStatus::PastDue,
                ..
            }
        ));
        let stored = &h.store.subscriptions().await[0];
        assert_eq!(stored.status, SubscriptionStatus::PastDue);
        assert_eq!(stored.metadata.last_applied_event_ts(), Some(150));
    }

    #[tokio::test]
    async fn ignored_trigger_does_not_advance_ordering_mark() {
        let h = harness();
        let sub = seed(&h, SubscriptionStatus::Trialing).await;

        let failed = invoice_event("evt_failed", ProviderEventType::PaymentFailed, &external(&sub), 200);
        let paid = invoice_event("evt_paid", ProviderEventType::PaymentSucceeded, &external(&sub), 100);
        h.applier.apply("mock", &failed, now()).await.unwrap();
        let outcome = h.applier.apply("mock", &paid, now()).await.unwrap();

        assert!(matches!(outcome, WebhookOutcome::Applied { .. }));
        let stored = &h.store.subscriptions().await[0];
        assert_eq!(stored.status, SubscriptionStatus::Active);
        assert_eq!(stored.metadata.last_applied_event_ts(), Some(100));
    }

    #[tokio::test]
    async fn no_op_update_is_audited_as_ignored() {
        let h = harness();
        let sub = seed(&h, SubscriptionStatus::Active).await;

        let event = subscription_event(
            "evt_1",
            ProviderEventType::SubscriptionUpdated,
            snapshot(&external(&sub)),
            100,
        );
        h.applier.apply("mock", &event, now()).await.unwrap();

        let events = h.store.events().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, SubscriptionEventType::IgnoredTransition);
        assert_eq!(events[0].subscription_id, sub.id);
        assert_eq!(
            events[0].property("reason"),
            Some(&Value::from("no lifecycle change"))
        );
        assert!(h.store.is_processed("evt_1").await);
    }

    #[tokio::test]
    async fn update_schedules_cancellation_and_changes_plan() {
        let h = harness();
        let mut sub = test_subscription(SubscriptionStatus::Active);
        sub.current_period_end = Some(now().add_days(20));
        h.store.seed(sub.clone()).await;

        let mut snap = snapshot(&external(&sub));
        snap.cancel_at_period_end = true;
        snap.price_id = h.plan.provider_price_id.clone();
        let event = subscription_event("evt_1", ProviderEventType::SubscriptionUpdated, snap, 100);

        h.applier.apply("mock", &event, now()).await.unwrap();

        let stored = &h.store.subscriptions().await[0];
        assert_eq!(stored.plan_id, h.plan.id);
        assert!(stored.cancel_at_period_end);
        assert_eq!(stored.ends_at, Some(now().add_days(20)));
        let types: Vec<_> = h.store.events().await.iter().map(|e| e.event_type).collect();
        assert_eq!(
            types,
            vec![
                SubscriptionEventType::PlanChanged,
                SubscriptionEventType::CancellationScheduled
            ]
        );
    }

    #[tokio::test]
    async fn unpaid_status_report_exhausts_retries() {
        let h = harness();
        let mut sub = seed(&h, SubscriptionStatus::Active).await;
        sub.status = SubscriptionStatus::PastDue;
        sub.ends_at = Some(now().add_days(3));
        h.store.seed(sub.clone()).await;

        let mut snap = snapshot(&external(&sub));
        snap.status = Some(SubscriptionStatus::Unpaid);
        let event = subscription_event("evt_1", ProviderEventType::SubscriptionUpdated, snap, 100);
        h.applier.apply("mock", &event, now()).await.unwrap();

        assert_eq!(h.store.subscriptions().await[0].status, SubscriptionStatus::Unpaid);
    }

    #[tokio::test]
    async fn deleted_subscription_is_canceled_immediately() {
        let h = harness();
        let sub = seed(&h, SubscriptionStatus::Active).await;

        let event = subscription_event(
            "evt_1",
            ProviderEventType::SubscriptionCanceled,
            snapshot(&external(&sub)),
            100,
        );
        h.applier.apply("mock", &event, now()).await.unwrap();

        let stored = &h.store.subscriptions().await[0];
        assert_eq!(stored.status, SubscriptionStatus::Canceled);
        assert_eq!(stored.ends_at, Some(now()));
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Creation Tests
    // ════════════════════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn created_event_inserts_subscription() {
        let h = harness();
        let tenant_id = TenantId::new();

        let mut snap = snapshot("sub_new");
        snap.status = Some(SubscriptionStatus::Trialing);
        snap.tenant_ref = Some(tenant_id.to_string());
        snap.price_id = h.plan.provider_price_id.clone();
        snap.customer_id = Some("cus_1".to_string());
        snap.trial_end = Some(now().add_days(14).as_unix_secs());
        let event = subscription_event("evt_1", ProviderEventType::SubscriptionCreated, snap, 100);

        let outcome = h.applier.apply("mock", &event, now()).await.unwrap();

        assert!(matches!(outcome, WebhookOutcome::Applied { .. }));
        let stored = &h.store.subscriptions().await[0];
        assert_eq!(stored.tenant_id, tenant_id);
        assert_eq!(stored.status, SubscriptionStatus::Trialing);
        assert_eq!(stored.trial_ends_at, Some(now().add_days(14)));
        assert_eq!(
            stored.metadata.extra.get(PROVIDER_CUSTOMER_KEY),
            Some(&Value::from("cus_1"))
        );
    }

    #[tokio::test]
    async fn created_event_for_existing_row_is_audited_as_ignored() {
        let h = harness();
        let sub = seed(&h, SubscriptionStatus::Active).await;

        let event = subscription_event(
            "evt_1",
            ProviderEventType::SubscriptionCreated,
            snapshot(&external(&sub)),
            100,
        );
        let outcome = h.applier.apply("mock", &event, now()).await.unwrap();

        assert_eq!(
            outcome,
            WebhookOutcome::Ignored {
                subscription_id: Some(sub.id),
                reason: "subscription already exists".to_string(),
            }
        );
        let events = h.store.events().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, SubscriptionEventType::IgnoredTransition);
        assert_eq!(h.store.subscriptions().await.len(), 1);
    }

    #[tokio::test]
    async fn created_event_without_tenant_is_permanent() {
        let h = harness();
        let mut snap = snapshot("sub_new");
        snap.price_id = h.plan.provider_price_id.clone();
        let event = subscription_event("evt_1", ProviderEventType::SubscriptionCreated, snap, 100);

        let err = h.applier.apply("mock", &event, now()).await.unwrap_err();

        assert!(matches!(err, BillingError::PermanentProcessing(_)));
        assert!(!h.store.is_processed("evt_1").await);
    }

    #[tokio::test]
    async fn created_event_with_unknown_price_is_permanent() {
        let h = harness();
        let mut snap = snapshot("sub_new");
        snap.tenant_ref = Some(TenantId::new().to_string());
        snap.price_id = Some("price_unknown".to_string());
        let event = subscription_event("evt_1", ProviderEventType::SubscriptionCreated, snap, 100);

        let err = h.applier.apply("mock", &event, now()).await.unwrap_err();
        assert!(matches!(err, BillingError::PermanentProcessing(_)));
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Failure Tests
    // ════════════════════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn missing_subscription_is_transient_and_rolls_back_claim() {
        let h = harness();
        let event = invoice_event("evt_1", ProviderEventType::PaymentFailed, "sub_missing", 100);

        let err = h.applier.apply("mock", &event, now()).await.unwrap_err();

        assert!(err.is_retryable());
        assert!(!h.store.is_processed("evt_1").await);
    }

    #[tokio::test]
    async fn lock_timeout_is_transient() {
        let h = harness();
        let sub = seed(&h, SubscriptionStatus::Active).await;
        h.store.fail_next_locks(1);

        let event = invoice_event("evt_1", ProviderEventType::PaymentFailed, &external(&sub), 100);
        let err = h.applier.apply("mock", &event, now()).await.unwrap_err();

        assert!(matches!(err, BillingError::TransientProcessing(_)));
        assert_eq!(h.store.subscriptions().await[0].status, SubscriptionStatus::Active);
    }

    #[tokio::test]
    async fn unknown_event_is_acknowledged_and_deduplicated() {
        let h = harness();
        let event = invoice_event(
            "evt_1",
            ProviderEventType::Unknown("customer.created".to_string()),
            "sub_x",
            100,
        );

        let outcome = h.applier.apply("mock", &event, now()).await.unwrap();

        assert_eq!(outcome, WebhookOutcome::Acknowledged);
        assert!(h.store.is_processed("evt_1").await);
    }
}
