//! `tenant-billing` binary: webhook listener and batch jobs.

use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use sqlx::PgPool;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use tenant_billing::adapters::catalog::{YamlPlanCatalog, YamlTenantDirectory};
use tenant_billing::adapters::http::{webhook_router, WebhookAppState};
use tenant_billing::adapters::notifier::{LogGraceNotifier, ResendGraceNotifier};
use tenant_billing::adapters::postgres::{
    self, PostgresBillingStore, PostgresFailedWebhookRepository, PostgresRunLedger,
    PostgresSubscriptionReader,
};
use tenant_billing::adapters::stripe::{MockBillingProvider, StripeBillingProvider, StripeConfig};
use tenant_billing::application::handlers::{
    BackfillSubscriptionsCommand, BackfillSubscriptionsHandler, IngestWebhookHandler,
    ProviderRegistry, RetryFailedWebhooksCommand, RetryFailedWebhooksHandler,
    RunGraceSchedulerCommand, RunGraceSchedulerHandler, WebhookApplier,
    DEFAULT_BACKFILL_BATCH_SIZE,
};
use tenant_billing::config::AppConfig;
use tenant_billing::domain::foundation::{TenantId, Timestamp};
use tenant_billing::ports::{BillingProvider, GraceNotifier, TenantDirectory};

#[derive(Parser)]
#[command(name = "tenant-billing")]
#[command(version)]
#[command(about = "Tenant subscription lifecycle: webhooks, grace periods, backfill", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Listen for provider webhooks
    ServeWebhooks,

    /// Send grace-period reminders and expire lapsed subscriptions
    GracePeriod(GracePeriodArgs),

    /// Replay failed webhooks that are due
    RetryWebhooks(RetryWebhooksArgs),

    /// Create subscriptions for tenants that predate billing
    Backfill(BackfillArgs),
}

#[derive(Args, Debug)]
struct GracePeriodArgs {
    /// Run the notification pass (both passes run when neither flag is given)
    #[arg(long)]
    notifications: bool,

    /// Run the expiration pass
    #[arg(long)]
    expirations: bool,

    /// Run passes that already completed today
    #[arg(long)]
    force: bool,

    /// Report decisions without sending or writing
    #[arg(long)]
    dry_run: bool,
}

#[derive(Args, Debug)]
struct RetryWebhooksArgs {
    /// Maximum rows to replay (defaults to BILLING__RETRY_BATCH_SIZE)
    #[arg(long)]
    batch_size: Option<u32>,
}

#[derive(Args, Debug)]
struct BackfillArgs {
    /// Report what would be created without writing
    #[arg(long)]
    dry_run: bool,

    /// Also backfill tenants whose existing rows are all ended
    #[arg(long)]
    force: bool,

    /// Restrict to one tenant
    #[arg(long)]
    tenant_id: Option<uuid::Uuid>,

    /// Tenant YAML file (defaults to BILLING__TENANTS_FILE)
    #[arg(long)]
    tenants_file: Option<String>,

    /// Tenants per page
    #[arg(long, default_value_t = DEFAULT_BACKFILL_BATCH_SIZE)]
    batch_size: u32,

    /// Do not create provider customers
    #[arg(long = "skip-stripe")]
    skip_stripe: bool,

    /// Delete backfilled rows instead of creating them
    #[arg(long)]
    rollback: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load().context("Failed to load configuration")?;
    init_tracing(&config.server.log_level);
    config.validate().context("Invalid configuration")?;

    let pool = postgres::connect(&config.database)
        .await
        .context("Failed to connect to database")?;

    match cli.command {
        Commands::ServeWebhooks => serve_webhooks(&config, pool).await,
        Commands::GracePeriod(args) => grace_period(&config, pool, args).await,
        Commands::RetryWebhooks(args) => retry_webhooks(&config, pool, args).await,
        Commands::Backfill(args) => backfill(&config, pool, args).await,
    }
}

/// `RUST_LOG` wins over the configured filter; `LOG_FORMAT=json` switches to
/// JSON lines.
fn init_tracing(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let json = std::env::var("LOG_FORMAT")
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// Wiring
// ════════════════════════════════════════════════════════════════════════════════

fn store(config: &AppConfig, pool: &PgPool) -> Arc<PostgresBillingStore> {
    Arc::new(
        PostgresBillingStore::new(pool.clone()).with_lock_timeout(config.database.lock_timeout()),
    )
}

fn active_provider(config: &AppConfig) -> Arc<dyn BillingProvider> {
    let payment = &config.payment;
    if !payment.is_stripe() {
        tracing::warn!(provider = %payment.active_provider, "Using mock billing provider");
        return Arc::new(MockBillingProvider::new());
    }

    let mut stripe = StripeConfig::new(&payment.stripe_api_key, &payment.stripe_webhook_secret)
        .with_require_livemode(payment.stripe_require_livemode);
    if let Some(url) = &payment.stripe_api_base_url {
        stripe = stripe.with_base_url(url);
    }
    Arc::new(StripeBillingProvider::new(stripe))
}

fn registry(provider: Arc<dyn BillingProvider>, config: &AppConfig) -> Arc<ProviderRegistry> {
    Arc::new(ProviderRegistry::new(&config.payment.active_provider).register(provider))
}

async fn catalog(config: &AppConfig) -> anyhow::Result<Arc<YamlPlanCatalog>> {
    let catalog = YamlPlanCatalog::load(&config.billing.plans_file)
        .await
        .with_context(|| format!("Failed to load plan catalog {}", config.billing.plans_file))?;
    Ok(Arc::new(catalog))
}

async fn directory(path: &str) -> anyhow::Result<Arc<dyn TenantDirectory>> {
    let directory = YamlTenantDirectory::load(path)
        .await
        .with_context(|| format!("Failed to load tenant directory {}", path))?;
    Ok(Arc::new(directory))
}

async fn applier(config: &AppConfig, pool: &PgPool) -> anyhow::Result<Arc<WebhookApplier>> {
    Ok(Arc::new(WebhookApplier::new(
        store(config, pool),
        catalog(config).await?,
        config.billing.grace_policy(),
    )))
}

// ════════════════════════════════════════════════════════════════════════════════
// Subcommands
// ════════════════════════════════════════════════════════════════════════════════

async fn serve_webhooks(config: &AppConfig, pool: PgPool) -> anyhow::Result<()> {
    let registry = registry(active_provider(config), config);
    let ingest = IngestWebhookHandler::new(
        registry.clone(),
        applier(config, &pool).await?,
        Arc::new(PostgresFailedWebhookRepository::new(pool.clone())),
        config.billing.retry_policy(),
    )
    .with_timeout(config.billing.webhook_timeout());

    let router = webhook_router(WebhookAppState::new(registry, Arc::new(ingest)));
    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    tracing::info!(%addr, provider = %config.payment.active_provider, "Webhook listener started");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("Webhook listener stopped");
    Ok(())
}

async fn grace_period(config: &AppConfig, pool: PgPool, args: GracePeriodArgs) -> anyhow::Result<()> {
    let notifier: Arc<dyn GraceNotifier> = match &config.email {
        Some(email) => {
            let mut resend = ResendGraceNotifier::new(
                email.api_key(),
                email.from_header(),
                directory(&config.billing.tenants_file).await?,
            );
            if let Some(url) = &email.api_base_url {
                resend = resend.with_base_url(url);
            }
            Arc::new(resend)
        }
        None => {
            tracing::info!("No email configured, grace notices go to the log");
            Arc::new(LogGraceNotifier::new())
        }
    };

    let handler = RunGraceSchedulerHandler::new(
        store(config, &pool),
        Arc::new(PostgresSubscriptionReader::new(pool.clone())),
        notifier,
        Arc::new(PostgresRunLedger::new(pool)),
        config.billing.grace_policy(),
    );

    let both = !args.notifications && !args.expirations;
    let result = handler
        .handle(RunGraceSchedulerCommand {
            now: Timestamp::now(),
            notifications: both || args.notifications,
            expirations: both || args.expirations,
            force: args.force,
            dry_run: args.dry_run,
        })
        .await;

    if result.errors > 0 {
        anyhow::bail!("Grace-period run finished with {} errors", result.errors);
    }
    Ok(())
}

async fn retry_webhooks(
    config: &AppConfig,
    pool: PgPool,
    args: RetryWebhooksArgs,
) -> anyhow::Result<()> {
    let handler = RetryFailedWebhooksHandler::new(
        registry(active_provider(config), config),
        applier(config, &pool).await?,
        Arc::new(PostgresFailedWebhookRepository::new(pool)),
        config.billing.retry_policy(),
    )
    .with_timeout(config.billing.webhook_timeout());

    let result = handler
        .handle(RetryFailedWebhooksCommand {
            now: Timestamp::now(),
            batch_size: args.batch_size.unwrap_or(config.billing.retry_batch_size),
        })
        .await?;

    if result.errors > 0 {
        anyhow::bail!("Webhook retry run finished with {} ledger errors", result.errors);
    }
    Ok(())
}

async fn backfill(config: &AppConfig, pool: PgPool, args: BackfillArgs) -> anyhow::Result<()> {
    let tenants_file = args
        .tenants_file
        .as_deref()
        .unwrap_or(&config.billing.tenants_file);
    let mut handler = BackfillSubscriptionsHandler::new(
        store(config, &pool),
        directory(tenants_file).await?,
        catalog(config).await?,
    );
    if !args.skip_stripe {
        handler = handler.with_provider(active_provider(config));
    }

    let result = handler
        .handle(BackfillSubscriptionsCommand {
            dry_run: args.dry_run,
            force: args.force,
            tenant_id: args.tenant_id.map(TenantId::from_uuid),
            batch_size: args.batch_size,
            skip_provider: args.skip_stripe,
            rollback: args.rollback,
            ..BackfillSubscriptionsCommand::new(Timestamp::now())
        })
        .await?;

    if result.failed > 0 {
        anyhow::bail!("Backfill finished with {} failed tenants", result.failed);
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!(error = %err, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down"),
        _ = terminate => tracing::info!("Received terminate signal, shutting down"),
    }
}
