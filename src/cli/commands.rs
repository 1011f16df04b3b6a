//! Command implementations for the CLI
//!
//! SBIO pattern: Commands return Results, I/O is handled by caller

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::info;

use crate::capacity::{estimate_costs, CloudCostReport, ResourceCalculator, ServiceRequirement, TenantSpec, CATALOG};
use crate::clock::{Clock, SystemClock};
use crate::cluster::{ApiError, ClusterApi, ClusterOrchestrator, MemoryCluster, RestCluster};
use crate::config::{expand_path, AppConfig, ConfigError, TenantCreateRequest};
use crate::error::{ProvisionError, RenderError, ValidationError};
use crate::ledger::{
    DeploymentRecord, ImageStatus, ImageVersion, ImageVersionLedger, JsonlLedgerStore, LedgerError,
    LedgerStore, MemoryLedgerStore,
};
use crate::manifest::{image_tag, Bundle, BundleError, ManifestGenerator, ManifestPackage};
use crate::monitor::DeploymentHealthMonitor;
use crate::placement::{HardwarePlacementAdvisor, NodeInventory, PlacementError, PlacementReport};
use crate::provisioner::{Provisioner, TenantStatusReport};

/// Errors that can occur during command execution
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid request: {0}")]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Provision(#[from] ProvisionError),

    #[error("Render error: {0}")]
    Render(#[from] RenderError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Bundle error: {0}")]
    Bundle(#[from] BundleError),

    #[error("Placement error: {0}")]
    Placement(#[from] PlacementError),

    #[error("Cluster client error: {0}")]
    Cluster(#[from] ApiError),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("No cluster configured: set cluster.apiUrl or pass --dry-run")]
    NoCluster,
}

/// Result type for commands
pub type CommandResult<T> = Result<T, CommandError>;

// ============================================================================
// Request loading
// ============================================================================

/// A parsed and validated tenant request
#[derive(Debug, Clone)]
pub struct LoadedRequest {
    pub request: TenantCreateRequest,
    pub requirements: ServiceRequirement,
}

/// Load and validate a tenant request file
pub fn load_request(path: &Path) -> CommandResult<LoadedRequest> {
    let request = TenantCreateRequest::from_file(path)?;
    let requirements = request.validate()?;
    Ok(LoadedRequest {
        request,
        requirements,
    })
}

// ============================================================================
// Environment wiring
// ============================================================================

/// Everything a command needs, built once from the config file
pub struct Environment {
    pub config: AppConfig,
    pub provisioner: Provisioner,
    pub clock: Arc<dyn Clock>,
    pub dry_run: bool,
}

impl Environment {
    /// Wire the cluster client, ledger and provisioner
    ///
    /// A dry run uses an in-memory cluster and an in-memory ledger so nothing
    /// is applied or recorded. Otherwise a configured API server is required.
    pub fn build(config: AppConfig, dry_run: bool) -> CommandResult<Self> {
        let api: Arc<dyn ClusterApi>;
        let store: Arc<dyn LedgerStore>;
        if dry_run {
            api = MemoryCluster::shared();
            store = Arc::new(MemoryLedgerStore::new());
        } else {
            let url = config.cluster.api_url.as_ref().ok_or(CommandError::NoCluster)?;
            info!(api_url = %url, "Using Kubernetes API server");
            api = Arc::new(RestCluster::from_config(&config.cluster)?);
            store = Arc::new(JsonlLedgerStore::new(expand_path(&config.ledger_path)?));
        }

        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let orchestrator = ClusterOrchestrator::new(api)
            .with_timeout(Duration::from_secs(config.cluster.apply_timeout_secs));
        let ledger = ImageVersionLedger::new(store, clock.clone());

        let provisioner = Provisioner::new(
            ResourceCalculator::new(config.load_profile.clone()),
            ManifestGenerator::new(config.images.clone()),
            Arc::new(orchestrator),
            Arc::new(ledger),
        )
        .with_clock(clock.clone());

        Ok(Self {
            config,
            provisioner,
            clock,
            dry_run,
        })
    }

    pub fn ledger(&self) -> &Arc<ImageVersionLedger> {
        self.provisioner.ledger()
    }

    /// Health monitor over this environment's orchestrator and ledger
    pub fn monitor(&self, auto_rollback: bool) -> DeploymentHealthMonitor {
        let mut settings = self.config.monitor.clone();
        settings.auto_rollback |= auto_rollback;
        DeploymentHealthMonitor::new(
            self.provisioner.orchestrator().clone(),
            self.ledger().clone(),
            self.clock.clone(),
            settings,
        )
    }
}

/// Open the persistent ledger on its own, for commands that never touch a cluster
pub fn open_ledger(config: &AppConfig) -> CommandResult<ImageVersionLedger> {
    let store = JsonlLedgerStore::new(expand_path(&config.ledger_path)?);
    Ok(ImageVersionLedger::new(Arc::new(store), Arc::new(SystemClock)))
}

// ============================================================================
// Planning commands (pure)
// ============================================================================

/// Compute the tenant spec for a request
pub fn plan(provisioner: &Provisioner, loaded: &LoadedRequest) -> CommandResult<TenantSpec> {
    Ok(provisioner.generate_tenant_specs(
        &loaded.request.tenant_id,
        &loaded.requirements,
        loaded.request.gpu_type,
    )?)
}

/// Compute the spec and render its manifests
pub fn render(
    provisioner: &Provisioner,
    loaded: &LoadedRequest,
) -> CommandResult<(TenantSpec, ManifestPackage)> {
    let spec = plan(provisioner, loaded)?;
    let package = provisioner
        .generator()
        .render(&spec, loaded.request.advanced_config.as_ref())?;
    Ok((spec, package))
}

/// Build the bundle for a rendered package and write it to `dir`
pub fn write_bundle(spec: &TenantSpec, package: &ManifestPackage, dir: &Path) -> CommandResult<Bundle> {
    let bundle = Bundle::build(spec, package)?;
    bundle.write_to(dir)?;
    info!(dir = %dir.display(), files = bundle.files.len(), "Wrote bundle");
    Ok(bundle)
}

/// Monthly cost of the hardware plan per provider
pub fn cost(spec: &TenantSpec) -> CloudCostReport {
    estimate_costs(CATALOG, &spec.servers)
}

/// Rank node groups from an inventory file for each component
pub fn advise(spec: &TenantSpec, inventory: &Path, now: DateTime<Utc>) -> CommandResult<PlacementReport> {
    let inventory = NodeInventory::from_file(inventory)?;
    Ok(HardwarePlacementAdvisor::default().advise(spec, &inventory, now))
}

// ============================================================================
// Cluster commands
// ============================================================================

/// Provision the tenant described by a request
pub async fn apply(provisioner: &Provisioner, loaded: &LoadedRequest) -> CommandResult<TenantSpec> {
    let spec = plan(provisioner, loaded)?;
    Ok(provisioner
        .provision(&spec, loaded.request.advanced_config.as_ref())
        .await?)
}

pub async fn status(provisioner: &Provisioner, tenant_id: &str) -> CommandResult<TenantStatusReport> {
    provisioner
        .get_tenant_status(tenant_id)
        .await?
        .ok_or_else(|| CommandError::NotFound(format!("tenant '{}'", tenant_id)))
}

pub async fn delete(provisioner: &Provisioner, tenant_id: &str) -> CommandResult<bool> {
    Ok(provisioner.delete_tenant(tenant_id).await?)
}

// ============================================================================
// Ledger commands
// ============================================================================

fn parse_status(raw: &str) -> CommandResult<ImageStatus> {
    raw.parse().map_err(CommandError::InvalidArgument)
}

/// Record an image; its version is the reference's tag
pub async fn image_record(
    ledger: &ImageVersionLedger,
    service: &str,
    image: &str,
    status: &str,
    commit: Option<String>,
) -> CommandResult<ImageVersion> {
    let status = parse_status(status)?;
    let version = image_tag(image).to_string();
    Ok(ledger
        .record_image(service, &version, image, status, commit)
        .await?)
}

pub async fn image_promote(
    ledger: &ImageVersionLedger,
    service: &str,
    version: &str,
    status: &str,
    new_cycle: bool,
) -> CommandResult<ImageVersion> {
    let status = parse_status(status)?;
    Ok(ledger
        .set_image_status(service, version, status, new_cycle)
        .await?)
}

pub async fn image_list(
    ledger: &ImageVersionLedger,
    service: &str,
    limit: usize,
) -> CommandResult<Vec<ImageVersion>> {
    Ok(ledger.latest_versions(service, limit).await?)
}

/// Deployment records of a tenant, oldest first
pub async fn history(
    ledger: &ImageVersionLedger,
    tenant_id: &str,
    service: Option<&str>,
) -> CommandResult<Vec<DeploymentRecord>> {
    Ok(match service {
        Some(service) => ledger.deployment_history(tenant_id, service).await?,
        None => ledger.tenant_history(tenant_id).await?,
    })
}
