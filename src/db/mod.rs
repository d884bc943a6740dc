mod configs;
mod devices;
mod jobs;
mod organizations;
mod templates;
mod vpns;

use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::config::{Config as AppConfig, DefaultTemplatePolicy};
use crate::context::{ContextResolver, SystemContext};
use crate::models::*;
use crate::signals::{ConfigEvent, SignalRegistry};
use crate::tasks::TaskQueue;
use crate::vpn::{CertificateAuthority, LocalCertificateAuthority};

use configs::ConfigRepo;
use devices::DeviceRepo;
use jobs::JobRepo;
use organizations::OrganizationRepo;
use templates::TemplateRepo;
use vpns::VpnRepo;

/// Typed error for "resource not found", downcast by the API error handler
#[derive(Debug)]
pub struct NotFoundError {
    pub resource: String,
    pub id: String,
}

impl NotFoundError {
    pub fn new(resource: &str, id: &str) -> Self {
        Self {
            resource: resource.to_string(),
            id: id.to_string(),
        }
    }
}

impl std::fmt::Display for NotFoundError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} not found: {}", self.resource, self.id)
    }
}

impl std::error::Error for NotFoundError {}

fn not_found(resource: &str, id: Uuid) -> anyhow::Error {
    NotFoundError::new(resource, &id.to_string()).into()
}

/// Entity arena. Template order of a config lives in `Config::templates`.
#[derive(Default)]
pub(crate) struct Inner {
    organizations: HashMap<Uuid, Organization>,
    devices: HashMap<Uuid, Device>,
    configs: HashMap<Uuid, Config>,
    templates: HashMap<Uuid, Template>,
    vpns: HashMap<Uuid, Vpn>,
    certs: HashMap<Uuid, Cert>,
    vpn_clients: HashMap<Uuid, VpnClient>,
    jobs: HashMap<Uuid, PropagationJob>,
    /// Rendered config text keyed by config id
    rendered: HashMap<Uuid, String>,
}

/// Collaborators the repos need besides the arena
pub(crate) struct Services {
    resolver: ContextResolver,
    ca: Arc<dyn CertificateAuthority>,
    policy: DefaultTemplatePolicy,
    x509_dir: String,
    default_backend: String,
}

/// Store handles all entity operations, delegating to per-entity repo modules.
#[derive(Clone)]
pub struct Store {
    inner: Arc<RwLock<Inner>>,
    services: Arc<Services>,
    signals: SignalRegistry,
    task_queue: Arc<std::sync::RwLock<Option<Arc<dyn TaskQueue>>>>,
}

impl Store {
    pub fn new(cfg: &AppConfig) -> Self {
        Self::with_certificate_authority(cfg, Arc::new(LocalCertificateAuthority))
    }

    pub fn with_certificate_authority(cfg: &AppConfig, ca: Arc<dyn CertificateAuthority>) -> Self {
        let system = SystemContext::new(cfg.default_context.clone());
        Self {
            inner: Arc::new(RwLock::new(Inner::default())),
            services: Arc::new(Services {
                resolver: ContextResolver::new(system),
                ca,
                policy: cfg.default_template_policy,
                x509_dir: cfg.x509_dir.clone(),
                default_backend: cfg.default_backend.clone(),
            }),
            signals: SignalRegistry::new(),
            task_queue: Arc::new(std::sync::RwLock::new(None)),
        }
    }

    pub fn signals(&self) -> &SignalRegistry {
        &self.signals
    }

    pub fn resolver(&self) -> &ContextResolver {
        &self.services.resolver
    }

    /// Where template content changes are enqueued for propagation
    pub fn set_task_queue(&self, queue: Arc<dyn TaskQueue>) {
        let mut slot = self.task_queue.write().unwrap_or_else(|e| e.into_inner());
        *slot = Some(queue);
    }

    async fn read<T>(&self, f: impl FnOnce(&Inner, &Services) -> T) -> T {
        let inner = self.inner.read().await;
        f(&inner, &self.services)
    }

    /// Run a mutation, then deliver the events it produced once the lock
    /// has been released
    async fn write<T>(
        &self,
        f: impl FnOnce(&mut Inner, &Services, &mut Vec<ConfigEvent>) -> Result<T>,
    ) -> Result<T> {
        let mut events = Vec::new();
        let result = {
            let mut inner = self.inner.write().await;
            f(&mut inner, &self.services, &mut events)
        };
        for event in &events {
            self.signals.send(event);
        }
        result
    }

    async fn enqueue(&self, template_id: Uuid) {
        let queue = self
            .task_queue
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        match queue {
            Some(queue) => queue.enqueue(template_id).await,
            None => tracing::debug!("No task queue configured, skipping propagation of {}", template_id),
        }
    }

    // ========== Organization Operations ==========

    pub async fn list_organizations(&self) -> Result<Vec<Organization>> {
        Ok(self.read(|inner, _| OrganizationRepo::list(inner)).await)
    }

    pub async fn get_organization(&self, id: Uuid) -> Result<Option<Organization>> {
        Ok(self.read(|inner, _| OrganizationRepo::get(inner, id)).await)
    }

    pub async fn create_organization(&self, req: CreateOrganizationRequest) -> Result<Organization> {
        self.write(|inner, _, _| OrganizationRepo::create(inner, req)).await
    }

    // ========== Device Operations ==========

    pub async fn list_devices(&self) -> Result<Vec<Device>> {
        Ok(self.read(|inner, _| DeviceRepo::list(inner)).await)
    }

    pub async fn get_device(&self, id: Uuid) -> Result<Option<Device>> {
        Ok(self.read(|inner, _| DeviceRepo::get(inner, id)).await)
    }

    /// Create a device together with its config
    pub async fn create_device(&self, req: CreateDeviceRequest) -> Result<Device> {
        self.write(|inner, services, _| {
            let backend = req.backend.clone();
            let device = DeviceRepo::create(inner, req)?;
            let config_req = CreateConfigRequest {
                device: device.id,
                backend,
                ..Default::default()
            };
            if let Err(e) = ConfigRepo::create(inner, services, config_req) {
                DeviceRepo::delete(inner, device.id)?;
                return Err(e);
            }
            Ok(device)
        })
        .await
    }

    pub async fn delete_device(&self, id: Uuid) -> Result<()> {
        self.write(|inner, _, _| DeviceRepo::delete(inner, id)).await
    }

    pub async fn get_device_context(&self, id: Uuid) -> Result<HashMap<String, String>> {
        self.read(|inner, services| {
            let config = ConfigRepo::get_by_device(inner, id).ok_or_else(|| not_found("config", id))?;
            ConfigRepo::get_context(inner, services, config.id)
        })
        .await
    }

    // ========== VPN Operations ==========

    pub async fn list_vpns(&self) -> Result<Vec<Vpn>> {
        Ok(self.read(|inner, _| VpnRepo::list(inner)).await)
    }

    pub async fn get_vpn(&self, id: Uuid) -> Result<Option<Vpn>> {
        Ok(self.read(|inner, _| VpnRepo::get(inner, id)).await)
    }

    pub async fn create_vpn(&self, req: CreateVpnRequest) -> Result<Vpn> {
        self.write(|inner, services, _| VpnRepo::create(inner, services, req)).await
    }

    pub async fn get_cert(&self, id: Uuid) -> Result<Option<Cert>> {
        Ok(self.read(|inner, _| VpnRepo::get_cert(inner, id)).await)
    }

    pub async fn list_vpn_clients(&self, config_id: Uuid) -> Result<Vec<VpnClient>> {
        Ok(self.read(|inner, _| VpnRepo::list_clients(inner, config_id)).await)
    }

    // ========== Template Operations ==========

    pub async fn list_templates(&self) -> Result<Vec<Template>> {
        Ok(self.read(|inner, _| TemplateRepo::list(inner)).await)
    }

    pub async fn get_template(&self, id: Uuid) -> Result<Option<Template>> {
        Ok(self.read(|inner, _| TemplateRepo::get(inner, id)).await)
    }

    /// Validate and insert a new template. Creation never triggers propagation.
    pub async fn create_template(&self, template: Template) -> Result<Template> {
        self.write(|inner, _, _| TemplateRepo::create(inner, template)).await
    }

    /// Validate and persist an edited template. A content change enqueues
    /// status propagation to every config using it.
    pub async fn save_template(&self, template: Template) -> Result<Template> {
        let (saved, changed) = self
            .write(|inner, services, _| TemplateRepo::update(inner, services, template))
            .await?;
        if changed {
            self.enqueue(saved.id).await;
        }
        Ok(saved)
    }

    pub async fn update_template(&self, id: Uuid, req: CreateTemplateRequest) -> Result<Template> {
        let mut template = self
            .get_template(id)
            .await?
            .ok_or_else(|| not_found("template", id))?;
        template.apply_request(req);
        self.save_template(template).await
    }

    pub async fn delete_template(&self, id: Uuid) -> Result<()> {
        self.write(|inner, _, _| TemplateRepo::delete(inner, id)).await
    }

    /// Persist a copy of a template named "<name> (Clone)"
    pub async fn clone_template(&self, id: Uuid, actor: &str) -> Result<Template> {
        self.write(|inner, _, _| {
            let original = TemplateRepo::get(inner, id).ok_or_else(|| not_found("template", id))?;
            TemplateRepo::create(inner, original.clone_for(actor))
        })
        .await
    }

    pub async fn get_template_context(&self, id: Uuid) -> Result<HashMap<String, String>> {
        self.read(|inner, services| TemplateRepo::get_context(inner, services, id))
            .await
    }

    pub async fn get_template_system_context(&self, id: Uuid) -> Result<HashMap<String, String>> {
        self.read(|inner, services| TemplateRepo::get_system_context(inner, services, id))
            .await
    }

    pub async fn preview_template(&self, id: Uuid) -> Result<String> {
        self.read(|inner, services| TemplateRepo::preview(inner, services, id))
            .await
    }

    // ========== Config Operations ==========

    pub async fn list_configs(&self) -> Result<Vec<Config>> {
        Ok(self.read(|inner, _| ConfigRepo::list(inner)).await)
    }

    pub async fn get_config(&self, id: Uuid) -> Result<Option<Config>> {
        Ok(self.read(|inner, _| ConfigRepo::get(inner, id)).await)
    }

    pub async fn get_config_by_device(&self, device_id: Uuid) -> Result<Option<Config>> {
        Ok(self.read(|inner, _| ConfigRepo::get_by_device(inner, device_id)).await)
    }

    /// Create a config, attaching the default templates for its backend
    pub async fn create_config(&self, req: CreateConfigRequest) -> Result<Config> {
        self.write(|inner, services, _| ConfigRepo::create(inner, services, req)).await
    }

    pub async fn add_template_to_config(&self, config_id: Uuid, template_id: Uuid) -> Result<Config> {
        self.write(|inner, services, events| {
            ConfigRepo::add_template(inner, services, config_id, template_id, events)
        })
        .await
    }

    pub async fn remove_template_from_config(
        &self,
        config_id: Uuid,
        template_id: Uuid,
    ) -> Result<Config> {
        self.write(|inner, _, events| {
            ConfigRepo::remove_template(inner, config_id, template_id, events)
        })
        .await
    }

    pub async fn update_config(&self, config_id: Uuid, req: UpdateConfigRequest) -> Result<Config> {
        self.write(|inner, services, events| {
            ConfigRepo::update(inner, services, config_id, req, events)
        })
        .await
    }

    pub async fn set_status_applied(&self, config_id: Uuid) -> Result<Config> {
        self.set_config_status(config_id, ConfigStatus::Applied).await
    }

    pub async fn set_status_error(&self, config_id: Uuid) -> Result<Config> {
        self.set_config_status(config_id, ConfigStatus::Error).await
    }

    pub async fn set_config_status(&self, config_id: Uuid, status: ConfigStatus) -> Result<Config> {
        self.write(|inner, _, events| ConfigRepo::set_status(inner, config_id, status, events))
            .await
    }

    /// Rendered configuration text, served from cache when possible
    pub async fn render_config(&self, config_id: Uuid) -> Result<String> {
        if let Some(cached) = self.read(|inner, _| inner.rendered.get(&config_id).cloned()).await {
            return Ok(cached);
        }
        self.write(|inner, services, _| ConfigRepo::render(inner, services, config_id))
            .await
    }

    /// Drop the cached rendering of a config
    pub async fn clear_backend_instance(&self, config_id: Uuid) {
        self.inner.write().await.rendered.remove(&config_id);
    }

    pub async fn get_config_context(&self, config_id: Uuid) -> Result<HashMap<String, String>> {
        self.read(|inner, services| ConfigRepo::get_context(inner, services, config_id))
            .await
    }

    pub async fn list_configs_for_template(&self, template_id: Uuid) -> Result<Vec<Uuid>> {
        Ok(self
            .read(|inner, _| ConfigRepo::list_for_template(inner, template_id))
            .await)
    }

    /// Mark a config using an edited template as modified
    pub async fn update_related_config_status(&self, config_id: Uuid) -> Result<()> {
        self.write(|inner, _, events| ConfigRepo::update_related_status(inner, config_id, events))
            .await
    }

    // ========== Job Operations ==========

    pub async fn create_job(&self, template_id: Uuid) -> Result<PropagationJob> {
        self.write(|inner, _, _| Ok(JobRepo::create(inner, template_id))).await
    }

    pub async fn get_job(&self, id: Uuid) -> Result<Option<PropagationJob>> {
        Ok(self.read(|inner, _| JobRepo::get(inner, id)).await)
    }

    pub async fn list_jobs(&self) -> Result<Vec<PropagationJob>> {
        Ok(self.read(|inner, _| JobRepo::list(inner)).await)
    }

    pub async fn update_job_started(&self, id: Uuid) -> Result<()> {
        self.write(|inner, _, _| JobRepo::update_started(inner, id)).await
    }

    pub async fn update_job_finished(
        &self,
        id: Uuid,
        status: TaskStatus,
        updated_configs: usize,
        error: Option<String>,
    ) -> Result<()> {
        self.write(|inner, _, _| JobRepo::update_finished(inner, id, status, updated_configs, error))
            .await
    }
}
