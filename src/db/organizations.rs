use anyhow::Result;
use uuid::Uuid;

use crate::models::*;
use crate::validation::ValidationError;

use super::Inner;

/// Organization operations
pub struct OrganizationRepo;

impl OrganizationRepo {
    pub fn list(inner: &Inner) -> Vec<Organization> {
        let mut orgs: Vec<Organization> = inner.organizations.values().cloned().collect();
        orgs.sort_by(|a, b| a.name.cmp(&b.name));
        orgs
    }

    pub fn get(inner: &Inner, id: Uuid) -> Option<Organization> {
        inner.organizations.get(&id).cloned()
    }

    pub fn create(inner: &mut Inner, req: CreateOrganizationRequest) -> Result<Organization> {
        let mut errors = ValidationError::default();
        if req.name.trim().is_empty() {
            errors.add("name", "This field cannot be blank.");
        }
        let slug = req
            .slug
            .map(|s| crate::utils::slugify(&s))
            .unwrap_or_else(|| crate::utils::slugify(&req.name));
        if slug.is_empty() {
            errors.add("slug", "This field cannot be blank.");
        } else if inner.organizations.values().any(|o| o.slug == slug) {
            errors.add("slug", "Organization with this Slug already exists.");
        }
        errors.into_result()?;

        let mut org = Organization::new(&req.name);
        org.slug = slug;
        org.context = req.context;
        inner.organizations.insert(org.id, org.clone());
        tracing::info!("Created organization '{}' ({})", org.name, org.id);
        Ok(org)
    }
}
