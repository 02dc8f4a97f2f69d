//! Organization/user registry.
//!
//! Resolves `(organization name, user email)` pairs into an authorized
//! `Owner`. Organizations are provisioned idempotently; users are created on
//! first link.

use tenantflow_types::error::{ControllerError, RepositoryError};
use tenantflow_types::tenant::{
    Organization, OrganizationId, Owner, User, normalize_email, validate_organization_name,
};
use tracing::{debug, info};

use crate::repository::tenant::TenantRepository;

pub struct TenantRegistry<T: TenantRepository> {
    repo: T,
}

impl<T: TenantRepository> TenantRegistry<T> {
    pub fn new(repo: T) -> Self {
        Self { repo }
    }

    /// Create the organization unless it already exists.
    pub async fn provision_organization(&self, name: &str) -> Result<Organization, ControllerError> {
        let name = name.trim();
        validate_organization_name(name).map_err(ControllerError::Validation)?;

        if let Some(existing) = self.repo.get_organization_by_name(name).await? {
            return Ok(existing);
        }

        match self.repo.create_organization(&Organization::new(name)).await {
            Ok(org) => {
                info!(organization = %org.name, id = %org.id, "organization provisioned");
                Ok(org)
            }
            // Lost a race against a concurrent provision of the same name.
            Err(RepositoryError::Conflict(_)) => self
                .repo
                .get_organization_by_name(name)
                .await?
                .ok_or_else(|| ControllerError::UnknownOrganization(name.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    /// Link a user to an organization, creating the user if needed.
    pub async fn link_user(
        &self,
        organization_name: &str,
        user_email: &str,
    ) -> Result<User, ControllerError> {
        let organization = self.organization_by_name(organization_name).await?;
        let email = normalize_email(user_email);
        if email.is_empty() || !email.contains('@') {
            return Err(ControllerError::Validation(format!(
                "'{user_email}' is not a valid email address"
            )));
        }

        let user = match self.repo.get_user_by_email(&email).await? {
            Some(user) => user,
            None => match self.repo.create_user(&User::new(email.clone())).await {
                Ok(user) => user,
                Err(RepositoryError::Conflict(_)) => self
                    .repo
                    .get_user_by_email(&email)
                    .await?
                    .ok_or(ControllerError::Repository(RepositoryError::NotFound))?,
                Err(e) => return Err(e.into()),
            },
        };

        if self.repo.link_user(&organization.id, &user.id).await? {
            info!(organization = %organization.name, user = %user.email, "user linked");
        } else {
            debug!(organization = %organization.name, user = %user.email, "user already linked");
        }
        Ok(user)
    }

    /// Resolve and authorize the owner of a request.
    pub async fn resolve_owner(
        &self,
        organization_name: &str,
        user_email: &str,
    ) -> Result<Owner, ControllerError> {
        let organization = self.organization_by_name(organization_name).await?;
        let email = normalize_email(user_email);
        let unauthorized = || ControllerError::UnauthorizedUser {
            user: user_email.to_string(),
            organization: organization.name.clone(),
        };

        let user = self
            .repo
            .get_user_by_email(&email)
            .await?
            .ok_or_else(unauthorized)?;
        if !self.repo.is_member(&organization.id, &user.id).await? {
            return Err(unauthorized());
        }
        Ok(Owner { organization, user })
    }

    pub async fn organization(&self, id: &OrganizationId) -> Result<Organization, ControllerError> {
        self.repo
            .get_organization(id)
            .await?
            .ok_or_else(|| ControllerError::UnknownOrganization(id.to_string()))
    }

    pub async fn organization_by_name(&self, name: &str) -> Result<Organization, ControllerError> {
        let name = name.trim();
        self.repo
            .get_organization_by_name(name)
            .await?
            .ok_or_else(|| ControllerError::UnknownOrganization(name.to_string()))
    }

    pub async fn list_organizations(&self) -> Result<Vec<Organization>, ControllerError> {
        Ok(self.repo.list_organizations().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::memory::InMemoryTenantRepository;

    fn registry() -> TenantRegistry<InMemoryTenantRepository> {
        TenantRegistry::new(InMemoryTenantRepository::new())
    }

    #[tokio::test]
    async fn test_provision_is_idempotent() {
        let registry = registry();
        let first = registry.provision_organization("default").await.unwrap();
        let second = registry.provision_organization(" default ").await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(registry.list_organizations().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_provision_rejects_path_like_names() {
        let err = registry().provision_organization("../etc").await.unwrap_err();
        assert!(matches!(err, ControllerError::Validation(_)));
    }

    #[tokio::test]
    async fn test_resolve_owner_requires_membership() {
        let registry = registry();
        registry.provision_organization("default").await.unwrap();
        registry.provision_organization("other").await.unwrap();
        registry.link_user("default", "Jane@example.org").await.unwrap();

        let owner = registry
            .resolve_owner("default", "jane@example.org")
            .await
            .unwrap();
        assert_eq!(owner.organization.name, "default");
        assert_eq!(owner.user.email, "jane@example.org");

        let err = registry
            .resolve_owner("other", "jane@example.org")
            .await
            .unwrap_err();
        assert!(matches!(err, ControllerError::UnauthorizedUser { .. }));

        let err = registry
            .resolve_owner("default", "nobody@example.org")
            .await
            .unwrap_err();
        assert!(matches!(err, ControllerError::UnauthorizedUser { .. }));
    }

    #[tokio::test]
    async fn test_unknown_organization() {
        let err = registry()
            .resolve_owner("missing", "jane@example.org")
            .await
            .unwrap_err();
        assert!(matches!(err, ControllerError::UnknownOrganization(name) if name == "missing"));
    }

    #[tokio::test]
    async fn test_link_user_twice_reuses_user() {
        let registry = registry();
        registry.provision_organization("default").await.unwrap();
        let a = registry.link_user("default", "jane@example.org").await.unwrap();
        let b = registry.link_user("default", "jane@example.org").await.unwrap();
        assert_eq!(a.id, b.id);
    }

    #[tokio::test]
    async fn test_link_user_rejects_invalid_email() {
        let registry = registry();
        registry.provision_organization("default").await.unwrap();
        let err = registry.link_user("default", "jane").await.unwrap_err();
        assert!(matches!(err, ControllerError::Validation(_)));
    }
}
