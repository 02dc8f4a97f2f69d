//! Organization/user repository trait definition.

use tenantflow_types::error::RepositoryError;
use tenantflow_types::tenant::{Organization, OrganizationId, User, UserId};

/// Repository trait for organizations, users and their memberships.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait TenantRepository: Send + Sync {
    /// Create an organization. `Conflict` if the name is taken.
    fn create_organization(
        &self,
        organization: &Organization,
    ) -> impl std::future::Future<Output = Result<Organization, RepositoryError>> + Send;

    fn get_organization(
        &self,
        id: &OrganizationId,
    ) -> impl std::future::Future<Output = Result<Option<Organization>, RepositoryError>> + Send;

    fn get_organization_by_name(
        &self,
        name: &str,
    ) -> impl std::future::Future<Output = Result<Option<Organization>, RepositoryError>> + Send;

    /// List organizations ordered by name.
    fn list_organizations(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<Organization>, RepositoryError>> + Send;

    /// Create a user. `Conflict` if the email is taken.
    fn create_user(
        &self,
        user: &User,
    ) -> impl std::future::Future<Output = Result<User, RepositoryError>> + Send;

    fn get_user(
        &self,
        id: &UserId,
    ) -> impl std::future::Future<Output = Result<Option<User>, RepositoryError>> + Send;

    fn get_user_by_email(
        &self,
        email: &str,
    ) -> impl std::future::Future<Output = Result<Option<User>, RepositoryError>> + Send;

    /// Link a user to an organization. Returns `false` if the link already existed.
    fn link_user(
        &self,
        organization_id: &OrganizationId,
        user_id: &UserId,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    fn is_member(
        &self,
        organization_id: &OrganizationId,
        user_id: &UserId,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;
}
