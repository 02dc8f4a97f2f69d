//! Workflow naming.
//!
//! Operator-chosen names are taken as-is or rejected; empty names are
//! generated as `<engine type>-<n>` from a per-organization sequence that is
//! never rewound, so a generated name is never issued twice.

use tenantflow_types::error::ControllerError;
use tenantflow_types::tenant::Organization;
use tenantflow_types::workflow::EngineType;
use tracing::debug;
use uuid::Uuid;

use crate::repository::workflow::WorkflowRepository;

/// Upper bound on sequence advances while skipping operator-taken candidates.
pub const MAX_GENERATION_ATTEMPTS: usize = 16;

pub const MAX_NAME_LEN: usize = 128;

/// Check the shape of a workflow name.
///
/// Names must not contain `/`, must be at most 128 characters and must not
/// parse as a UUID, so lookups by id-or-name stay unambiguous.
pub fn validate_name(name: &str) -> Result<(), ControllerError> {
    if name.contains('/') {
        return Err(ControllerError::Validation(format!(
            "workflow name '{name}' must not contain '/'"
        )));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(ControllerError::Validation(format!(
            "workflow name must be at most {MAX_NAME_LEN} characters"
        )));
    }
    if Uuid::parse_str(name).is_ok() {
        return Err(ControllerError::Validation(format!(
            "workflow name '{name}' must not be a UUID"
        )));
    }
    Ok(())
}

pub struct NameResolver<W: WorkflowRepository> {
    repo: W,
}

impl<W: WorkflowRepository> NameResolver<W> {
    pub fn new(repo: W) -> Self {
        Self { repo }
    }

    /// Pick the name a new workflow will be created under.
    ///
    /// A non-empty `requested` name is trimmed and returned if unused,
    /// otherwise `NameConflict`. An empty one is generated.
    pub async fn assign_name(
        &self,
        organization: &Organization,
        engine_type: &EngineType,
        requested: &str,
    ) -> Result<String, ControllerError> {
        let requested = requested.trim();
        if requested.is_empty() {
            return self.generate_name(organization, engine_type).await;
        }

        validate_name(requested)?;
        if self
            .repo
            .get_by_name(&organization.id, requested)
            .await?
            .is_some()
        {
            return Err(ControllerError::NameConflict {
                organization: organization.name.clone(),
                name: requested.to_string(),
            });
        }
        Ok(requested.to_string())
    }

    /// Advance the organization's sequence until a free `<engine>-<n>` is found.
    pub async fn generate_name(
        &self,
        organization: &Organization,
        engine_type: &EngineType,
    ) -> Result<String, ControllerError> {
        let mut candidate = String::new();
        for _ in 0..MAX_GENERATION_ATTEMPTS {
            let n = self.repo.next_name_sequence(&organization.id).await?;
            candidate = format!("{engine_type}-{n}");
            if self
                .repo
                .get_by_name(&organization.id, &candidate)
                .await?
                .is_none()
            {
                return Ok(candidate);
            }
            debug!(organization = %organization.name, %candidate, "generated name taken, advancing");
        }
        Err(ControllerError::NameConflict {
            organization: organization.name.clone(),
            name: candidate,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::memory::InMemoryWorkflowRepository;
    use crate::testing::sample_workflow;

    fn setup() -> (InMemoryWorkflowRepository, NameResolver<InMemoryWorkflowRepository>, Organization) {
        let repo = InMemoryWorkflowRepository::new();
        (repo.clone(), NameResolver::new(repo), Organization::new("default"))
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name("my_test_workflow").is_ok());
        assert!(validate_name("a/b").is_err());
        assert!(validate_name(&"x".repeat(129)).is_err());
        assert!(validate_name(&"x".repeat(128)).is_ok());
        assert!(validate_name(&Uuid::now_v7().to_string()).is_err());
    }

    #[tokio::test]
    async fn test_requested_name_is_trimmed() {
        let (_, resolver, org) = setup();
        let name = resolver
            .assign_name(&org, &EngineType::new("cwl"), "  analysis ")
            .await
            .unwrap();
        assert_eq!(name, "analysis");
    }

    #[tokio::test]
    async fn test_requested_name_conflicts_are_not_disambiguated() {
        let (repo, resolver, org) = setup();
        repo.insert(&sample_workflow(org.id, "analysis")).await.unwrap();
        let err = resolver
            .assign_name(&org, &EngineType::new("cwl"), "analysis")
            .await
            .unwrap_err();
        assert!(matches!(err, ControllerError::NameConflict { name, .. } if name == "analysis"));
    }

    #[tokio::test]
    async fn test_generated_names_follow_sequence() {
        let (_, resolver, org) = setup();
        let engine = EngineType::new("cwl");
        assert_eq!(resolver.assign_name(&org, &engine, "").await.unwrap(), "cwl-1");
        assert_eq!(resolver.assign_name(&org, &engine, " ").await.unwrap(), "cwl-2");
        assert_eq!(
            resolver.assign_name(&org, &EngineType::new("yadage"), "").await.unwrap(),
            "yadage-3"
        );
    }

    #[tokio::test]
    async fn test_generation_skips_operator_taken_candidates() {
        let (repo, resolver, org) = setup();
        repo.insert(&sample_workflow(org.id, "cwl-1")).await.unwrap();
        repo.insert(&sample_workflow(org.id, "cwl-2")).await.unwrap();
        let name = resolver
            .generate_name(&org, &EngineType::new("cwl"))
            .await
            .unwrap();
        assert_eq!(name, "cwl-3");
    }

    #[tokio::test]
    async fn test_generation_gives_up_after_bounded_attempts() {
        let (repo, resolver, org) = setup();
        for n in 1..=MAX_GENERATION_ATTEMPTS {
            repo.insert(&sample_workflow(org.id, &format!("cwl-{n}"))).await.unwrap();
        }
        let err = resolver
            .generate_name(&org, &EngineType::new("cwl"))
            .await
            .unwrap_err();
        assert!(matches!(err, ControllerError::NameConflict { .. }));
    }
}
