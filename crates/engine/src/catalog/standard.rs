//! The built-in provisioning catalog for web applications.
//!
//! Shared steps (project, billing, database, migration, admin user) carry the
//! `both` backend tag. The cluster backend adds cluster creation, image
//! build/push, rollout and ingress exposure; the serverless backend delivers
//! the application through a single platform deployment step.

use skyward_types::{BackendTag, InputFieldSpec, InputValidation, OperationTag};

use super::{Adoption, Catalog, StepDefinition};
use crate::error::CatalogError;

pub const CREATE_PROJECT: &str = "create_project";
pub const ENABLE_BILLING: &str = "enable_billing";
pub const ENABLE_SERVICES: &str = "enable_services";
pub const CREATE_DATABASE: &str = "create_database";
pub const MIGRATE_DATABASE: &str = "migrate_database";
pub const CREATE_ADMIN_USER: &str = "create_admin_user";
pub const SERVE_STATIC_CONTENT: &str = "serve_static_content";
pub const CREATE_SERVICE_ACCOUNTS: &str = "create_service_accounts";
pub const CREATE_CLUSTER: &str = "create_cluster";
pub const BUILD_IMAGE: &str = "build_image";
pub const PUSH_IMAGE: &str = "push_image";
pub const ROLLOUT_TO_CLUSTER: &str = "rollout_to_cluster";
pub const EXPOSE_ENDPOINT: &str = "expose_endpoint";
pub const DEPLOY_SERVERLESS: &str = "deploy_serverless";

/// Field holding the project identifier that keys progress records.
pub const PROJECT_ID_FIELD: &str = "project_id";

fn project_id() -> InputFieldSpec {
    InputFieldSpec::text(PROJECT_ID_FIELD, "Project ID")
        .with_description("6 to 30 lowercase letters, digits, or hyphens, starting with a letter")
        .with_validation(InputValidation::required().with_pattern("^[a-z][a-z0-9-]{5,29}$"))
}

fn project_name() -> InputFieldSpec {
    InputFieldSpec::text("project_name", "Project name")
        .with_default("${{ inputs.project_id }}")
        .with_validation(InputValidation::required().with_length(Some(4), Some(30)))
}

fn app_name() -> InputFieldSpec {
    InputFieldSpec::text("app_name", "Application name")
        .with_default("mysite")
        .with_validation(InputValidation::required().with_pattern("^[a-z][a-z0-9-]{0,39}$"))
}

fn region() -> InputFieldSpec {
    InputFieldSpec::text("region", "Region")
        .with_default("us-west1")
        .with_validation(InputValidation::required())
}

fn zone() -> InputFieldSpec {
    InputFieldSpec::derived("zone", "${{ inputs.region }}-a")
}

fn billing_account() -> InputFieldSpec {
    InputFieldSpec::text("billing_account", "Billing account ID")
        .with_description("formatted as XXXXXX-XXXXXX-XXXXXX")
        .with_validation(InputValidation::required().with_pattern("^[0-9A-Fa-f]{6}-[0-9A-Fa-f]{6}-[0-9A-Fa-f]{6}$"))
}

fn database_password() -> InputFieldSpec {
    InputFieldSpec::secret("database_password", "Database password")
        .with_validation(InputValidation::required().with_length(Some(6), None))
}

fn admin_password() -> InputFieldSpec {
    InputFieldSpec::secret("admin_password", "Admin password")
        .with_validation(InputValidation::required().with_length(Some(6), None))
}

fn source_dir() -> InputFieldSpec {
    InputFieldSpec::text("source_dir", "Application source directory").with_default(".")
}

/// Build the catalog used by the `skyward` command line.
pub fn standard_catalog() -> Result<Catalog, CatalogError> {
    Catalog::new(vec![
        StepDefinition::new(CREATE_PROJECT, "Creating project")
            .operation(OperationTag::Create)
            .adopts_existing(Adoption::Required)
            .input(project_id())
            .input(project_name()),
        StepDefinition::new(ENABLE_BILLING, "Enabling billing")
            .operation(OperationTag::Create)
            .depends_on([CREATE_PROJECT])
            .adopts_existing(Adoption::IfPresent)
            .input(project_id())
            .input(billing_account()),
        StepDefinition::new(ENABLE_SERVICES, "Enabling required cloud services")
            .operation(OperationTag::Create)
            .depends_on([ENABLE_BILLING])
            .input(project_id()),
        StepDefinition::new(CREATE_DATABASE, "Creating database")
            .operation(OperationTag::Create)
            .depends_on([ENABLE_SERVICES])
            .input(app_name())
            .input(region())
            .input(InputFieldSpec::derived("database_instance", "${{ inputs.app_name }}-instance"))
            .input(InputFieldSpec::derived("database_name", "${{ inputs.app_name }}-db"))
            .input(InputFieldSpec::derived("database_user", "postgres"))
            .input(database_password()),
        StepDefinition::new(MIGRATE_DATABASE, "Migrating database")
            .depends_on([CREATE_DATABASE])
            .input(source_dir())
            .input(database_password()),
        StepDefinition::new(CREATE_ADMIN_USER, "Creating admin user")
            .operation(OperationTag::Create)
            .depends_on([MIGRATE_DATABASE])
            .input(
                InputFieldSpec::text("admin_username", "Admin username")
                    .with_default("admin")
                    .with_validation(InputValidation::required().with_pattern("^[A-Za-z0-9]+$")),
            )
            .input(
                InputFieldSpec::text("admin_email", "Admin email")
                    .with_default("test@example.com")
                    .with_validation(InputValidation::required().with_pattern(r"^[^@\s]+@[^@\s]+\.[^@\s]+$")),
            )
            .input(admin_password()),
        StepDefinition::new(SERVE_STATIC_CONTENT, "Uploading static content")
            .depends_on([ENABLE_SERVICES])
            .input(InputFieldSpec::derived("static_bucket", "${{ inputs.project_id }}"))
            .input(source_dir()),
        StepDefinition::new(CREATE_SERVICE_ACCOUNTS, "Creating service accounts and secrets")
            .operation(OperationTag::Create)
            .depends_on([ENABLE_SERVICES])
            .input(app_name()),
        StepDefinition::new(CREATE_CLUSTER, "Creating cluster")
            .backend(BackendTag::Cluster)
            .operation(OperationTag::Create)
            .depends_on([ENABLE_SERVICES])
            .input(app_name())
            .input(region())
            .input(zone())
            .input(InputFieldSpec::derived("cluster_name", "${{ inputs.app_name }}")),
        StepDefinition::new(BUILD_IMAGE, "Building container image")
            .backend(BackendTag::Cluster)
            .depends_on([ENABLE_SERVICES])
            .input(app_name())
            .input(source_dir())
            .input(InputFieldSpec::derived("image_name", "gcr.io/${{ inputs.project_id }}/${{ inputs.app_name }}")),
        StepDefinition::new(PUSH_IMAGE, "Pushing container image")
            .backend(BackendTag::Cluster)
            .depends_on([BUILD_IMAGE]),
        StepDefinition::new(ROLLOUT_TO_CLUSTER, "Rolling out application to cluster")
            .backend(BackendTag::Cluster)
            .depends_on([CREATE_CLUSTER, PUSH_IMAGE, MIGRATE_DATABASE, CREATE_SERVICE_ACCOUNTS])
            .input(region())
            .input(zone())
            .input(InputFieldSpec::derived("cluster_name", "${{ inputs.app_name }}")),
        StepDefinition::new(EXPOSE_ENDPOINT, "Exposing public endpoint")
            .backend(BackendTag::Cluster)
            .depends_on([ROLLOUT_TO_CLUSTER])
            .provides_endpoint(),
        StepDefinition::new(DEPLOY_SERVERLESS, "Deploying to serverless platform")
            .backend(BackendTag::Serverless)
            .depends_on([MIGRATE_DATABASE, SERVE_STATIC_CONTENT, CREATE_SERVICE_ACCOUNTS])
            .input(region())
            .input(source_dir())
            .provides_endpoint(),
    ])
}
