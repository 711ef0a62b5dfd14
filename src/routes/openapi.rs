//! Optional API documentation interfaces
//!
//! Provides SwaggerUI, Redoc, Scalar, and RapiDoc interfaces when enabled
//! via configuration. Each interface can be independently enabled or
//! disabled; everything except Redoc sits behind the admin middleware.

use axum::Router;
use utoipa::OpenApi;

use crate::handlers::{admin::*, auth::*, entities::*, healthcheck::*, progress::*};
use crate::ingest::required::{RequiredItem, RequiredItemUsage};
use crate::ingest::SyncSummary;
use crate::models::audit::AuditEvent;
use crate::models::credentials::{ApiKey, JwtRecord};
use crate::models::entity::{EntityDraft, GameEntity};
use crate::models::progress::{Progress, ProgressUpdate};
use crate::models::user::{
    AuthResponse, AuthorizeRequest, AuthorizeResponse, ExchangeResponse, LoginRequest,
    RefreshRequest, Role, RoleUpdateRequest, TokenPairResponse, TokenRequest, User,
};
use crate::state::AppState;

/// OpenAPI specification structure with comprehensive endpoint documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        // Health check endpoints
        health,
        live,
        ready,
        // Authentication endpoints
        login,
        refresh,
        authorize,
        token,
        me,
        exchange,
        github_login,
        github_callback,
        // Data endpoints
        entity_list,
        entity_read,
        entity_create,
        entity_update,
        entity_delete,
        items_required,
        // Progress endpoints
        progress_list,
        progress_update,
        // Administrative endpoints
        api_key_create,
        api_key_list,
        api_key_revoke,
        sync_trigger,
        sync_status,
        token_revoke,
        audit_window,
        user_role_update,
    ),
    components(
        schemas(
            User,
            Role,
            LoginRequest,
            AuthResponse,
            RefreshRequest,
            TokenPairResponse,
            AuthorizeRequest,
            AuthorizeResponse,
            TokenRequest,
            ExchangeResponse,
            RoleUpdateRequest,
            GameEntity,
            EntityDraft,
            EntityListResponse,
            RequiredItem,
            RequiredItemUsage,
            Progress,
            ProgressUpdate,
            ApiKey,
            JwtRecord,
            ApiKeyCreateRequest,
            ApiKeyCreateResponse,
            SyncSummary,
            SyncStatusResponse,
            AuditEvent,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "healthcheck_endpoints", description = "Health check and system status endpoints"),
        (name = "auth_endpoints", description = "Authentication and token endpoints"),
        (name = "data_endpoints", description = "Game-data read and write endpoints"),
        (name = "progress_endpoints", description = "Per-user progress endpoints"),
        (name = "administration_endpoints", description = "Administrative endpoints. Require authentication and administrative privileges."),
    ),
)]
pub struct ApiDoc;

/// Security scheme modifier to add Bearer authentication
struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.security_schemes.insert(
                "bearer_auth".to_string(),
                utoipa::openapi::security::SecurityScheme::Http(
                    utoipa::openapi::security::HttpBuilder::new()
                        .scheme(utoipa::openapi::security::HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .description(Some("Enter JWT token"))
                        .build(),
                ),
            );
        }
    }
}

/// Creates SwaggerUI documentation router with interactive API exploration
/// Protected by authentication middleware
pub fn create_swagger_routes() -> Router {
    use utoipa_swagger_ui::SwaggerUi;

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
}

/// Creates Redoc documentation router with clean, readable interface
pub fn create_redoc_routes() -> Router {
    use utoipa_redoc::{Redoc, Servable};

    Router::new().merge(Redoc::with_url("/redoc", ApiDoc::openapi()))
}

/// Creates Scalar documentation router with modern, advanced interface
/// Protected by authentication middleware
pub fn create_scalar_routes() -> Router {
    use utoipa_scalar::{Scalar, Servable};

    Router::new().merge(Scalar::with_url("/scalar", ApiDoc::openapi()))
}

/// Creates RapiDoc documentation router with lightweight, fast interface
/// Protected by authentication middleware
pub fn create_rapidoc_routes() -> Router {
    use utoipa_rapidoc::RapiDoc;

    Router::new().merge(RapiDoc::new("/api-docs/openapi.json").path("/rapidoc"))
}

/// Creates the complete OpenAPI documentation router with configurable interfaces
/// Protected routes require admin authentication, ReDoc remains public
pub fn create_apidocs_routes(shared_state: AppState) -> Router {
    use crate::auth::admin_auth_middleware;
    use axum::middleware;

    let mut router = Router::new();
    let docs = &shared_state.config.openapi;

    if docs.enable_swagger_ui {
        router = router.merge(create_swagger_routes().route_layer(
            middleware::from_fn_with_state(shared_state.clone(), admin_auth_middleware),
        ));
    }
    if docs.enable_redoc {
        router = router.merge(create_redoc_routes());
    }
    if docs.enable_scalar {
        router = router.merge(create_scalar_routes().route_layer(
            middleware::from_fn_with_state(shared_state.clone(), admin_auth_middleware),
        ));
    }
    if docs.enable_rapidoc {
        router = router.merge(create_rapidoc_routes().route_layer(
            middleware::from_fn_with_state(shared_state.clone(), admin_auth_middleware),
        ));
    }

    router
}
