//! OpenAPI specification and Swagger UI configuration.

use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Sequence Flow API",
        version = "0.1.0",
        description = "Drip email sequences: ordered steps sent to recipients with a whole-day wait between steps.",
        license(name = "MIT"),
    ),
    tags(
        (name = "Operations", description = "Health, info, readiness, and liveness probes"),
        (name = "Sequences", description = "Create, fetch, and delete sequences; toggle tracking"),
        (name = "Steps", description = "Add, edit, remove, and list the steps of a sequence"),
        (name = "Runs", description = "Start, inspect, and cancel drip runs"),
    ),
    paths(
        // Operations
        crate::rest::health_check,
        crate::rest::api_info,
        crate::rest::readiness,
        crate::rest::liveness,
        // Sequences
        crate::sequence_rest::create_sequence,
        crate::sequence_rest::get_sequence,
        crate::sequence_rest::update_tracking,
        crate::sequence_rest::delete_sequence,
        // Steps
        crate::step_rest::create_step,
        crate::step_rest::update_step,
        crate::step_rest::delete_step,
        crate::step_rest::list_steps,
        // Runs
        crate::sequence_rest::start_run,
        crate::run_rest::get_run,
        crate::run_rest::cancel_run,
    ),
    components(schemas(
        // Domain types
        sequence_core::models::Sequence,
        sequence_core::models::Step,
        sequence_core::models::NewSequence,
        sequence_core::models::NewStep,
        sequence_core::models::StepUpdate,
        sequence_core::runs::RunStatus,
        sequence_core::runs::RunSummary,
        sequence_core::runs::StepReport,
        sequence_core::runs::SendFailure,
        // Envelope and payloads
        crate::responses::ApiResponse,
        crate::rest::HealthResponse,
        crate::rest::InfoResponse,
        crate::sequence_rest::CreatedResponse,
        crate::sequence_rest::TrackingUpdate,
        crate::sequence_rest::RunStarted,
    ))
)]
pub struct ApiDoc;
