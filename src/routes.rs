// src/routes.rs

use axum::{
    Router,
    http::Method,
    middleware,
    routing::{delete, get, post},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    handlers::{auth, events, exam, public, review, teacher},
    state::AppState,
    utils::jwt::{auth_middleware, teacher_middleware},
};

/// Assembles the main application router.
///
/// * Merges all sub-routers (auth, public, student, teacher).
/// * Applies global middleware (Trace, CORS).
/// * Injects global state (pool, config, event hub).
pub fn create_router(state: AppState) -> Router {
    let origins = [
        "http://localhost:3000".parse().unwrap(),
        "http://127.0.0.1:3000".parse().unwrap(),
    ];

    let cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
        ]);

    let auth_routes = Router::new()
        .route("/register", post(auth::register))
        .route("/login", post(auth::login));

    // Anonymous free-exam pipeline: no auth, no persistence.
    let public_routes = Router::new()
        .route("/exams", get(public::list_free_exams))
        .route("/exams/{id}", get(public::get_free_exam))
        .route("/exams/{id}/grade", post(public::grade_free_exam));

    let student_routes = Router::new()
        .route("/exams", get(exam::list_exams))
        .route("/exams/{id}/start", post(exam::start_exam))
        .route("/exams/{id}/submit", post(exam::submit_exam))
        .route("/reviews/{id}", get(review::get_review_exam))
        .route("/reviews/{id}/start", post(review::start_review_attempt))
        .route("/reviews/{id}/submit", post(review::submit_review_attempt))
        .route("/events", get(events::student_stream))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    let teacher_routes = Router::new()
        .route(
            "/students",
            get(teacher::list_students).post(teacher::create_student),
        )
        .route("/students/{id}", delete(teacher::delete_student))
        .route(
            "/students/{id}/exams/{exam_id}/toggle",
            post(teacher::toggle_exam),
        )
        .route(
            "/students/{id}/groups/{group}/toggle",
            post(teacher::toggle_group),
        )
        .route("/students/{id}/groups/{group}", get(teacher::group_overview))
        .route("/exams", post(teacher::create_exam))
        .route("/events", get(events::teacher_stream))
        // Double middleware protection: Auth first, then Teacher check
        .layer(middleware::from_fn(teacher_middleware))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    let api = Router::new()
        .nest("/auth", auth_routes)
        .nest("/public", public_routes)
        .nest("/teacher", teacher_routes)
        .merge(student_routes);

    Router::new()
        .nest("/api", api)
        // Global Middleware (applied from outside in)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
