// Route definitions

use serde_json::json;
use uuid::Uuid;
use warp::filters::BoxedFilter;
use warp::http::HeaderValue;
use warp::reply::Response;
use warp::{Filter, Rejection, Reply};

use crate::debug_log::RequestRecord;
use crate::error::handle_rejection;
use crate::filters::{
    admin, authenticated, client_info, json_body, json_body_or_default, optional_auth, query_map,
    rate_limit, with_state, AuthUser,
};
use crate::handlers::{auth, debug, health, llm, users};
use crate::rate_limit::Limit;
use crate::state::AppState;
use crate::ws::handle_connection;

/// Every route, with CORS, security headers, request logging and error recovery applied
pub fn configure_routes(
    state: AppState,
) -> impl Filter<Extract = impl warp::Reply, Error = Rejection> + Clone {
    let expose_internal = state.config.is_development();

    let api = warp::path("api")
        .and(rate_limit(state.clone(), Limit::Global))
        .and(
            auth_routes(state.clone())
                .or(user_routes(state.clone()))
                .unify()
                .or(llm_routes(state.clone()))
                .unify()
                .or(debug_routes(state.clone()))
                .unify()
                .or(health_routes(state.clone()))
                .unify()
                .or(ws_route(state.clone()))
                .unify(),
        );

    // GET /
    let root = warp::path::end()
        .and(warp::get())
        .and_then(health::root_handler);

    api.or(root)
        .unify()
        .recover(move |r| handle_rejection(r, expose_internal))
        .unify()
        .with(warp::reply::with::default_header(
            "x-content-type-options",
            HeaderValue::from_static("nosniff"),
        ))
        .with(warp::reply::with::default_header(
            "x-frame-options",
            HeaderValue::from_static("DENY"),
        ))
        .with(cors(&state.config.frontend_url))
        .with(warp::log::custom(request_logger(state)))
}

fn cors(frontend_url: &str) -> warp::cors::Builder {
    warp::cors()
        .allow_origin(frontend_url)
        .allow_credentials(true)
        .allow_methods(vec!["GET", "POST", "PUT", "DELETE", "OPTIONS"])
        .allow_headers(vec!["content-type", "authorization"])
}

/// `/api` requests other than the debug routes and the socket upgrade
fn recorded(path: &str) -> bool {
    path.starts_with("/api/") && !path.starts_with("/api/debug") && path != "/api/ws"
}

/// Traces every response and records `/api` requests in the debug log
fn request_logger(
    state: AppState,
) -> impl Fn(warp::log::Info<'_>) + Clone + Send + Sync + 'static {
    move |info: warp::log::Info<'_>| {
        let path = info.path().to_string();
        let status = info.status().as_u16();
        let duration_ms = i64::try_from(info.elapsed().as_millis()).unwrap_or(i64::MAX);
        let ip = info.remote_addr().map(|addr| addr.ip().to_string());
        let user_agent = info.user_agent().map(str::to_string);

        tracing::info!(
            method = %info.method(),
            path = %path,
            status,
            duration_ms,
            ip = ip.as_deref().unwrap_or("unknown"),
            "HTTP Request"
        );

        if !recorded(&path) {
            return;
        }
        let record = RequestRecord {
            method: info.method().to_string(),
            endpoint: path,
            status_code: status,
            duration_ms,
            user_id: None,
            metadata: Some(json!({ "ip": ip, "userAgent": user_agent })),
        };
        let debug_log = state.debug_log.clone();
        tokio::spawn(async move { debug_log.log_request(record).await });
    }
}

fn auth_routes(state: AppState) -> BoxedFilter<(Response,)> {
    let trust_proxy = state.config.trust_proxy;

    // POST /api/auth/register
    let register = warp::path!("auth" / "register")
        .and(warp::post())
        .and(rate_limit(state.clone(), Limit::Register))
        .and(json_body())
        .and(client_info(trust_proxy))
        .and(with_state(state.clone()))
        .and_then(auth::register_handler);

    // POST /api/auth/login
    let login = warp::path!("auth" / "login")
        .and(warp::post())
        .and(rate_limit(state.clone(), Limit::Login))
        .and(json_body())
        .and(client_info(trust_proxy))
        .and(with_state(state.clone()))
        .and_then(auth::login_handler);

    // POST /api/auth/refresh
    let refresh = warp::path!("auth" / "refresh")
        .and(warp::post())
        .and(rate_limit(state.clone(), Limit::Refresh))
        .and(json_body())
        .and(with_state(state.clone()))
        .and_then(auth::refresh_handler);

    // POST /api/auth/logout
    let logout = warp::path!("auth" / "logout")
        .and(warp::post())
        .and(authenticated(state.clone()))
        .and(json_body_or_default::<auth::RefreshRequest>())
        .and(client_info(trust_proxy))
        .and(with_state(state.clone()))
        .and_then(auth::logout_handler);

    // POST /api/auth/logout-all
    let logout_all = warp::path!("auth" / "logout-all")
        .and(warp::post())
        .and(authenticated(state.clone()))
        .and(client_info(trust_proxy))
        .and(with_state(state.clone()))
        .and_then(auth::logout_all_handler);

    // GET /api/auth/me
    let me = warp::path!("auth" / "me")
        .and(warp::get())
        .and(authenticated(state.clone()))
        .and_then(auth::me_handler);

    // PUT /api/auth/me
    let update_me = warp::path!("auth" / "me")
        .and(warp::put())
        .and(authenticated(state.clone()))
        .and(json_body())
        .and(client_info(trust_proxy))
        .and(with_state(state.clone()))
        .and_then(auth::update_me_handler);

    // PUT /api/auth/change-password
    let change_password = warp::path!("auth" / "change-password")
        .and(warp::put())
        .and(authenticated(state.clone()))
        .and(json_body())
        .and(client_info(trust_proxy))
        .and(with_state(state.clone()))
        .and_then(auth::change_password_handler);

    // GET /api/auth/sessions
    let sessions = warp::path!("auth" / "sessions")
        .and(warp::get())
        .and(authenticated(state.clone()))
        .and(with_state(state.clone()))
        .and_then(auth::sessions_handler);

    // DELETE /api/auth/sessions/{sessionId}
    let revoke_session = warp::path!("auth" / "sessions" / Uuid)
        .and(warp::delete())
        .and(authenticated(state.clone()))
        .and(with_state(state))
        .and_then(auth::revoke_session_handler);

    register
        .or(login)
        .unify()
        .or(refresh)
        .unify()
        .or(logout)
        .unify()
        .or(logout_all)
        .unify()
        .or(me)
        .unify()
        .or(update_me)
        .unify()
        .or(change_password)
        .unify()
        .or(sessions)
        .unify()
        .or(revoke_session)
        .unify()
        .boxed()
}

fn user_routes(state: AppState) -> BoxedFilter<(Response,)> {
    let trust_proxy = state.config.trust_proxy;

    // GET /api/users/profile
    let profile = warp::path!("users" / "profile")
        .and(warp::get())
        .and(authenticated(state.clone()))
        .and_then(auth::me_handler);

    // PUT /api/users/profile
    let update_profile = warp::path!("users" / "profile")
        .and(warp::put())
        .and(authenticated(state.clone()))
        .and(json_body())
        .and(client_info(trust_proxy))
        .and(with_state(state.clone()))
        .and_then(auth::update_me_handler);

    // GET /api/users/preferences
    let preferences = warp::path!("users" / "preferences")
        .and(warp::get())
        .and(authenticated(state.clone()))
        .and(with_state(state.clone()))
        .and_then(users::get_preferences_handler);

    // PUT /api/users/preferences
    let update_preferences = warp::path!("users" / "preferences")
        .and(warp::put())
        .and(authenticated(state.clone()))
        .and(json_body())
        .and(with_state(state.clone()))
        .and_then(users::update_preferences_handler);

    // GET /api/users
    let list = warp::path!("users")
        .and(warp::get())
        .and(admin(state.clone()))
        .and(query_map())
        .and(with_state(state))
        .and_then(users::list_users_handler);

    profile
        .or(update_profile)
        .unify()
        .or(preferences)
        .unify()
        .or(update_preferences)
        .unify()
        .or(list)
        .unify()
        .boxed()
}

/// Rate limit, then authenticate; every LLM route starts with this
fn llm_guard(state: AppState) -> BoxedFilter<(AuthUser,)> {
    rate_limit(state.clone(), Limit::Llm)
        .and(authenticated(state))
        .boxed()
}

fn llm_routes(state: AppState) -> BoxedFilter<(Response,)> {
    // POST /api/llm/conversations
    let create = warp::path!("llm" / "conversations")
        .and(warp::post())
        .and(llm_guard(state.clone()))
        .and(json_body_or_default::<llm::CreateConversationRequest>())
        .and(with_state(state.clone()))
        .and_then(llm::create_conversation_handler);

    // GET /api/llm/conversations
    let list = warp::path!("llm" / "conversations")
        .and(warp::get())
        .and(llm_guard(state.clone()))
        .and(query_map())
        .and(with_state(state.clone()))
        .and_then(llm::list_conversations_handler);

    // GET /api/llm/conversations/{conversationId}
    let get = warp::path!("llm" / "conversations" / Uuid)
        .and(warp::get())
        .and(llm_guard(state.clone()))
        .and(with_state(state.clone()))
        .and_then(llm::get_conversation_handler);

    // POST /api/llm/conversations/{conversationId}/messages
    let send = warp::path!("llm" / "conversations" / Uuid / "messages")
        .and(warp::post())
        .and(llm_guard(state.clone()))
        .and(rate_limit(state.clone(), Limit::Chat))
        .and(json_body())
        .and(with_state(state.clone()))
        .and_then(llm::send_message_handler);

    // PUT /api/llm/conversations/{conversationId}
    let update = warp::path!("llm" / "conversations" / Uuid)
        .and(warp::put())
        .and(llm_guard(state.clone()))
        .and(json_body())
        .and(with_state(state.clone()))
        .and_then(llm::update_conversation_handler);

    // DELETE /api/llm/conversations/{conversationId}
    let delete = warp::path!("llm" / "conversations" / Uuid)
        .and(warp::delete())
        .and(llm_guard(state.clone()))
        .and(with_state(state.clone()))
        .and_then(llm::delete_conversation_handler);

    // GET /api/llm/usage
    let usage = warp::path!("llm" / "usage")
        .and(warp::get())
        .and(llm_guard(state.clone()))
        .and(query_map())
        .and(with_state(state.clone()))
        .and_then(llm::usage_handler);

    // GET /api/llm/models
    let models = warp::path!("llm" / "models")
        .and(warp::get())
        .and(llm_guard(state))
        .and_then(llm::models_handler);

    create
        .or(list)
        .unify()
        .or(get)
        .unify()
        .or(send)
        .unify()
        .or(update)
        .unify()
        .or(delete)
        .unify()
        .or(usage)
        .unify()
        .or(models)
        .unify()
        .boxed()
}

fn debug_routes(state: AppState) -> BoxedFilter<(Response,)> {
    // GET /api/debug/logs
    let logs = warp::path!("debug" / "logs")
        .and(warp::get())
        .and(admin(state.clone()))
        .and(query_map())
        .and(with_state(state.clone()))
        .and_then(debug::logs_handler);

    // GET /api/debug/stats
    let stats = warp::path!("debug" / "stats")
        .and(warp::get())
        .and(admin(state.clone()))
        .and(query_map())
        .and(with_state(state.clone()))
        .and_then(debug::stats_handler);

    // POST /api/debug/log
    let log = warp::path!("debug" / "log")
        .and(warp::post())
        .and(optional_auth(state.clone()))
        .and(json_body())
        .and(with_state(state))
        .and_then(debug::log_event_handler);

    logs.or(stats).unify().or(log).unify().boxed()
}

fn health_routes(state: AppState) -> BoxedFilter<(Response,)> {
    // GET /api/health
    let basic = warp::path!("health")
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(health::health_handler);

    // GET /api/health/database
    let database = warp::path!("health" / "database")
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(health::database_handler);

    // GET /api/health/detailed
    let detailed = warp::path!("health" / "detailed")
        .and(warp::get())
        .and(with_state(state))
        .and_then(health::detailed_handler);

    basic.or(database).unify().or(detailed).unify().boxed()
}

// GET /api/ws
fn ws_route(state: AppState) -> BoxedFilter<(Response,)> {
    warp::path!("ws")
        .and(warp::ws())
        .and(with_state(state))
        .map(|ws: warp::ws::Ws, state: AppState| {
            ws.on_upgrade(move |socket| handle_connection(socket, state))
                .into_response()
        })
        .boxed()
}
