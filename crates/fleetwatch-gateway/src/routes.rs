//! Router configuration.
//!
//! This module sets up the Axum router with all routes and middleware.

use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use fleetwatch_control::FleetControl;

use crate::handlers::{agent_groups, agents, commands, connections, health, opamp};
use crate::state::GatewayState;

/// Create the gateway router with all routes and middleware.
///
/// # Routes
///
/// ## Public
/// - `GET /health` - Health check
///
/// ## Agent transport
/// - `GET /v1/opamp` - WebSocket upgrade for agents
///
/// ## Admin
/// - `GET /v1/connections` - List live connections
/// - `GET /v1/agents` - List agents
/// - `GET /v1/agents/{instance_uid}` - Get agent
/// - `GET /v1/agents/{instance_uid}/commands` - List an agent's commands
/// - `POST /v1/commands` - Issue command (acting user)
/// - `GET /v1/commands` - List commands
/// - `GET /v1/commands/{command_id}` - Get command
/// - `POST /v1/agent-groups` - Create group (acting user)
/// - `GET /v1/agent-groups` - List groups (`?includeDeleted=true`)
/// - `GET /v1/agent-groups/{name}` - Get group
/// - `PUT /v1/agent-groups/{name}` - Update group (acting user)
/// - `DELETE /v1/agent-groups/{name}` - Soft-delete group (acting user)
pub fn create_router<C>(state: GatewayState<C>) -> Router
where
    C: FleetControl + 'static,
{
    // Extract config values before moving state
    let cors = build_cors_layer(&state.config.cors_origins);
    let max_body_bytes = state.config.max_body_bytes;
    let request_timeout = state.config.request_timeout();

    let state = Arc::new(state);

    Router::new()
        // Health (public)
        .route("/health", get(health::health::<C>))
        // Agent transport
        .route("/v1/opamp", get(opamp::opamp_handler::<C>))
        // Connections
        .route(
            "/v1/connections",
            get(connections::list_connections::<C>),
        )
        // Agents
        .route("/v1/agents", get(agents::list_agents::<C>))
        .route("/v1/agents/{instance_uid}", get(agents::get_agent::<C>))
        .route(
            "/v1/agents/{instance_uid}/commands",
            get(agents::list_agent_commands::<C>),
        )
        // Commands
        .route(
            "/v1/commands",
            get(commands::list_commands::<C>).post(commands::create_command::<C>),
        )
        .route("/v1/commands/{command_id}", get(commands::get_command::<C>))
        // Agent groups
        .route(
            "/v1/agent-groups",
            get(agent_groups::list_agent_groups::<C>)
                .post(agent_groups::create_agent_group::<C>),
        )
        .route(
            "/v1/agent-groups/{name}",
            get(agent_groups::get_agent_group::<C>)
                .put(agent_groups::update_agent_group::<C>)
                .delete(agent_groups::delete_agent_group::<C>),
        )
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TimeoutLayer::new(request_timeout))
        .with_state(state)
}

/// Build the CORS layer from configured origins.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GatewayConfig;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use fleetwatch_control::{FleetControlService, InstanceUid};
    use fleetwatch_store::{MemoryStore, RocksStore};
    use futures::{SinkExt, StreamExt};
    use serde_json::{json, Value};
    use tempfile::TempDir;
    use tokio_tungstenite::tungstenite::Message as WsMessage;
    use tower::ServiceExt;

    fn app() -> Router {
        let control = Arc::new(FleetControlService::with_defaults(Arc::new(
            MemoryStore::new(),
        )));
        create_router(GatewayState::new(control, GatewayConfig::default()))
    }

    async fn send(
        app: &Router,
        method: &str,
        uri: &str,
        user: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(user) = user {
            builder = builder.header("X-Acting-User", user);
        }
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    #[test]
    fn cors_any_origin() {
        let origins = vec!["*".to_string()];
        let _layer = build_cors_layer(&origins);
    }

    #[test]
    fn cors_specific_origins() {
        let origins = vec![
            "http://localhost:3000".to_string(),
            "https://ops.example.com".to_string(),
        ];
        let _layer = build_cors_layer(&origins);
    }

    #[tokio::test]
    async fn health_is_public() {
        let (status, body) = send(&app(), "GET", "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["connections"], 0);
    }

    #[tokio::test]
    async fn mutations_require_acting_user() {
        let app = app();
        let (status, body) = send(
            &app,
            "POST",
            "/v1/agent-groups",
            None,
            Some(json!({"name": "edge"})),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"]["code"], "unauthorized");

        let (status, _) = send(
            &app,
            "POST",
            "/v1/commands",
            None,
            Some(json!({"kind": "restart", "target_instance_uid": InstanceUid::generate().to_string()})),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn command_lifecycle() {
        let app = app();
        let target = InstanceUid::generate();

        let (status, created) = send(
            &app,
            "POST",
            "/v1/commands",
            Some("alice"),
            Some(json!({"kind": "restart", "target_instance_uid": target.to_string()})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let id = created["command_id"].as_str().unwrap().to_string();

        let (status, fetched) = send(&app, "GET", &format!("/v1/commands/{id}"), None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(fetched, created);

        let (status, listed) = send(
            &app,
            "GET",
            &format!("/v1/agents/{target}/commands"),
            None,
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(listed["items"].as_array().unwrap().len(), 1);
        assert_eq!(listed["continue"], "");
        assert_eq!(listed["remainingItemCount"], 0);
    }

    #[tokio::test]
    async fn lookup_errors_use_the_error_envelope() {
        let app = app();

        let (status, body) = send(&app, "GET", "/v1/commands/not-a-uuid", None, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "bad_request");

        let missing = InstanceUid::generate();
        let (status, body) = send(&app, "GET", &format!("/v1/agents/{missing}"), None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], "not_found");

        let (status, body) = send(&app, "GET", "/v1/commands?continue=garbage", None, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "invalid_cursor");
    }

    #[tokio::test]
    async fn listing_pages_with_query_parameters() {
        let app = app();
        for name in ["a", "b", "c"] {
            let (status, _) = send(
                &app,
                "POST",
                "/v1/agent-groups",
                Some("alice"),
                Some(json!({"name": name})),
            )
            .await;
            assert_eq!(status, StatusCode::CREATED);
        }

        let (_, first) = send(&app, "GET", "/v1/agent-groups?limit=2", None, None).await;
        assert_eq!(first["items"].as_array().unwrap().len(), 2);
        assert_eq!(first["remainingItemCount"], 1);
        let token = first["continue"].as_str().unwrap();

        let (_, rest) = send(
            &app,
            "GET",
            &format!("/v1/agent-groups?continue={token}"),
            None,
            None,
        )
        .await;
        assert_eq!(rest["items"][0]["name"], "c");
        assert_eq!(rest["continue"], "");
    }

    #[tokio::test]
    async fn agent_group_soft_delete() {
        let app = app();
        let group = json!({
            "name": "edge",
            "priority": 10,
            "selector": {"identifying_attributes": {"env": "prod"}},
            "config": {"body": "exporters: {}", "content_type": "text/yaml"}
        });
        let (status, created) =
            send(&app, "POST", "/v1/agent-groups", Some("alice"), Some(group.clone())).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["created_by"], "alice");

        let (status, body) =
            send(&app, "POST", "/v1/agent-groups", Some("alice"), Some(group.clone())).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"]["code"], "already_exists");

        let (status, _) = send(
            &app,
            "PUT",
            "/v1/agent-groups/edge",
            Some("bob"),
            Some(json!({"priority": 20})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = send(&app, "DELETE", "/v1/agent-groups/edge", Some("bob"), None).await;
        assert_eq!(status, StatusCode::OK);

        let (_, active) = send(&app, "GET", "/v1/agent-groups", None, None).await;
        assert!(active["items"].as_array().unwrap().is_empty());

        let (_, all) = send(&app, "GET", "/v1/agent-groups?includeDeleted=true", None, None).await;
        assert_eq!(all["items"].as_array().unwrap().len(), 1);

        let (status, _) = send(&app, "GET", "/v1/agent-groups/edge", None, None).await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = send(&app, "DELETE", "/v1/agent-groups/edge", Some("bob"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn validation_failures_are_bad_request() {
        let (status, body) = send(
            &app(),
            "POST",
            "/v1/agent-groups",
            Some("alice"),
            Some(json!({"name": "has spaces"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "validation_failed");
    }

    async fn next_reply(
        socket: &mut tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
        >,
    ) -> Value {
        loop {
            match socket.next().await.unwrap().unwrap() {
                WsMessage::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
                WsMessage::Ping(_) | WsMessage::Pong(_) => {}
                other => panic!("unexpected frame: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn agent_session_over_websocket() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(RocksStore::open(dir.path()).unwrap());
        let control = Arc::new(FleetControlService::with_defaults(store));
        let app = create_router(GatewayState::new(control, GatewayConfig::default()));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = app.clone();
        tokio::spawn(async move {
            axum::serve(listener, server).await.unwrap();
        });

        // Group with config for prod agents.
        let (status, _) = send(
            &app,
            "POST",
            "/v1/agent-groups",
            Some("alice"),
            Some(json!({
                "name": "prod",
                "selector": {"identifying_attributes": {"env": "prod"}},
                "config": {"body": "receivers: {}", "content_type": "text/yaml"}
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let (mut socket, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/v1/opamp"))
            .await
            .unwrap();
        let uid = InstanceUid::generate();

        socket
            .send(WsMessage::text(
                json!({
                    "instance_uid": uid.to_string(),
                    "sequence_num": 1,
                    "agent_description": {"identifying_attributes": {"env": "prod"}}
                })
                .to_string(),
            ))
            .await
            .unwrap();
        let reply = next_reply(&mut socket).await;
        assert_eq!(reply["instance_uid"], uid.to_string());
        assert_eq!(reply["remote_config"]["config"]["body"], "receivers: {}");

        // Malformed frame: error reply, connection stays up.
        socket.send(WsMessage::text("{oops")).await.unwrap();
        let reply = next_reply(&mut socket).await;
        assert_eq!(reply["error_response"]["kind"], "bad_request");

        // A command issued over HTTP arrives on the next exchange.
        let (status, command) = send(
            &app,
            "POST",
            "/v1/commands",
            Some("alice"),
            Some(json!({"kind": "restart", "target_instance_uid": uid.to_string()})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        socket
            .send(WsMessage::text(
                json!({"instance_uid": uid.to_string(), "sequence_num": 2}).to_string(),
            ))
            .await
            .unwrap();
        let reply = next_reply(&mut socket).await;
        assert_eq!(reply["commands"][0]["command_id"], command["command_id"]);

        let (_, connections) = send(&app, "GET", "/v1/connections", None, None).await;
        assert_eq!(connections["items"][0]["instance_uid"], uid.to_string());
        assert_eq!(connections["items"][0]["alive"], true);
        let (_, health) = send(&app, "GET", "/health", None, None).await;
        assert_eq!(health["connections"], 1);

        let (_, agent) = send(&app, "GET", &format!("/v1/agents/{uid}"), None, None).await;
        assert_eq!(agent["effective_group"], "prod");
    }
}
