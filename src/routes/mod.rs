use axum::Router;

use crate::state::SharedState;

pub mod auth;
pub mod docs;
pub mod health;
pub mod leaderboard;
pub mod session;

/// Compose all route trees, wiring in shared state and documentation routes.
pub fn router(state: SharedState) -> Router<()> {
    health::router()
        .merge(session::router())
        .merge(auth::router())
        .merge(leaderboard::router())
        .merge(docs::router())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use axum::{
        body::{Body, to_bytes},
        http::{Method, Request, StatusCode, header},
        response::Response,
    };
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use super::*;
    use crate::state::test_support::memory_state;

    async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(value) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(value.to_string())
            }
            None => Body::empty(),
        };
        app.clone().oneshot(builder.body(body).unwrap()).await.unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn session_round_trip_over_http() {
        let (state, _) = memory_state().await;
        let app = router(state);

        let created = send(
            &app,
            Method::POST,
            "/session/create",
            Some(json!({
                "boxId": "ne-2026-00001",
                "universeLevel": 1,
                "playerName": "Ava",
                "playerColor": "red"
            })),
        )
        .await;
        assert_eq!(created.status(), StatusCode::CREATED);
        let created = json_body(created).await;
        assert_eq!(created["session"]["boxId"], "NE-2026-00001");
        assert_eq!(created["session"]["status"], "active");
        let session_id = created["session"]["id"].as_str().unwrap().to_string();
        let player_id = created["player"]["id"].as_str().unwrap().to_string();

        let conflict = send(
            &app,
            Method::POST,
            "/session/create",
            Some(json!({"boxId": "NE-2026-00001", "universeLevel": 1, "playerName": "Ben"})),
        )
        .await;
        assert_eq!(conflict.status(), StatusCode::CONFLICT);

        let submitted = send(
            &app,
            Method::POST,
            "/session/submit-score",
            Some(json!({"sessionId": session_id, "playerId": player_id, "finalNn": 12})),
        )
        .await;
        assert_eq!(submitted.status(), StatusCode::OK);
        let submitted = json_body(submitted).await;
        assert_eq!(submitted["sessionCompleted"], true);
        assert_eq!(submitted["sessionPlayer"]["finalNn"], 12);
        assert_eq!(submitted["nextSession"]["universeLevel"], 2);

        let details = send(
            &app,
            Method::GET,
            &format!("/session/{session_id}?playerId={player_id}"),
            None,
        )
        .await;
        assert_eq!(details.status(), StatusCode::OK);
        let details = json_body(details).await;
        assert_eq!(details["session"]["status"], "completed");
        assert_eq!(details["session"]["players"][0]["displayName"], "Ava");
        assert_eq!(details["stats"]["submittedCount"], 1);
        assert_eq!(details["referenceScores"]["personalBest"], 12);
        assert_eq!(details["nextSession"], submitted["nextSession"]);
    }

    #[tokio::test]
    async fn invalid_payloads_are_rejected() {
        let (state, _) = memory_state().await;
        let app = router(state);

        let bad_code = send(
            &app,
            Method::POST,
            "/session/create",
            Some(json!({"boxId": "BOX-1", "universeLevel": 1, "playerName": "Ava"})),
        )
        .await;
        assert_eq!(bad_code.status(), StatusCode::BAD_REQUEST);
        assert!(json_body(bad_code).await["message"].is_string());

        let missing_field = send(
            &app,
            Method::POST,
            "/session/join",
            Some(json!({"playerName": "Ava"})),
        )
        .await;
        assert_eq!(missing_field.status(), StatusCode::BAD_REQUEST);

        let unknown = send(
            &app,
            Method::GET,
            "/session/00000000-0000-0000-0000-000000000000",
            None,
        )
        .await;
        assert_eq!(unknown.status(), StatusCode::NOT_FOUND);

        let wrong_method = send(&app, Method::GET, "/session/create", None).await;
        assert_eq!(wrong_method.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn sign_in_sets_and_clears_the_cookie() {
        let (state, notifier) = memory_state().await;
        let app = router(state);

        let requested = send(
            &app,
            Method::POST,
            "/auth/magic-link",
            Some(json!({"email": "ava@example.com"})),
        )
        .await;
        assert_eq!(requested.status(), StatusCode::ACCEPTED);
        let token = notifier.last().unwrap().token;

        let verified = send(&app, Method::POST, "/auth/verify", Some(json!({"token": token}))).await;
        assert_eq!(verified.status(), StatusCode::OK);
        let cookie = verified
            .headers()
            .get(header::SET_COOKIE)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        assert!(cookie.starts_with("ne_session="));
        let session_cookie = cookie.split(';').next().unwrap().to_string();

        let me = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/auth/me")
                    .header(header::COOKIE, session_cookie)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(me.status(), StatusCode::OK);
        assert_eq!(json_body(me).await["isGuest"], false);

        let anonymous = send(&app, Method::GET, "/auth/me", None).await;
        assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED);

        let logout = send(&app, Method::POST, "/auth/logout", None).await;
        assert_eq!(logout.status(), StatusCode::NO_CONTENT);
        assert!(
            logout.headers()[header::SET_COOKIE]
                .to_str()
                .unwrap()
                .contains("Max-Age=0")
        );
    }

    #[tokio::test]
    async fn degraded_mode_answers_service_unavailable() {
        let (state, _) = memory_state().await;
        state.clear_session_store().await;
        let app = router(state);

        let health = send(&app, Method::GET, "/healthcheck", None).await;
        assert_eq!(health.status(), StatusCode::OK);
        assert_eq!(json_body(health).await["status"], "degraded");

        let leaderboard = send(&app, Method::GET, "/leaderboard", None).await;
        assert_eq!(leaderboard.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
