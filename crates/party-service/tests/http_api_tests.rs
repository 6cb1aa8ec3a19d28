//! REST and WebSocket surface against a served router.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use anyhow::Result;
use futures::{SinkExt, StreamExt};
use party_test_utils::{token_for, TestPartyServer, TEST_VIDEO_REF};
use serde_json::{json, Value};
use std::time::Duration;
use tokio_tungstenite::tungstenite::Message;

struct Client {
    http: reqwest::Client,
    base: String,
}

impl Client {
    fn new(server: &TestPartyServer) -> Self {
        Self {
            http: reqwest::Client::new(),
            base: server.url(),
        }
    }

    fn request(&self, method: reqwest::Method, path: &str, user: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, format!("{}{}", self.base, path))
            .bearer_auth(token_for(user))
    }

    async fn create_room(&self, host: &str, max: u32) -> Result<Value> {
        let response = self
            .request(reqwest::Method::POST, "/v1/rooms", host)
            .json(&json!({
                "name": "Movie night",
                "videoRef": TEST_VIDEO_REF,
                "maxParticipants": max,
            }))
            .send()
            .await?;
        assert_eq!(response.status(), 201);
        Ok(response.json().await?)
    }
}

#[tokio::test]
async fn test_health_and_readiness() -> Result<()> {
    let server = TestPartyServer::spawn().await?;
    let client = reqwest::Client::new();

    let response = client.get(format!("{}/health", server.url())).send().await?;
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await?, "OK");

    let response = client.get(format!("{}/ready", server.url())).send().await?;
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await?;
    assert_eq!(body["status"], "ready");
    assert_eq!(body["store"], "healthy");

    let response = client.get(format!("{}/metrics", server.url())).send().await?;
    assert_eq!(response.status(), 200);
    Ok(())
}

#[tokio::test]
async fn test_rest_room_lifecycle() -> Result<()> {
    let server = TestPartyServer::spawn().await?;
    let client = Client::new(&server);

    let room = client.create_room("Hana", 4).await?;
    assert_eq!(room["status"], "ACTIVE");
    assert_eq!(room["currentParticipants"], 1);
    assert_eq!(room["videoTitle"], "Big Buck Bunny");
    let room_id = room["id"].as_str().unwrap().to_string();
    let room_path = format!("/v1/rooms/{room_id}");

    let response = client
        .request(reqwest::Method::POST, &format!("{room_path}/join"), "Alex")
        .send()
        .await?;
    assert_eq!(response.status(), 200);
    let view: Value = response.json().await?;
    assert_eq!(view["currentParticipants"], 2);

    let response = client
        .request(reqwest::Method::PUT, &format!("{room_path}/sync"), "Alex")
        .json(&json!({ "currentTime": 12.5, "isPaused": true }))
        .send()
        .await?;
    assert_eq!(response.status(), 403);
    let body: Value = response.json().await?;
    assert_eq!(body["error"]["code"], "FORBIDDEN");

    let response = client
        .request(reqwest::Method::PUT, &format!("{room_path}/sync"), "Hana")
        .json(&json!({ "currentTime": 12.5, "isPaused": true }))
        .send()
        .await?;
    assert_eq!(response.status(), 204);

    let response = client
        .request(reqwest::Method::GET, &room_path, "Alex")
        .send()
        .await?;
    let view: Value = response.json().await?;
    assert_eq!(view["status"], "PAUSED");
    assert_eq!(view["currentTime"], 12.5);
    assert_eq!(view["isPaused"], true);

    let response = client
        .request(reqwest::Method::GET, "/v1/rooms?hasSpace=true&limit=5", "Blair")
        .send()
        .await?;
    assert_eq!(response.status(), 200);
    let listing: Value = response.json().await?;
    assert_eq!(listing["total"], 1);
    assert_eq!(listing["limit"], 5);

    let response = client
        .request(reqwest::Method::GET, &format!("{room_path}/messages?limit=10"), "Alex")
        .send()
        .await?;
    assert_eq!(response.status(), 200);
    let messages: Value = response.json().await?;
    assert_eq!(messages["messages"].as_array().map(Vec::len), Some(3));

    let response = client
        .request(reqwest::Method::POST, &format!("{room_path}/leave"), "Hana")
        .send()
        .await?;
    assert_eq!(response.status(), 204);

    let response = client
        .request(reqwest::Method::DELETE, &room_path, "Alex")
        .send()
        .await?;
    assert_eq!(response.status(), 204);

    let response = client
        .request(reqwest::Method::GET, &room_path, "Alex")
        .send()
        .await?;
    assert_eq!(response.status(), 404);
    Ok(())
}

#[tokio::test]
async fn test_requests_without_valid_token_are_unauthorized() -> Result<()> {
    let server = TestPartyServer::spawn().await?;
    let http = reqwest::Client::new();

    let response = http.get(format!("{}/v1/rooms", server.url())).send().await?;
    assert_eq!(response.status(), 401);
    assert!(response.headers().contains_key("www-authenticate"));

    let response = http
        .get(format!("{}/v1/rooms", server.url()))
        .bearer_auth("tok-nobody")
        .send()
        .await?;
    assert_eq!(response.status(), 401);
    let body: Value = response.json().await?;
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");
    Ok(())
}

#[tokio::test]
async fn test_malformed_input_is_bad_request() -> Result<()> {
    let server = TestPartyServer::spawn().await?;
    let client = Client::new(&server);

    let response = client
        .request(reqwest::Method::POST, "/v1/rooms", "Hana")
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await?;
    assert_eq!(response.status(), 400);

    let response = client
        .request(reqwest::Method::GET, "/v1/rooms/not-a-uuid", "Hana")
        .send()
        .await?;
    assert_eq!(response.status(), 400);
    let body: Value = response.json().await?;
    assert_eq!(body["error"]["code"], "BAD_REQUEST");

    let response = client
        .request(reqwest::Method::GET, "/v1/rooms?page=0", "Hana")
        .send()
        .await?;
    assert_eq!(response.status(), 400);

    let response = client
        .request(reqwest::Method::GET, "/v1/rooms?hasSpace=maybe", "Hana")
        .send()
        .await?;
    assert_eq!(response.status(), 400);

    let room = client.create_room("Hana", 4).await?;
    let room_id = room["id"].as_str().unwrap();
    let response = client
        .request(reqwest::Method::PUT, &format!("/v1/rooms/{room_id}/sync"), "Hana")
        .json(&json!({ "currentTime": -3.0, "isPaused": false }))
        .send()
        .await?;
    assert_eq!(response.status(), 400);
    Ok(())
}

#[tokio::test]
async fn test_full_room_is_conflict() -> Result<()> {
    let server = TestPartyServer::spawn().await?;
    let client = Client::new(&server);

    let room = client.create_room("Hana", 2).await?;
    let join = format!("/v1/rooms/{}/join", room["id"].as_str().unwrap());

    let response = client.request(reqwest::Method::POST, &join, "Alex").send().await?;
    assert_eq!(response.status(), 200);
    let response = client.request(reqwest::Method::POST, &join, "Blair").send().await?;
    assert_eq!(response.status(), 409);
    let body: Value = response.json().await?;
    assert_eq!(body["error"]["code"], "CONFLICT");
    Ok(())
}

async fn next_json<S>(socket: &mut S) -> Value
where
    S: futures::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        let message = tokio::time::timeout(Duration::from_secs(3), socket.next())
            .await
            .expect("timed out waiting for socket frame")
            .expect("socket closed")
            .expect("socket error");
        if let Message::Text(text) = message {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

#[tokio::test]
async fn test_socket_pushes_events_and_accepts_sync() -> Result<()> {
    let server = TestPartyServer::spawn().await?;
    let client = Client::new(&server);

    let room = client.create_room("Hana", 4).await?;
    let room_id = room["id"].as_str().unwrap().to_string();
    client
        .request(reqwest::Method::POST, &format!("/v1/rooms/{room_id}/join"), "Alex")
        .send()
        .await?;

    let socket_url = |user: &str| {
        format!("{}/v1/rooms/{room_id}/ws?token={}", server.ws_url(), token_for(user))
    };
    let (mut host, _) = tokio_tungstenite::connect_async(socket_url("Hana")).await?;
    let (mut guest, _) = tokio_tungstenite::connect_async(socket_url("Alex")).await?;

    assert_eq!(next_json(&mut host).await["event"], "room.snapshot");
    assert_eq!(next_json(&mut guest).await["event"], "room.snapshot");

    // The guest may not steer playback.
    guest
        .send(Message::Text(
            json!({ "type": "sync", "currentTime": 5.0, "isPaused": false }).to_string().into(),
        ))
        .await?;
    let error = next_json(&mut guest).await;
    assert_eq!(error["type"], "error");
    assert_eq!(error["code"], "FORBIDDEN");

    host.send(Message::Text(
        json!({ "type": "sync", "currentTime": 42.0, "isPaused": true, "seq": 1 })
            .to_string()
            .into(),
    ))
    .await?;
    let sync = next_json(&mut guest).await;
    assert_eq!(sync["event"], "room.sync");
    assert_eq!(sync["data"]["currentTime"], 42.0);
    assert_eq!(sync["data"]["isPaused"], true);

    host.send(Message::Text(json!({ "type": "leave" }).to_string().into()))
        .await?;
    assert_eq!(next_json(&mut guest).await["event"], "room.left");
    let host_changed = next_json(&mut guest).await;
    assert_eq!(host_changed["event"], "room.hostChanged");
    assert_eq!(
        host_changed["data"]["hostId"],
        json!(server.party().user("Alex").user_id)
    );

    guest.close(None).await.ok();
    Ok(())
}

#[tokio::test]
async fn test_socket_rejects_outsiders_before_upgrade() -> Result<()> {
    let server = TestPartyServer::spawn().await?;
    let client = Client::new(&server);
    let room = client.create_room("Hana", 4).await?;
    let room_id = room["id"].as_str().unwrap();

    let url = format!("{}/v1/rooms/{room_id}/ws?token={}", server.ws_url(), token_for("Blair"));
    assert!(tokio_tungstenite::connect_async(url).await.is_err());

    let url = format!("{}/v1/rooms/{room_id}/ws", server.ws_url());
    assert!(tokio_tungstenite::connect_async(url).await.is_err());
    Ok(())
}
