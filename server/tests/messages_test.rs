//! Integration tests for the message REST endpoints: contacts, chat list,
//! paginated history, send, and mark-read.

use chatline_server::config::Config;
use chatline_server::history::{HistoryStore, SharedHistory, SqliteHistory, UserProfile};
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Helper: start the server on a random port. Returns (base_url, jwt_secret).
async fn start_test_server() -> (String, Vec<u8>) {
    let tmp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let data_dir = tmp_dir.path().to_str().unwrap().to_string();

    let db = chatline_server::db::init_db(&data_dir).expect("Failed to init DB");
    let store = SqliteHistory::new(db);
    for (id, name) in [("alice", "Alice"), ("bob", "Bob"), ("carol", "Carol")] {
        store
            .upsert_user(&UserProfile {
                id: id.to_string(),
                full_name: name.to_string(),
                email: format!("{}@example.com", id),
                profile_pic: None,
                created_at: chrono::Utc::now(),
            })
            .expect("Failed to seed user");
    }
    let history: SharedHistory = Arc::new(store);

    let jwt_secret = chatline_server::auth::jwt::load_or_generate_jwt_secret(&data_dir)
        .expect("Failed to generate JWT secret");
    let state = chatline_server::state::AppState::new(history, jwt_secret.clone(), &Config::default());
    let app = chatline_server::routes::build_router(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
        let _keep = tmp_dir;
    });

    (format!("http://{}", addr), jwt_secret)
}

fn token(secret: &[u8], user_id: &str) -> String {
    chatline_server::auth::jwt::issue_access_token(secret, user_id).unwrap()
}

async fn send(client: &reqwest::Client, base_url: &str, auth: &str, to: &str, text: &str) -> Value {
    let resp = client
        .post(format!("{}/api/messages/send/{}", base_url, to))
        .bearer_auth(auth)
        .json(&json!({ "text": text }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    resp.json().await.unwrap()
}

#[tokio::test]
async fn test_health_check() {
    let (base_url, _) = start_test_server().await;

    let resp = reqwest::get(format!("{}/health", base_url)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.text().await.unwrap(), "ok");
}

#[tokio::test]
async fn test_endpoints_require_bearer_token() {
    let (base_url, _) = start_test_server().await;
    let client = reqwest::Client::new();

    for path in ["/api/messages/contacts", "/api/messages/chats", "/api/messages/bob", "/api/presence"] {
        let resp = client.get(format!("{}{}", base_url, path)).send().await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED, "{}", path);
    }

    let resp = client
        .get(format!("{}/api/messages/contacts", base_url))
        .bearer_auth("not-a-jwt")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_contacts_exclude_caller() {
    let (base_url, secret) = start_test_server().await;
    let client = reqwest::Client::new();

    let contacts: Vec<Value> = client
        .get(format!("{}/api/messages/contacts", base_url))
        .bearer_auth(token(&secret, "alice"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let ids: Vec<&str> = contacts.iter().map(|c| c["id"].as_str().unwrap()).collect();
    assert_eq!(ids, vec!["bob", "carol"]);
    assert_eq!(contacts[0]["full_name"], "Bob");
}

#[tokio::test]
async fn test_send_then_read_updates_chat_list() {
    let (base_url, secret) = start_test_server().await;
    let client = reqwest::Client::new();
    let alice = token(&secret, "alice");
    let bob = token(&secret, "bob");

    let sent = send(&client, &base_url, &alice, "bob", "hello bob").await;
    assert_eq!(sent["status"], "sent");
    assert_eq!(sent["sender_id"], "alice");
    send(&client, &base_url, &alice, "bob", "still there?").await;

    let chats: Vec<Value> = client
        .get(format!("{}/api/messages/chats", base_url))
        .bearer_auth(&bob)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(chats.len(), 1);
    assert_eq!(chats[0]["id"], "alice");
    assert_eq!(chats[0]["unread_count"], 2);

    let read: Value = client
        .put(format!("{}/api/messages/read/alice", base_url))
        .bearer_auth(&bob)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(read["message_ids"].as_array().unwrap().len(), 2);

    // Second read changes nothing
    let again: Value = client
        .put(format!("{}/api/messages/read/alice", base_url))
        .bearer_auth(&bob)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(again["message_ids"], json!([]));

    let chats: Vec<Value> = client
        .get(format!("{}/api/messages/chats", base_url))
        .bearer_auth(&bob)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(chats[0]["unread_count"], 0);

    // Alice sees her messages as read
    let page: Value = client
        .get(format!("{}/api/messages/bob", base_url))
        .bearer_auth(&alice)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(page["messages"]
        .as_array()
        .unwrap()
        .iter()
        .all(|m| m["status"] == "read"));
}

#[tokio::test]
async fn test_read_with_explicit_ids_narrows() {
    let (base_url, secret) = start_test_server().await;
    let client = reqwest::Client::new();
    let alice = token(&secret, "alice");
    let bob = token(&secret, "bob");

    let first = send(&client, &base_url, &alice, "bob", "first").await;
    send(&client, &base_url, &alice, "bob", "second").await;

    let read: Value = client
        .put(format!("{}/api/messages/read/alice", base_url))
        .bearer_auth(&bob)
        .json(&json!({ "message_ids": [first["id"]] }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(read["message_ids"], json!([first["id"]]));

    let resp = client
        .put(format!("{}/api/messages/read/alice", base_url))
        .bearer_auth(&bob)
        .body("{broken")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_history_pagination_with_cursor() {
    let (base_url, secret) = start_test_server().await;
    let client = reqwest::Client::new();
    let alice = token(&secret, "alice");
    let bob = token(&secret, "bob");

    for i in 0..5 {
        let (from, to) = if i % 2 == 0 { (&alice, "bob") } else { (&bob, "alice") };
        send(&client, &base_url, from, to, &format!("msg {}", i)).await;
    }

    let page: Value = client
        .get(format!("{}/api/messages/bob?limit=2", base_url))
        .bearer_auth(&alice)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let texts: Vec<&str> = page["messages"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["text"].as_str().unwrap())
        .collect();
    assert_eq!(texts, vec!["msg 3", "msg 4"]);
    assert_eq!(page["has_more"], true);

    let cursor = page["messages"][0]["id"].as_str().unwrap().to_string();
    let older: Value = client
        .get(format!("{}/api/messages/bob?limit=10&before={}", base_url, cursor))
        .bearer_auth(&alice)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let texts: Vec<&str> = older["messages"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["text"].as_str().unwrap())
        .collect();
    assert_eq!(texts, vec!["msg 0", "msg 1", "msg 2"]);
    assert_eq!(older["has_more"], false);
}

#[tokio::test]
async fn test_send_validation_errors() {
    let (base_url, secret) = start_test_server().await;
    let client = reqwest::Client::new();
    let alice = token(&secret, "alice");

    let post = |to: &str, body: Value| {
        client
            .post(format!("{}/api/messages/send/{}", base_url, to))
            .bearer_auth(&alice)
            .json(&body)
            .send()
    };

    let resp = post("bob", json!({ "text": "   " })).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = post("alice", json!({ "text": "note to self" })).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = post("nobody", json!({ "text": "hi" })).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let resp = post("bob", json!({ "text": "x".repeat(4001) })).await.unwrap();
    assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);

    let resp = post("bob", json!({ "attachment": "data:image/png;base64,AAAA" })).await.unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
}

#[tokio::test]
async fn test_history_with_unknown_user_is_404() {
    let (base_url, secret) = start_test_server().await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("{}/api/messages/nobody", base_url))
        .bearer_auth(token(&secret, "alice"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}
