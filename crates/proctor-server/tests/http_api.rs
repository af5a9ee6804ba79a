//! HTTP surface against a running server.

mod common;

use serde_json::{json, Value};

use proctor_core::SessionStatus;

use common::{recv_event, send, session_of, TestServer};

#[tokio::test]
async fn health_reports_online_sessions() {
    let server = TestServer::boot(3).await;
    let student = server.student("Ada Lovelace", "S-100").await;
    let _ws = server.connect(&student).await;

    let body: Value = reqwest::get(format!("{}/health", server.base_url))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["onlineSessions"], 1);
    assert_eq!(body["connections"], 1);

    server.shutdown().await;
}

#[tokio::test]
async fn monitor_lists_live_sessions_with_presence() {
    let server = TestServer::boot(3).await;
    let online = server.student("Ada Lovelace", "S-100").await;
    let offline = server.student("Grace Hopper", "S-200").await;
    let sup = server.supervisor();
    let mut monitor = server.connect(&sup).await;

    let mut ws = server.connect(&online).await;
    send(&mut ws, json!({"event": "heartbeat", "data": {"timeRemaining": 2000}})).await;
    let _ = recv_event(&mut monitor, "student:heartbeat").await;
    let online_sid = session_of(&online);
    server
        .wait_for(|s| s.handle.registry().since_heartbeat(&online_sid).is_some())
        .await;

    let client = reqwest::Client::new();
    let resp = client
        .get(format!("{}/api/monitor/live", server.base_url))
        .bearer_auth(server.token(&sup))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let list: Vec<Value> = resp.json().await.unwrap();
    assert_eq!(list.len(), 2);

    let find = |p: &proctor_core::Principal| {
        let id = session_of(p);
        list.iter()
            .find(|s| s["id"] == id.as_str())
            .cloned()
            .unwrap()
    };
    let a = find(&online);
    assert_eq!(a["isOnline"], true);
    assert_eq!(a["timeRemainingSeconds"], 2000);
    assert_eq!(a["examCode"], "CS101");
    assert!(a.get("secondsSinceHeartbeat").is_some());
    let b = find(&offline);
    assert_eq!(b["isOnline"], false);

    let resp = client
        .get(format!("{}/api/monitor/live", server.base_url))
        .bearer_auth(server.token(&online))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);

    server.shutdown().await;
}

#[tokio::test]
async fn external_submit_notifies_supervisors_and_closes_session() {
    let server = TestServer::boot(3).await;
    let student = server.student("Ada Lovelace", "S-100").await;
    let sid = session_of(&student);
    let sup = server.supervisor();
    let mut monitor = server.connect(&sup).await;

    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{}/api/sessions/{}/submit", server.base_url, sid))
        .bearer_auth(server.token(&student))
        .json(&json!({"submissionType": "AUTO_TIME"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let status = recv_event(&mut monitor, "student:status").await;
    assert_eq!(status["data"]["status"], "SUBMITTED");
    assert_eq!(status["data"]["reason"], "AUTO_TIME");
    assert_eq!(
        server.engine().session(&sid).await.unwrap().status,
        SessionStatus::Submitted
    );

    let resp = client
        .get(format!("{}/api/sessions/{}/violations", server.base_url, sid))
        .bearer_auth(server.token(&sup))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let violations: Vec<Value> = resp.json().await.unwrap();
    assert!(violations.is_empty());

    server.shutdown().await;
}
