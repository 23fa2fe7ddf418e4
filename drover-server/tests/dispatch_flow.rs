//! End-to-end dispatch scenarios against the in-memory backends.

mod support;

use std::sync::Arc;
use std::time::Duration;

use drover_model::api::{LeaseRequest, RegisterRequest};
use serde_json::Value;
use support::spawn_app_with;
use tokio::time::{sleep, timeout};

/// Past the 2 s test lease timeout, with margin.
const LEASE_EXPIRY_WAIT: Duration = Duration::from_millis(2300);

#[tokio::test]
async fn happy_path_submit_lease_result() {
    let app = support::spawn_app().await;

    let job_id = app.submit("cat.jpg", vec![0xFF; 200], "203.0.113.7").await;
    let worker_id = app.register_worker(1).await;

    let lease = app.lease(&worker_id).await.expect("worker should get the job");
    assert_eq!(lease["job_id"], job_id.as_str());
    assert_eq!(lease["filename"], "cat.jpg");
    assert!(
        lease["input_url"].as_str().is_some_and(|url| !url.is_empty()),
        "lease must carry a signed input url"
    );
    assert!(lease["deadline_ts"].as_i64().unwrap() > 0);

    let response = app
        .post_result(&worker_id, &job_id, vec![0x01, 0x02, 0x03, 0x04, 0x05])
        .await;
    response.assert_status_success();

    let detail = app.job_detail(&job_id).await;
    let job = &detail["job"];
    assert_eq!(job["status"], "completed");
    assert_eq!(
        job["output_path"],
        format!("jobs/{job_id}/output/output.jpg")
    );
    assert!(job["processing_ms"].as_i64().unwrap() >= 0);
    assert!(app.blob.contains(&format!("jobs/{job_id}/output/output.jpg")));

    let events = detail["events"].as_array().unwrap();
    let kinds: Vec<&str> = events
        .iter()
        .map(|event| event["type"].as_str().unwrap())
        .collect();
    assert!(kinds.contains(&"info"), "missing queued info event");
    assert!(kinds.contains(&"state"), "missing processing state event");
    assert_eq!(*kinds.last().unwrap(), "completed");

    let processing = events
        .iter()
        .find(|event| event["type"] == "state")
        .unwrap();
    assert_eq!(processing["progress"], 40);
    let completed = events
        .iter()
        .find(|event| event["type"] == "completed")
        .unwrap();
    assert_eq!(completed["progress"], 100);
}

#[tokio::test]
async fn dead_worker_lease_expires_and_requeues() {
    let app = support::spawn_app().await;

    let job_id = app.submit("cat.jpg", vec![0xAB; 64], "203.0.113.7").await;
    let dead_worker = app.register_worker(1).await;
    app.lease(&dead_worker).await.expect("first lease");

    sleep(LEASE_EXPIRY_WAIT).await;
    let recovered = app.dispatcher.sweep_expired_leases().await.unwrap();
    assert_eq!(recovered, 1);

    let detail = app.job_detail(&job_id).await;
    assert_eq!(detail["job"]["status"], "queued");
    assert_eq!(detail["job"]["retries"], 1);
    let messages: Vec<&str> = detail["events"]
        .as_array()
        .unwrap()
        .iter()
        .map(|event| event["message"].as_str().unwrap())
        .collect();
    assert!(messages.contains(&"lease expired; requeued"));

    // A healthy worker picks the job back up and finishes it.
    let worker = app.register_worker(1).await;
    let lease = app.lease(&worker).await.expect("requeued job leases again");
    assert_eq!(lease["job_id"], job_id.as_str());
    app.post_result(&worker, &job_id, vec![1, 2, 3])
        .await
        .assert_status_success();
    assert_eq!(app.job_status(&job_id).await, "completed");
}

#[tokio::test]
async fn retry_budget_exhausts_to_failed() {
    let app = support::spawn_app().await;
    let job_id = app.submit("cat.jpg", vec![0xCD; 64], "203.0.113.7").await;

    for _ in 0..3 {
        let worker = app.register_worker(1).await;
        app.lease(&worker).await.expect("job should lease");
        sleep(LEASE_EXPIRY_WAIT).await;
        app.dispatcher.sweep_expired_leases().await.unwrap();
    }

    let detail = app.job_detail(&job_id).await;
    assert_eq!(detail["job"]["status"], "failed");
    assert_eq!(detail["job"]["error"], "lease expired");
    assert_eq!(detail["job"]["retries"], 3);

    // Terminal is absorbing: nothing left to lease.
    let worker = app.register_worker(1).await;
    assert!(app.lease(&worker).await.is_none());
}

#[tokio::test]
async fn priority_ip_jumps_the_queue() {
    let app = spawn_app_with(|config| {
        config.dispatch.priority_ips = ["1.2.3.4".to_string()].into_iter().collect();
    })
    .await;

    let normal = app.submit("a.jpg", vec![1; 16], "9.9.9.9").await;
    let priority = app.submit("b.jpg", vec![2; 16], "1.2.3.4").await;

    let worker = app.register_worker(2).await;
    let first = app.lease(&worker).await.expect("first grant");
    assert_eq!(first["job_id"], priority.as_str());

    let second = app
        .server
        .post("/api/worker/lease")
        .json(&serde_json::json!({ "worker_id": worker, "wants": 1, "active": 1 }))
        .await
        .json::<Value>();
    assert_eq!(second["lease"]["job_id"], normal.as_str());
}

#[tokio::test]
async fn duplicate_result_is_rejected_without_mutation() {
    let app = support::spawn_app().await;

    let job_id = app.submit("cat.jpg", vec![0xFF; 32], "203.0.113.7").await;
    let worker = app.register_worker(1).await;
    app.lease(&worker).await.expect("lease");
    app.post_result(&worker, &job_id, vec![1, 2, 3, 4, 5])
        .await
        .assert_status_success();

    let before = app.job_detail(&job_id).await;

    let retry = app.post_result(&worker, &job_id, vec![9, 9, 9]).await;
    retry.assert_status(axum::http::StatusCode::BAD_REQUEST);
    let body: Value = retry.json();
    assert_eq!(body["error"]["message"], "invalid lease or worker_id");

    let after = app.job_detail(&job_id).await;
    assert_eq!(before["job"], after["job"], "rejected report must not mutate");
}

#[tokio::test]
async fn sse_stream_replays_history_then_live_events_once() {
    let app = support::spawn_app().await;
    let job_id = app.submit("cat.jpg", vec![0xEE; 48], "203.0.113.7").await;

    // Drive the worker side concurrently while the SSE body streams.
    let dispatcher = Arc::clone(&app.dispatcher);
    let raw_id = job_id.clone();
    let driver = tokio::spawn(async move {
        sleep(Duration::from_millis(150)).await;
        let (worker_id, _) = dispatcher
            .register_worker(
                RegisterRequest {
                    capacity: Some(1),
                    ..Default::default()
                },
                None,
            )
            .await
            .unwrap();
        let request = LeaseRequest {
            worker_id: worker_id.to_string(),
            wants: 1,
            active: 0,
            gpu: None,
        };
        let response = dispatcher.lease(&request, None).await.unwrap();
        let grant = response.lease.expect("driver should lease the job");
        assert_eq!(grant.job_id.to_string(), raw_id);
        dispatcher
            .submit_result(worker_id.as_str(), &raw_id, &[5, 4, 3], None)
            .await
            .unwrap();
    });

    let response = timeout(Duration::from_secs(10), async {
        app.server
            .get(&format!("/api/jobs/{job_id}/events"))
            .await
    })
    .await
    .expect("stream should close after the terminal event");
    response.assert_status_success();
    driver.await.unwrap();

    let body = response.text();
    assert!(body.contains("retry:"), "missing retry preamble");

    let frames: Vec<Value> = body
        .lines()
        .filter_map(|line| line.strip_prefix("data: "))
        .map(|payload| serde_json::from_str(payload).expect("frame is json"))
        .collect();
    let kinds: Vec<&str> = frames
        .iter()
        .map(|frame| frame["type"].as_str().unwrap())
        .collect();

    let queued_pos = kinds.iter().position(|kind| *kind == "info").unwrap();
    let processing_pos = kinds.iter().position(|kind| *kind == "state").unwrap();
    let completed_pos = kinds.iter().position(|kind| *kind == "completed").unwrap();
    assert!(queued_pos < processing_pos && processing_pos < completed_pos);

    // No event is delivered twice.
    assert_eq!(kinds.iter().filter(|kind| **kind == "info").count(), 1);
    assert_eq!(kinds.iter().filter(|kind| **kind == "state").count(), 1);
    assert_eq!(kinds.iter().filter(|kind| **kind == "completed").count(), 1);
    assert_eq!(completed_pos, kinds.len() - 1, "stream ends at terminal");
}

#[tokio::test]
async fn concurrent_lease_calls_never_share_a_job() {
    let app = support::spawn_app().await;
    let _job = app.submit("one.jpg", vec![7; 16], "203.0.113.7").await;

    let worker_a = app.register_worker(1).await;
    let worker_b = app.register_worker(1).await;

    let request_a = LeaseRequest {
        worker_id: worker_a,
        wants: 1,
        active: 0,
        gpu: None,
    };
    let request_b = LeaseRequest {
        worker_id: worker_b,
        wants: 1,
        active: 0,
        gpu: None,
    };
    let (a, b) = tokio::join!(
        app.dispatcher.lease(&request_a, None),
        app.dispatcher.lease(&request_b, None),
    );
    let grants = [a.unwrap().lease, b.unwrap().lease];
    assert_eq!(
        grants.iter().filter(|grant| grant.is_some()).count(),
        1,
        "exactly one worker may win the single job"
    );
}

#[tokio::test]
async fn worker_error_requeues_then_fails_at_budget() {
    let app = support::spawn_app().await;
    let job_id = app.submit("cat.jpg", vec![3; 16], "203.0.113.7").await;

    for round in 0..3 {
        let worker = app.register_worker(1).await;
        app.lease(&worker).await.expect("lease");
        let response = app
            .server
            .post("/api/worker/error")
            .json(&serde_json::json!({
                "worker_id": worker,
                "job_id": job_id,
                "error": "CUDA out of memory",
            }))
            .await;
        response.assert_status_success();

        let status = app.job_status(&job_id).await;
        if round < 2 {
            assert_eq!(status, "queued", "round {round} should requeue");
        } else {
            assert_eq!(status, "failed", "retry budget must be spent");
        }
    }

    let detail = app.job_detail(&job_id).await;
    assert_eq!(detail["job"]["error"], "CUDA out of memory");
    assert_eq!(detail["job"]["retries"], 3);
}

#[tokio::test]
async fn cancel_pulls_job_out_of_the_queue() {
    let app = support::spawn_app().await;
    let first = app.submit("a.jpg", vec![1; 8], "203.0.113.7").await;
    let second = app.submit("b.jpg", vec![2; 8], "203.0.113.7").await;

    app.admin_post(&format!("/api/jobs/{first}/cancel"))
        .await
        .assert_status_success();
    assert_eq!(app.job_status(&first).await, "canceled");

    let worker = app.register_worker(1).await;
    let lease = app.lease(&worker).await.expect("second job still leases");
    assert_eq!(lease["job_id"], second.as_str());
}

#[tokio::test]
async fn submissions_never_deduplicate() {
    let app = support::spawn_app().await;
    let bytes = vec![0x42; 64];
    let a = app.submit("same.jpg", bytes.clone(), "203.0.113.7").await;
    let b = app.submit("same.jpg", bytes, "203.0.113.7").await;
    assert_ne!(a, b);
}
