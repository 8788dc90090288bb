//! Event loop against an in-process fake control plane.

use anyhow::anyhow;
use async_trait::async_trait;
use edge_control::transport::{
    Headers, APP_AUTH_TOKEN_HEADER, COMPONENT_ID_HEADER, REQUESTED_BY_HEADER,
};
use edge_control::{collect_statuses, AgentInfo, EventLoop, Response, Transport};
use edge_manager::{ManagerConfig, PipelineManager};
use edge_protocol::defaults::EVENTS_PATH;
use edge_protocol::{
    BuildInfo, EdgePaths, EventType, PipelineConfiguration, PipelineInfo, PipelineStatus,
    ServerEvent, StageConfiguration,
};
use edge_runtime::stages::BASIC_LIBRARY;
use edge_runtime::StageRegistry;
use serde_json::{json, Value as JsonValue};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

#[derive(Debug, Clone)]
struct Post {
    path: String,
    headers: Headers,
    body: JsonValue,
}

impl Post {
    fn events_of(&self, event_type: EventType) -> Vec<JsonValue> {
        self.body
            .as_array()
            .unwrap()
            .iter()
            .filter(|event| event["eventTypeId"] == event_type.id())
            .cloned()
            .collect()
    }

    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value.as_str())
    }
}

/// Replays scripted responses and records every request. An exhausted
/// script answers with an empty event list.
#[derive(Default)]
struct FakeControlPlane {
    responses: Mutex<VecDeque<Result<Response, String>>>,
    posts: Mutex<Vec<Post>>,
}

impl FakeControlPlane {
    fn script(responses: Vec<Result<Response, String>>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            posts: Mutex::default(),
        })
    }

    fn posts(&self) -> Vec<Post> {
        self.posts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for FakeControlPlane {
    async fn post(&self, path: &str, headers: &Headers, body: &JsonValue) -> anyhow::Result<Response> {
        self.posts.lock().unwrap().push(Post {
            path: path.to_string(),
            headers: headers.clone(),
            body: body.clone(),
        });
        match self.responses.lock().unwrap().pop_front() {
            Some(Ok(response)) => Ok(response),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Ok(Response::ok("[]")),
        }
    }
}

struct Agent {
    _temp: TempDir,
    manager: Arc<PipelineManager>,
}

impl Agent {
    fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let paths = EdgePaths::new(temp.path());
        paths.create_dirs().unwrap();
        let manager = PipelineManager::new(
            paths,
            Arc::new(StageRegistry::with_builtin_stages()),
            ManagerConfig {
                agent_id: "agent-1".to_string(),
                metrics_interval: Duration::from_millis(50),
            },
        );
        let agent = Self {
            _temp: temp,
            manager: Arc::new(manager),
        };
        agent.store("p1");
        agent
    }

    fn store(&self, id: &str) {
        let mut config = self.manager.create_pipeline(id, "Counter", "", "admin").unwrap();
        config.stages = stages();
        self.manager.save_pipeline("admin", config).unwrap();
    }

    fn event_loop(&self, transport: Arc<FakeControlPlane>, status_interval: Duration) -> EventLoop {
        EventLoop::new(
            transport,
            self.manager.clone(),
            agent_info(),
            "app-token",
            Duration::from_millis(10),
            status_interval,
        )
    }
}

impl Drop for Agent {
    fn drop(&mut self) {
        self.manager.shutdown();
    }
}

fn stages() -> Vec<StageConfiguration> {
    vec![
        StageConfiguration::new("gen", BASIC_LIBRARY, "dev_data_generator")
            .with_config("dataGenConfigs", json!([{"field": "n", "type": "LONG"}]))
            .with_config("batchSize", 1)
            .with_config("delay", 10)
            .with_outputs(["out"]),
        StageConfiguration::new("trash", BASIC_LIBRARY, "trash").with_inputs(["out"]),
    ]
}

fn agent_info() -> AgentInfo {
    AgentInfo {
        agent_id: "agent-1".to_string(),
        component_id: "agent-1".to_string(),
        http_url: "http://localhost:18633".to_string(),
        build: BuildInfo {
            version: "1.0.0".to_string(),
            built_date: "2026-01-01".to_string(),
            built_by: "ci".to_string(),
            built_repo_sha: "abc123".to_string(),
        },
        labels: vec!["edge".to_string()],
    }
}

fn server_event(id: &str, event_type: EventType, payload: JsonValue, requires_ack: bool) -> ServerEvent {
    ServerEvent {
        event_id: id.to_string(),
        from: "jobrunner-app".to_string(),
        requires_ack,
        is_ack_event: false,
        event_type_id: event_type.id(),
        payload: payload.to_string(),
        received_time: 0,
        org_id: "org".to_string(),
    }
}

fn respond(events: &[ServerEvent]) -> Result<Response, String> {
    Ok(Response::ok(serde_json::to_string(events).unwrap()))
}

fn ack_payload(ack: &JsonValue) -> JsonValue {
    serde_json::from_str(ack["payload"].as_str().unwrap()).unwrap()
}

#[tokio::test]
async fn test_start_command_is_acked_on_next_post() {
    let agent = Agent::new();
    let start = server_event("ev-1", EventType::StartPipeline, json!({"name": "p1", "user": "cp"}), true);
    let transport = FakeControlPlane::script(vec![respond(&[start])]);
    let mut event_loop = agent.event_loop(transport.clone(), Duration::from_secs(60));

    event_loop.tick().await;
    assert_eq!(event_loop.pending_acks().len(), 1);
    assert_eq!(
        agent.manager.runner("p1").unwrap().status().status,
        PipelineStatus::Running
    );

    event_loop.tick().await;
    let posts = transport.posts();
    assert_eq!(posts.len(), 2);
    assert!(posts[0].events_of(EventType::AckEvent).is_empty());
    let acks = posts[1].events_of(EventType::AckEvent);
    assert_eq!(acks.len(), 1);
    assert_eq!(acks[0]["eventId"], "ev-1");
    assert_eq!(acks[0]["eventTypeId"], 5000);
    assert_eq!(ack_payload(&acks[0])["ackEventStatus"], "SUCCESS");
    assert!(event_loop.pending_acks().is_empty());
}

#[tokio::test]
async fn test_command_for_missing_pipeline_is_acked_with_error() {
    let agent = Agent::new();
    let start = server_event("ev-2", EventType::StartPipeline, json!({"name": "ghost"}), true);
    let transport = FakeControlPlane::script(vec![respond(&[start])]);
    let mut event_loop = agent.event_loop(transport.clone(), Duration::from_secs(60));

    event_loop.tick().await;
    event_loop.tick().await;

    let acks = transport.posts()[1].events_of(EventType::AckEvent);
    assert_eq!(acks.len(), 1);
    let payload = ack_payload(&acks[0]);
    assert_eq!(payload["ackEventStatus"], "ERROR");
    assert!(payload["message"].as_str().unwrap().contains("ghost"));
}

#[tokio::test]
async fn test_acks_stay_queued_until_a_post_succeeds() {
    let agent = Agent::new();
    let stop = server_event("ev-3", EventType::DeleteHistoryPipeline, json!({"name": "p1"}), true);
    let transport = FakeControlPlane::script(vec![
        respond(&[stop]),
        Ok(Response {
            status: 503,
            ..Response::default()
        }),
        Err("connection refused".to_string()),
    ]);
    let mut event_loop = agent.event_loop(transport.clone(), Duration::from_secs(60));

    event_loop.tick().await;
    event_loop.tick().await;
    assert_eq!(event_loop.pending_acks().len(), 1);
    event_loop.tick().await;
    assert_eq!(event_loop.pending_acks().len(), 1);
    event_loop.tick().await;
    assert!(event_loop.pending_acks().is_empty());

    let posts = transport.posts();
    assert_eq!(posts.len(), 4);
    for post in &posts[1..] {
        let acks = post.events_of(EventType::AckEvent);
        assert_eq!(acks.len(), 1);
        assert_eq!(acks[0]["eventId"], "ev-3");
    }
}

#[tokio::test]
async fn test_first_post_carries_info_status_and_headers() {
    let agent = Agent::new();
    agent.store("idle");
    agent.manager.start("p1", "admin", None).unwrap();
    let transport = FakeControlPlane::script(Vec::new());
    let mut event_loop = agent.event_loop(transport.clone(), Duration::from_secs(60));

    event_loop.tick().await;
    event_loop.tick().await;

    let posts = transport.posts();
    let first = &posts[0];
    assert_eq!(first.path, EVENTS_PATH);
    assert_eq!(first.header(APP_AUTH_TOKEN_HEADER), Some("app-token"));
    assert_eq!(first.header(COMPONENT_ID_HEADER), Some("agent-1"));
    assert_eq!(first.header(REQUESTED_BY_HEADER), Some("true"));

    let info = first.events_of(EventType::SdcInfoEvent);
    assert_eq!(info.len(), 1);
    let info: JsonValue = serde_json::from_str(info[0]["payload"].as_str().unwrap()).unwrap();
    assert_eq!(info["sdcId"], "agent-1");
    assert_eq!(info["edge"], true);

    let status = first.events_of(EventType::StatusMultiplePipelines);
    assert_eq!(status.len(), 1);
    let status: JsonValue = serde_json::from_str(status[0]["payload"].as_str().unwrap()).unwrap();
    let list = status["pipelineStatusEventList"].as_array().unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0]["name"], "p1");
    assert_eq!(list[0]["pipelineStatus"], "RUNNING");
    assert_eq!(list[0]["isRemote"], false);

    // Info goes once; status waits for its interval.
    assert!(posts[1].events_of(EventType::SdcInfoEvent).is_empty());
    assert!(posts[1].events_of(EventType::StatusMultiplePipelines).is_empty());
}

#[test]
fn test_status_collection_reads_state_without_creating_runners() {
    let agent = Agent::new();
    agent.manager.start("p1", "admin", None).unwrap();
    agent.manager.stop("p1").unwrap();

    // A fresh manager over the same directory, as after an agent restart.
    let paths = EdgePaths::new(agent._temp.path());
    let restarted = PipelineManager::new(
        paths.clone(),
        Arc::new(StageRegistry::with_builtin_stages()),
        ManagerConfig::default(),
    );
    let statuses = collect_statuses(&restarted).unwrap();
    let list = &statuses.pipeline_status_event_list;
    assert_eq!(list.len(), 1);
    assert_eq!(list[0].name, "p1");
    assert_eq!(list[0].pipeline_status, "STOPPED");
    assert!(restarted.existing_runner("p1").is_none());

    // Listed on disk but never opened by a runner: no state file appears.
    let info = PipelineInfo::new("untouched", "Idle", "", "cp");
    std::fs::create_dir_all(paths.pipeline_dir("untouched")).unwrap();
    std::fs::write(paths.info_file("untouched"), serde_json::to_string(&info).unwrap()).unwrap();
    let statuses = collect_statuses(&restarted).unwrap();
    assert_eq!(statuses.pipeline_status_event_list.len(), 1);
    assert!(!paths.state_file("untouched").exists());
    assert!(restarted.existing_runner("untouched").is_none());
}

#[tokio::test]
async fn test_remote_save_creates_a_remote_pipeline() {
    let agent = Agent::new();
    let mut config = PipelineConfiguration::new(PipelineInfo::new("remote1", "Remote", "", "cp"));
    config.stages = stages();
    let save = server_event(
        "ev-4",
        EventType::SavePipeline,
        json!({
            "name": "remote1",
            "user": "cp",
            "description": "from the control plane",
            "pipelineConfigurationAndRules": {
                "pipelineConfig": serde_json::to_string(&config).unwrap(),
                "ruleDefinitions": "",
            },
        }),
        true,
    );
    let transport = FakeControlPlane::script(vec![respond(&[save])]);
    let mut event_loop = agent.event_loop(transport.clone(), Duration::ZERO);

    event_loop.tick().await;
    let stored = agent.manager.pipeline("remote1").unwrap();
    assert_eq!(stored.stages.len(), 2);
    assert_eq!(stored.description, "from the control plane");
    assert!(agent.manager.runner("remote1").unwrap().is_remote());

    agent.manager.start("remote1", "cp", None).unwrap();
    event_loop.tick().await;
    let post = &transport.posts()[1];
    assert_eq!(
        ack_payload(&post.events_of(EventType::AckEvent)[0])["ackEventStatus"],
        "SUCCESS"
    );
    let status = post.events_of(EventType::StatusMultiplePipelines);
    let status: JsonValue = serde_json::from_str(status[0]["payload"].as_str().unwrap()).unwrap();
    let remote = status["pipelineStatusEventList"]
        .as_array()
        .unwrap()
        .iter()
        .find(|entry| entry["name"] == "remote1")
        .cloned()
        .unwrap();
    assert_eq!(remote["isRemote"], true);
}

#[tokio::test]
async fn test_ping_frequency_adjustment() {
    let agent = Agent::new();
    let adjust = server_event(
        "ev-5",
        EventType::PingFrequencyAdjustment,
        json!({"pingFrequency": 250}),
        false,
    );
    let transport = FakeControlPlane::script(vec![respond(&[adjust])]);
    let mut event_loop = agent.event_loop(transport, Duration::from_secs(60));

    event_loop.tick().await;
    assert_eq!(event_loop.ping_frequency(), Duration::from_millis(250));
    assert!(event_loop.pending_acks().is_empty());
}

#[tokio::test]
async fn test_bad_payload_and_bad_response_are_survived() {
    let agent = Agent::new();
    let garbled = ServerEvent {
        payload: "{not json".to_string(),
        ..server_event("ev-6", EventType::StopPipeline, JsonValue::Null, true)
    };
    let transport = FakeControlPlane::script(vec![
        Ok(Response::ok("this is not an event list")),
        respond(&[garbled]),
    ]);
    let mut event_loop = agent.event_loop(transport.clone(), Duration::from_secs(60));

    event_loop.tick().await;
    assert!(event_loop.pending_acks().is_empty());
    event_loop.tick().await;
    event_loop.tick().await;

    let acks = transport.posts()[2].events_of(EventType::AckEvent);
    assert_eq!(acks.len(), 1);
    assert_eq!(ack_payload(&acks[0])["ackEventStatus"], "ERROR");
}

#[tokio::test]
async fn test_spawned_loop_stops_on_shutdown() {
    let agent = Agent::new();
    let transport = FakeControlPlane::script(Vec::new());
    let handle = agent
        .event_loop(transport.clone(), Duration::from_secs(60))
        .spawn();

    tokio::time::sleep(Duration::from_millis(50)).await;
    handle.shutdown().await.unwrap();
    let posts = transport.posts().len();
    assert!(posts >= 1);

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(transport.posts().len(), posts);
}
