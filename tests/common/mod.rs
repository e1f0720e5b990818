// ABOUTME: Common utilities and helpers for integration tests
// ABOUTME: Provides scripted in-process capability providers and definition helpers

#![allow(dead_code)]

use async_trait::async_trait;
use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value as JsonValue};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use pallet::capability::{self, CapabilityAddress, CapabilityError, CapabilityLocator, Transport};
use pallet::engine::WorkflowEngine;
use pallet::parser::WorkflowDefinition;

/// How a scripted skill answers an invocation.
#[derive(Debug, Clone)]
pub enum Script {
    /// Reply with a fixed value.
    Respond(JsonValue),
    /// Reply with `{"echo": <payload>}`.
    Echo,
    /// Fail with an HTTP 500.
    Fail(String),
    /// Fail the first `n` calls, then reply with the value.
    FailTimes(usize, JsonValue),
    /// Sleep, then reply with the value.
    Delay(Duration, JsonValue),
    /// Never reply.
    Hang,
}

#[derive(Debug, Clone)]
pub struct Call {
    pub capability_id: String,
    pub payload: JsonValue,
    pub at: Instant,
}

/// In-process transport whose skills follow a script and whose calls are recorded.
#[derive(Default)]
pub struct ScriptedTransport {
    scripts: Mutex<HashMap<String, Script>>,
    counts: Mutex<HashMap<String, usize>>,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, capability_id: &str, script: Script) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(capability_id.to_string(), script);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn called_skills(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .map(|call| call.capability_id)
            .collect()
    }

    pub fn call_count(&self, capability_id: &str) -> usize {
        self.counts
            .lock()
            .unwrap()
            .get(capability_id)
            .copied()
            .unwrap_or(0)
    }

    /// Payload of the most recent call to `capability_id`.
    pub fn payload(&self, capability_id: &str) -> Option<JsonValue> {
        self.calls()
            .into_iter()
            .rev()
            .find(|call| call.capability_id == capability_id)
            .map(|call| call.payload)
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn invoke(
        &self,
        _address: &CapabilityAddress,
        capability_id: &str,
        payload: &JsonValue,
        _timeout: Duration,
    ) -> capability::Result<JsonValue> {
        let script = self
            .scripts
            .lock()
            .unwrap()
            .get(capability_id)
            .cloned()
            .unwrap_or(Script::Echo);
        let count = {
            let mut counts = self.counts.lock().unwrap();
            let count = counts.entry(capability_id.to_string()).or_insert(0);
            *count += 1;
            *count
        };
        self.calls.lock().unwrap().push(Call {
            capability_id: capability_id.to_string(),
            payload: payload.clone(),
            at: Instant::now(),
        });

        match script {
            Script::Respond(value) => Ok(value),
            Script::Echo => Ok(json!({ "echo": payload })),
            Script::Fail(body) => Err(CapabilityError::Status { status: 500, body }),
            Script::FailTimes(failures, value) => {
                if count <= failures {
                    Err(CapabilityError::Status {
                        status: 503,
                        body: format!("attempt {} rejected", count),
                    })
                } else {
                    Ok(value)
                }
            }
            Script::Delay(delay, value) => {
                tokio::time::sleep(delay).await;
                Ok(value)
            }
            Script::Hang => std::future::pending().await,
        }
    }
}

/// Locator that serves every known skill from one address and counts lookups.
pub struct MockLocator {
    known: Vec<String>,
    lookups: AtomicUsize,
}

impl MockLocator {
    pub fn new(known: &[&str]) -> Self {
        Self {
            known: known.iter().map(|s| s.to_string()).collect(),
            lookups: AtomicUsize::new(0),
        }
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CapabilityLocator for MockLocator {
    async fn locate(&self, capability_id: &str) -> capability::Result<Option<CapabilityAddress>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if self.known.iter().any(|known| known == capability_id) {
            Ok(Some(CapabilityAddress::parse("http://agent.test")?))
        } else {
            Ok(None)
        }
    }
}

/// Engine wired to a scripted transport and a locator knowing `skills`.
pub fn engine_with(
    transport: ScriptedTransport,
    skills: &[&str],
) -> (WorkflowEngine, Arc<ScriptedTransport>, Arc<MockLocator>) {
    let transport = Arc::new(transport);
    let locator = Arc::new(MockLocator::new(skills));
    let engine = WorkflowEngine::new(locator.clone(), transport.clone());
    (engine, transport, locator)
}

/// Parse a definition body, adding a metadata header.
pub fn definition(id: &str, body: &str) -> WorkflowDefinition {
    let yaml = format!(
        "metadata:\n  id: {}\n  name: Test {}\n  version: v1\n{}",
        id, id, body
    );
    WorkflowDefinition::from_yaml(&yaml).unwrap()
}

type Handler = Arc<dyn Fn(&str, &JsonValue) -> Result<JsonValue, (i64, String)> + Send + Sync>;

#[derive(Clone)]
struct AgentState {
    card: Arc<JsonValue>,
    handler: Handler,
}

/// Local HTTP provider serving an agent card and JSON-RPC execute calls.
pub struct MockAgent {
    pub address: CapabilityAddress,
    task: tokio::task::JoinHandle<()>,
}

impl Drop for MockAgent {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl MockAgent {
    /// Methods named `slow` sleep for two seconds before answering.
    pub async fn spawn<F>(name: &str, skills: &[&str], handler: F) -> Self
    where
        F: Fn(&str, &JsonValue) -> Result<JsonValue, (i64, String)> + Send + Sync + 'static,
    {
        let state = AgentState {
            card: Arc::new(json!({
                "name": name,
                "skills": skills
                    .iter()
                    .map(|id| json!({"id": id, "description": format!("{} skill", id)}))
                    .collect::<Vec<_>>(),
            })),
            handler: Arc::new(handler),
        };
        let router = Router::new()
            .route("/agent-card", get(agent_card))
            .route("/execute", post(execute))
            .with_state(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address =
            CapabilityAddress::parse(&format!("http://{}", listener.local_addr().unwrap())).unwrap();
        let task = tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });

        Self { address, task }
    }
}

async fn agent_card(State(state): State<AgentState>) -> Json<JsonValue> {
    Json((*state.card).clone())
}

async fn execute(State(state): State<AgentState>, Json(request): Json<JsonValue>) -> Json<JsonValue> {
    let method = request["method"].as_str().unwrap_or_default().to_string();
    if method == "slow" {
        tokio::time::sleep(Duration::from_secs(2)).await;
    }
    let reply = match (state.handler)(&method, &request["params"]) {
        Ok(result) => json!({"jsonrpc": "2.0", "id": request["id"], "result": result}),
        Err((code, message)) => json!({
            "jsonrpc": "2.0",
            "id": request["id"],
            "error": {"code": code, "message": message},
        }),
    };
    Json(reply)
}
