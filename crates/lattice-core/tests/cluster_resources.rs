//! Integration tests for resource sharing across interpreter processes.
//!
//! Each interpreter process is an in-process runtime server on an ephemeral
//! port; the front-end reaches it through `RemoteInterpreterProcess`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{Value, json};

use lattice_core::client::{ClientPoolConfig, PollerConfig};
use lattice_core::interpreter::{Code, Interpreter, InterpreterContext, InterpreterFactory};
use lattice_core::process::InterpreterProcess;
use lattice_core::runtime::{InterpreterRuntime, RuntimeConfig, RuntimeServer, ServerHandle};
use lattice_core::{
    Cluster, ConnectionPoolConfig, InterpreterGroup, Properties, RemoteInterpreter,
    RemoteInterpreterProcess,
};

fn start_server(group_id: &str) -> ServerHandle {
    let runtime = Arc::new(InterpreterRuntime::new(
        group_id,
        InterpreterFactory::with_builtins(),
        RuntimeConfig {
            event_poll_timeout: Duration::from_millis(100),
            resource_call_timeout: Duration::from_secs(10),
            job_poll_interval: Duration::from_millis(20),
        },
    ));
    let (handle, _join) = RuntimeServer::bind("127.0.0.1:0", runtime)
        .unwrap()
        .spawn()
        .unwrap();
    handle
}

fn config() -> ConnectionPoolConfig {
    ConnectionPoolConfig {
        client: ClientPoolConfig {
            max_total: 4,
            borrow_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(1),
            call_timeout: Some(Duration::from_secs(15)),
        },
        poller: PollerConfig {
            idle_wait: Duration::from_millis(20),
            error_backoff: Duration::from_millis(20),
        },
        graceful_shutdown_timeout: Duration::from_millis(200),
        shutdown_poll_interval: Duration::from_millis(20),
    }
}

/// Open a `pool` interpreter in its own group backed by `server`.
fn pool_interpreter(cluster: &Arc<Cluster>, group_id: &str, server: &ServerHandle) -> RemoteInterpreter {
    let port = server.port();
    let connection = cluster.connection_pool(group_id, || {
        Arc::new(
            RemoteInterpreterProcess::new("127.0.0.1", port)
                .with_connect_timeout(Duration::from_secs(2)),
        ) as Arc<dyn InterpreterProcess>
    });
    let group = Arc::new(InterpreterGroup::new(group_id));
    let interpreter = RemoteInterpreter::new("pool", Properties::new(), group, connection);
    interpreter.open().unwrap();
    interpreter
}

fn run(interpreter: &RemoteInterpreter, paragraph_id: &str, script: &str) -> (Code, String) {
    let context = InterpreterContext::new("note", paragraph_id);
    let result = interpreter.interpret(script, &context).unwrap();
    (result.code(), result.message().to_string())
}

fn names(json: &str) -> Vec<String> {
    let infos: Vec<Value> = serde_json::from_str(json).unwrap();
    infos
        .iter()
        .map(|info| info["name"].as_str().unwrap().to_string())
        .collect()
}

#[test]
fn test_resources_are_visible_across_processes() {
    let server_a = start_server("group-a");
    let server_b = start_server("group-b");
    let cluster = Cluster::with_local_pool(config());

    let a = pool_interpreter(&cluster, "group-a", &server_a);
    let b = pool_interpreter(&cluster, "group-b", &server_b);

    let (code, _) = run(&a, "p1", "put shared {\"v\": 1}");
    assert_eq!(code, Code::Success);

    // B finds A's resource through its event poller.
    let (code, message) = run(&b, "p1", "get shared");
    assert_eq!(code, Code::Success);
    assert_eq!(serde_json::from_str::<Value>(&message).unwrap(), json!({"v": 1}));

    let (_, message) = run(&b, "p2", "search sh.*");
    assert_eq!(names(&message), vec!["shared"]);

    // Resources held by the front-end itself are part of the cluster too.
    cluster.local_pool().unwrap().put("front", json!("end"));
    let (code, message) = run(&a, "p2", "get front");
    assert_eq!(code, Code::Success);
    assert_eq!(message, "\"end\"");

    // And the front-end can see into the processes.
    let seen: Vec<String> = cluster
        .local_pool()
        .unwrap()
        .search("*")
        .into_iter()
        .map(|info| info.name)
        .collect();
    assert!(seen.contains(&"shared".to_string()));
    assert!(seen.contains(&"front".to_string()));

    let (code, _) = run(&a, "p3", "remove shared");
    assert_eq!(code, Code::Success);
    let (code, message) = run(&b, "p3", "get shared");
    assert_eq!(code, Code::Error);
    assert!(message.contains("shared not found"));

    a.close().unwrap();
    b.close().unwrap();
    server_a.stop();
    server_b.stop();
}

#[test]
fn test_specific_location_only_searches_that_pool() {
    let server_a = start_server("group-a");
    let server_b = start_server("group-b");
    let cluster = Cluster::new(config());

    let a = pool_interpreter(&cluster, "group-a", &server_a);
    let b = pool_interpreter(&cluster, "group-b", &server_b);

    run(&a, "p1", "put x 1");
    run(&b, "p1", "put x 2");

    let location_a = cluster.get("group-a").unwrap().resource_pool_id().unwrap();
    let (_, message) = run(&b, "p2", &format!("get x {}", location_a));
    assert_eq!(message, "1");

    let (_, message) = run(&b, "p3", &format!("search x {}", location_a));
    let infos: Vec<Value> = serde_json::from_str(&message).unwrap();
    assert_eq!(infos.len(), 1);
    assert_eq!(infos[0]["location"], Value::String(location_a));

    // A wildcard search sees both copies.
    let (_, message) = run(&b, "p4", "search x");
    assert_eq!(names(&message), vec!["x", "x"]);

    a.close().unwrap();
    b.close().unwrap();
    server_a.stop();
    server_b.stop();
}

#[test]
fn test_stopped_process_is_not_searched() {
    let server_a = start_server("group-a");
    let server_b = start_server("group-b");
    let cluster = Cluster::new(config());

    let a = pool_interpreter(&cluster, "group-a", &server_a);
    let b = pool_interpreter(&cluster, "group-b", &server_b);

    run(&a, "p1", "put gone 1");
    a.close().unwrap();
    assert!(!cluster.get("group-a").unwrap().is_running());

    let (_, message) = run(&b, "p1", "search *");
    assert!(names(&message).is_empty());

    // A get is answered as absent, well before the relay would give up.
    let start = Instant::now();
    let (code, message) = run(&b, "p2", "get gone");
    assert!(start.elapsed() < Duration::from_secs(5));
    assert_eq!(code, Code::Error);
    assert!(message.contains("gone not found"), "{}", message);
    assert!(cluster.get_from_all(None, "*", "gone").is_none());
    assert!(cluster.search_all(None, "*", "gone").is_empty());

    b.close().unwrap();
    server_a.stop();
    server_b.stop();
}
