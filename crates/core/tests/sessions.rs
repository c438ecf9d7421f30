//! Integration tests for session reuse through the factory and coordinator.

use std::sync::Arc;
use std::time::Duration;

use rdflink::{
	Answer, ConnectionConfig, ConnectionFactory, CreateGraph, Endpoint, GraphExists, Query, QueryCommand, Quit,
	SessionFactoryFinder, TxCoordinator, UpdateCommand,
};
use rdflink_runtime::Session;
use rdflink_runtime::testing::{MemoryBackend, MemorySession, SessionCall, init_tracing, memory};

fn endpoint(s: &str) -> Endpoint {
	Endpoint::parse(s).unwrap()
}

fn factory_with(config: ConnectionConfig) -> (Arc<ConnectionFactory>, Arc<MemoryBackend>) {
	init_tracing();
	let backend = Arc::new(MemoryBackend::remote());
	let finder = SessionFactoryFinder::new(&config).with("rmi", backend.clone());
	(Arc::new(ConnectionFactory::new(config, finder)), backend)
}

fn factory() -> (Arc<ConnectionFactory>, Arc<MemoryBackend>) {
	factory_with(ConnectionConfig::default())
}

#[tokio::test]
async fn sequential_connections_reuse_session() -> anyhow::Result<()> {
	let (factory, backend) = factory();
	let a = endpoint("rmi://a.example.org/server1");

	let conn1 = factory.new_connection(Some(&a)).await?;
	assert!(conn1.auto_commit()?);
	let query = Query::select("SELECT ?s WHERE { ?s ?p ?o }");
	conn1
		.execute(move |session, cancel| async move { session.query(&query, &cancel).await })
		.await?;
	let session1 = conn1.session()?;
	conn1.close().await?;

	let conn2 = factory.new_connection(Some(&a)).await?;

	assert!(Arc::ptr_eq(&session1, &conn2.session()?));
	assert_eq!(backend.created(), 1);
	assert_eq!(memory(&session1).count(&SessionCall::Ping), 1);
	Ok(())
}

#[tokio::test]
async fn session_closed_behind_cache_is_replaced() -> anyhow::Result<()> {
	let (factory, backend) = factory();
	let a = endpoint("rmi://a.example.org/server1");

	let conn1 = factory.new_connection(Some(&a)).await?;
	let session1 = conn1.session()?;
	conn1.close().await?;
	memory(&session1).close().await?;

	let conn2 = factory.new_connection(Some(&a)).await?;

	assert!(!Arc::ptr_eq(&session1, &conn2.session()?));
	assert_eq!(backend.created(), 2);
	Ok(())
}

#[tokio::test]
async fn coordinators_share_factory_sessions() {
	let (factory, backend) = factory();
	let a = endpoint("rmi://a.example.org/server1");
	let insert = UpdateCommand::new(Some(a.clone()), "INSERT DATA { <urn:s> <urn:p> <urn:o> }");

	let mut first = TxCoordinator::new(Arc::clone(&factory));
	assert!(first.execute_command(&insert).await);
	first.close().await;

	let mut second = TxCoordinator::new(Arc::clone(&factory));
	assert!(second.execute_command(&insert).await);

	assert_eq!(backend.created(), 1);
	assert_eq!(backend.sessions()[0].count(&SessionCall::Update(insert.statement.clone())), 2);
}

#[tokio::test]
async fn coordinator_records_answer_and_message() {
	let (factory, _) = factory();
	let mut coordinator = TxCoordinator::new(factory);
	let a = endpoint("rmi://a.example.org/server1");

	let create = CreateGraph {
		server: Some(a.clone()),
		graph: "urn:graph:people".into(),
		graph_type: None,
	};
	assert!(coordinator.execute_command(&create).await);
	assert_eq!(coordinator.last_message(), Some("Successfully created graph urn:graph:people"));
	assert!(coordinator.last_answer().is_none());

	let exists = GraphExists {
		server: Some(a.clone()),
		graph: "urn:graph:people".into(),
	};
	assert!(coordinator.execute_command(&exists).await);
	assert_eq!(coordinator.last_answer(), Some(&Answer::Boolean(true)));
	assert_eq!(coordinator.last_message(), Some("Graph urn:graph:people exists"));

	let ask = QueryCommand::new(Some(a.clone()), Query::ask("ASK { ?s ?p ?o }"));
	assert!(coordinator.execute_command(&ask).await);
	assert_eq!(coordinator.last_answer(), Some(&Answer::Boolean(true)));
	assert!(coordinator.last_error().is_none());
}

#[tokio::test]
async fn failed_command_sets_error_and_drops_dead_connection() {
	let (factory, backend) = factory();
	let mut coordinator = TxCoordinator::new(factory);
	let a = endpoint("rmi://a.example.org/server1");
	let insert = UpdateCommand::new(Some(a.clone()), "INSERT DATA { <urn:s> <urn:p> <urn:o> }");

	assert!(coordinator.execute_command(&insert).await);
	backend.sessions()[0].kill();

	assert!(coordinator.execute_command(&insert).await);
	assert_eq!(coordinator.last_message(), Some("Error: Session is closed"));
	assert!(coordinator.last_error().unwrap().runtime().is_closed());
	assert!(coordinator.connection(&a).is_none());

	assert!(coordinator.execute_command(&insert).await);
	assert!(coordinator.last_error().is_none());
	assert_eq!(backend.created(), 2);
}

#[tokio::test]
async fn quit_runs_locally_and_stops() {
	let (factory, backend) = factory();
	let mut coordinator = TxCoordinator::new(factory);

	assert!(!coordinator.execute_command(&Quit).await);
	assert_eq!(coordinator.last_message(), Some("Quitting"));
	assert_eq!(backend.created(), 0);
}

#[tokio::test]
async fn endpoint_less_command_uses_default_server() {
	let config = ConnectionConfig {
		canonical_host: "localhost".into(),
		..ConnectionConfig::default()
	};
	let (factory, backend) = factory_with(config);
	let mut coordinator = TxCoordinator::new(factory);

	assert!(coordinator.execute_command(&UpdateCommand::new(None, "LOAD <file:///tmp/data.nt>")).await);

	assert!(coordinator.last_error().is_none());
	assert!(coordinator.connection(&endpoint("rmi://127.0.0.1/server1")).is_some());
	assert_eq!(backend.created(), 1);
}

#[tokio::test]
async fn missing_default_server_is_reported() {
	let (factory, _) = factory_with(ConnectionConfig::default().with_default_server(None));
	let mut coordinator = TxCoordinator::new(factory);

	assert!(coordinator.execute_command(&UpdateCommand::new(None, "LOAD <file:///tmp/data.nt>")).await);
	assert_eq!(coordinator.last_message(), Some("Error: No default server configured"));
}

#[tokio::test]
async fn pre_seeded_session_is_used_and_left_open() {
	let (factory, backend) = factory();
	let mut coordinator = TxCoordinator::new(factory);
	let a = endpoint("rmi://a.example.org/server1");
	let seeded = Arc::new(MemorySession::new(false));

	coordinator.pre_seed_session(&a, seeded.clone()).await;
	assert!(coordinator.execute_command(&GraphExists { server: Some(a.clone()), graph: "urn:g".into() }).await);
	coordinator.close().await;

	assert_eq!(backend.created(), 0);
	assert_eq!(seeded.calls(), vec![SessionCall::GraphExists("urn:g".into())]);
	assert!(!seeded.is_closed());
	assert!(coordinator.factory().cache().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn interruptible_connection_can_be_cancelled() -> anyhow::Result<()> {
	let (factory, _) = factory_with(ConnectionConfig::default().with_interruptible(true));
	let a = endpoint("rmi://a.example.org/server1");
	let conn = Arc::new(factory.new_connection(Some(&a)).await?);
	memory(&conn.session()?).set_query_delay(Some(Duration::from_secs(30)));

	let running = {
		let conn = Arc::clone(&conn);
		tokio::spawn(async move {
			let query = Query::select("SELECT ?s WHERE { ?s ?p ?o }");
			conn.execute(move |session, cancel| async move { session.query(&query, &cancel).await })
				.await
		})
	};
	let mut cancelled = false;
	for _ in 0..200 {
		if conn.cancel() {
			cancelled = true;
			break;
		}
		tokio::time::sleep(Duration::from_millis(5)).await;
	}

	assert!(cancelled);
	assert!(running.await?.unwrap_err().is_cancelled());
	Ok(())
}
