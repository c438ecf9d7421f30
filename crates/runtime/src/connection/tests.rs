use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use rdflink_protocol::{Answer, Credentials, Endpoint, Query};
use tokio::task::JoinHandle;

use super::*;
use crate::testing::{MemorySession, SessionCall, init_tracing};

fn memory_connection() -> (Connection, Arc<MemorySession>) {
	init_tracing();
	let session = Arc::new(MemorySession::new(false));
	let connection = Connection::with_session(Arc::clone(&session) as Arc<dyn Session>);
	(connection, session)
}

async fn run_query(connection: &Connection, text: &str) -> Result<Answer> {
	let query = Query::select(text);
	connection
		.execute(move |session, cancel| async move { session.query(&query, &cancel).await })
		.await
}

/// Waits until the in-flight slot holds an operation.
async fn wait_for_in_flight(connection: &Connection) {
	for _ in 0..200 {
		if !connection.exec.in_flight.is_empty() {
			return;
		}
		tokio::time::sleep(Duration::from_millis(5)).await;
	}
	panic!("no operation became in flight");
}

#[tokio::test]
async fn test_execute_returns_operation_result() {
	let (connection, session) = memory_connection();

	let answer = run_query(&connection, "SELECT * WHERE { ?s ?p ?o }").await.unwrap();

	assert!(matches!(answer, Answer::Tuples(_)));
	assert_eq!(session.calls(), vec![SessionCall::Query("SELECT * WHERE { ?s ?p ?o }".into())]);
	assert!(connection.exec.in_flight.is_empty());
}

#[tokio::test]
async fn test_execute_passes_operation_error_through() {
	let (connection, _) = memory_connection();

	let err = connection
		.execute(|_, _| async { Err::<(), _>(Error::Query("bad syntax".into())) })
		.await
		.unwrap_err();

	assert!(matches!(err, Error::Query(ref msg) if msg == "bad syntax"));
	assert!(connection.exec.in_flight.is_empty());
}

#[tokio::test]
async fn test_operations_are_serialized() {
	let (connection, _) = memory_connection();
	let connection = Arc::new(connection);
	let active = Arc::new(AtomicUsize::new(0));
	let peak = Arc::new(AtomicUsize::new(0));

	let mut tasks = Vec::new();
	for _ in 0..8 {
		let connection = Arc::clone(&connection);
		let active = Arc::clone(&active);
		let peak = Arc::clone(&peak);
		tasks.push(tokio::spawn(async move {
			connection
				.execute(move |_, _| async move {
					let now = active.fetch_add(1, Ordering::SeqCst) + 1;
					peak.fetch_max(now, Ordering::SeqCst);
					tokio::time::sleep(Duration::from_millis(5)).await;
					active.fetch_sub(1, Ordering::SeqCst);
					Ok::<_, Error>(())
				})
				.await
		}));
	}
	for task in tasks {
		task.await.unwrap().unwrap();
	}

	assert_eq!(peak.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_cancel_without_operation_is_noop() {
	let (connection, session) = memory_connection();

	assert!(!connection.cancel());
	assert!(!connection.cancel());

	run_query(&connection, "SELECT ?x WHERE { ?x ?y ?z }").await.unwrap();
	assert_eq!(session.calls().len(), 1);
}

#[tokio::test]
async fn test_cancel_interrupts_in_flight_query() {
	let (connection, session) = memory_connection();
	session.set_query_delay(Some(Duration::from_secs(30)));
	let connection = Arc::new(connection);

	let running = {
		let connection = Arc::clone(&connection);
		tokio::spawn(async move { run_query(&connection, "SELECT ?slow WHERE { ?slow ?p ?o }").await })
	};
	wait_for_in_flight(&connection).await;

	assert!(connection.cancel());
	let err = running.await.unwrap().unwrap_err();
	assert!(err.is_cancelled());

	// The next operation gets a fresh token.
	session.set_query_delay(None);
	run_query(&connection, "SELECT ?fast WHERE { ?fast ?p ?o }").await.unwrap();
	assert!(!connection.cancel());
}

#[tokio::test]
async fn test_cancel_does_not_leak_into_next_operation() {
	let (connection, _) = memory_connection();

	let cancelled_early = connection
		.execute(|_, cancel| async move { Ok::<_, Error>(cancel.is_cancelled()) })
		.await
		.unwrap();
	assert!(!connection.cancel());
	let cancelled_late = connection
		.execute(|_, cancel| async move { Ok::<_, Error>(cancel.is_cancelled()) })
		.await
		.unwrap();

	assert!(!cancelled_early);
	assert!(!cancelled_late);
}

#[tokio::test]
async fn test_set_auto_commit_is_noop_when_unchanged() {
	let (connection, session) = memory_connection();

	connection.set_auto_commit(true).await.unwrap();
	assert!(session.calls().is_empty());

	connection.set_auto_commit(false).await.unwrap();
	connection.set_auto_commit(false).await.unwrap();
	assert!(!connection.auto_commit().unwrap());
	assert_eq!(session.calls(), vec![SessionCall::SetAutoCommit(false)]);
}

#[tokio::test]
async fn test_set_auto_commit_keeps_state_on_failure() {
	let (connection, session) = memory_connection();
	session.kill();

	let err = connection.set_auto_commit(false).await.unwrap_err();

	assert!(matches!(err, Error::SessionClosed));
	assert!(connection.auto_commit().unwrap());
}

#[tokio::test]
async fn test_closed_connection_rejects_operations() {
	let (connection, session) = memory_connection();

	connection.close().await.unwrap();

	assert!(!connection.is_open());
	assert!(!connection.is_remote());
	assert!(run_query(&connection, "ASK { ?s ?p ?o }").await.unwrap_err().is_closed());
	assert!(connection.auto_commit().unwrap_err().is_closed());
	assert!(connection.session().err().unwrap().is_closed());
	assert!(connection.close().await.unwrap_err().is_closed());
	assert!(connection.dispose().await.unwrap_err().is_closed());
	// A connection without a factory leaves its session alone on close.
	assert!(!session.is_closed());
}

#[tokio::test]
async fn test_dispose_closes_session() {
	let (connection, session) = memory_connection();

	connection.dispose().await.unwrap();

	assert!(session.is_closed());
	assert!(connection.set_auto_commit(false).await.unwrap_err().is_closed());
}

#[tokio::test]
async fn test_default_credentials_require_security_domain() {
	let (connection, session) = memory_connection();

	let err = connection
		.set_default_credentials(Credentials::new("alice", "secret"))
		.await
		.unwrap_err();
	assert!(matches!(err, Error::NoSecurityDomain));

	let domain = Endpoint::parse("rmi://localhost/server1").unwrap();
	connection
		.set_credentials(domain.clone(), Credentials::new("alice", "secret"))
		.await
		.unwrap();

	assert_eq!(connection.security_domain().unwrap(), Some(domain));
	assert_eq!(
		session.calls(),
		vec![SessionCall::Login("alice@rmi://localhost/server1".into())]
	);
}

#[tokio::test]
async fn test_is_remote_follows_session_locality() {
	let remote = Connection::with_session(Arc::new(MemorySession::new(false)));
	let local = Connection::with_session(Arc::new(MemorySession::new(true)));

	assert!(remote.is_remote());
	assert!(!local.is_remote());
	assert!(remote.endpoint().is_none());
}

#[tokio::test]
async fn test_proxy_execution_returns_result() {
	let (connection, session) = memory_connection();
	let connection = connection.with_proxy(Handle::current());
	assert!(connection.is_proxied());

	let count = connection
		.execute(|session, cancel| async move { session.update("INSERT DATA { <a> <b> <c> }", &cancel).await })
		.await
		.unwrap();

	assert_eq!(count, 1);
	assert_eq!(session.calls().len(), 1);
}

#[tokio::test]
async fn test_proxy_execution_passes_error_through() {
	let (connection, _) = memory_connection();
	let connection = connection.with_proxy(Handle::current());

	let err = connection
		.execute(|_, _| async { Err::<(), _>(Error::Query("rejected".into())) })
		.await
		.unwrap_err();

	assert!(matches!(err, Error::Query(ref msg) if msg == "rejected"));
}

#[tokio::test]
#[should_panic(expected = "backend exploded")]
async fn test_proxy_execution_resumes_panic_in_caller() {
	let (connection, _) = memory_connection();
	let connection = connection.with_proxy(Handle::current());

	let _ = connection
		.execute(|_, _| async {
			if true {
				panic!("backend exploded");
			}
			Ok::<(), Error>(())
		})
		.await;
}

#[tokio::test]
async fn test_proxy_cancel_reaches_worker() {
	let (connection, session) = memory_connection();
	session.set_query_delay(Some(Duration::from_secs(30)));
	let connection = Arc::new(connection.with_proxy(Handle::current()));

	let running = {
		let connection = Arc::clone(&connection);
		tokio::spawn(async move { run_query(&connection, "SELECT ?slow WHERE { ?slow ?p ?o }").await })
	};
	wait_for_in_flight(&connection).await;

	assert!(connection.cancel());
	assert!(running.await.unwrap().unwrap_err().is_cancelled());
}

#[tokio::test]
async fn test_proxy_operation_completes_after_caller_abandons_it() {
	let (connection, session) = memory_connection();
	session.set_query_delay(Some(Duration::from_millis(50)));
	let connection = Arc::new(connection.with_proxy(Handle::current()));

	let caller = {
		let connection = Arc::clone(&connection);
		tokio::spawn(async move { run_query(&connection, "SELECT ?a WHERE { ?a ?b ?c }").await })
	};
	wait_for_in_flight(&connection).await;
	caller.abort();
	assert!(caller.await.unwrap_err().is_cancelled());

	// The detached worker still holds the lock, so this waits for it.
	session.set_query_delay(None);
	run_query(&connection, "SELECT ?d WHERE { ?d ?e ?f }").await.unwrap();

	assert_eq!(
		session.calls(),
		vec![
			SessionCall::Query("SELECT ?a WHERE { ?a ?b ?c }".into()),
			SessionCall::Query("SELECT ?d WHERE { ?d ?e ?f }".into()),
		]
	);
}

#[tokio::test]
#[should_panic(expected = "backend exploded inline")]
async fn test_execution_passes_panic_through() {
	let (connection, _) = memory_connection();

	let _ = connection
		.execute(|_, _| async {
			if true {
				panic!("backend exploded inline");
			}
			Ok::<(), Error>(())
		})
		.await;
}

#[tokio::test]
async fn test_connection_usable_after_operation_panicked() {
	let (connection, _) = memory_connection();
	let connection = Arc::new(connection);

	let task = {
		let connection = Arc::clone(&connection);
		tokio::spawn(async move {
			connection
				.execute(|_, _| async {
					if true {
						panic!("operation failed hard");
					}
					Ok::<(), Error>(())
				})
				.await
		})
	};

	assert!(task.await.unwrap_err().is_panic());
	assert!(connection.exec.in_flight.is_empty());
	run_query(&connection, "SELECT ?x WHERE { ?x ?y ?z }").await.unwrap();
}

fn pooled_connection() -> (Connection, Arc<MemorySession>, Arc<SessionCache>, Endpoint) {
	init_tracing();
	let session = Arc::new(MemorySession::new(false));
	let handle: Arc<dyn Session> = session.clone();
	let cache = Arc::new(SessionCache::new());
	cache.mark_in_use(&handle);
	let endpoint = Endpoint::parse("rmi://db.example.org/server1").unwrap();
	let connection = Connection::pooled(handle, endpoint.clone(), None, Arc::clone(&cache));
	(connection, session, cache, endpoint)
}

/// Starts an operation that holds the serialization lock until `release` fires.
async fn hold_lock(connection: &Arc<Connection>) -> (tokio::sync::oneshot::Sender<()>, JoinHandle<Result<()>>) {
	let (release, held) = tokio::sync::oneshot::channel::<()>();
	let task = {
		let connection = Arc::clone(connection);
		tokio::spawn(async move {
			connection
				.execute(move |_, _| async move {
					let _ = held.await;
					Ok::<_, Error>(())
				})
				.await
		})
	};
	wait_for_in_flight(connection).await;
	(release, task)
}

async fn queued_operation_is_refused_after_close(proxied: bool) {
	let (connection, session, cache, endpoint) = pooled_connection();
	let connection = match proxied {
		true => connection.with_proxy(Handle::current()),
		false => connection,
	};
	let connection = Arc::new(connection);
	let (release, holder) = hold_lock(&connection).await;

	let closing = {
		let connection = Arc::clone(&connection);
		tokio::spawn(async move { connection.close().await })
	};
	tokio::time::sleep(Duration::from_millis(10)).await;
	// Still open while close waits, so this is admitted and queues behind it.
	assert!(connection.is_open());
	let queued = {
		let connection = Arc::clone(&connection);
		tokio::spawn(async move {
			connection
				.execute(|session, cancel| async move { session.update("INSERT DATA { <a> <b> <c> }", &cancel).await })
				.await
		})
	};
	tokio::time::sleep(Duration::from_millis(10)).await;

	release.send(()).unwrap();
	holder.await.unwrap().unwrap();
	closing.await.unwrap().unwrap();

	assert!(queued.await.unwrap().unwrap_err().is_closed());
	assert!(session.calls().is_empty());
	assert_eq!(cache.idle_count(&endpoint), 1);
	assert_eq!(cache.in_use_len(), 0);
}

#[tokio::test]
async fn test_operation_queued_behind_close_never_reaches_session() {
	queued_operation_is_refused_after_close(false).await;
}

#[tokio::test]
async fn test_proxied_operation_queued_behind_close_never_reaches_session() {
	queued_operation_is_refused_after_close(true).await;
}

#[tokio::test]
async fn test_abandoned_close_leaves_session_recyclable() {
	let (connection, session, cache, endpoint) = pooled_connection();
	let connection = Arc::new(connection);
	let (release, holder) = hold_lock(&connection).await;

	let attempt = tokio::time::timeout(Duration::from_millis(10), connection.close()).await;
	assert!(attempt.is_err());
	assert!(connection.is_open());

	release.send(()).unwrap();
	holder.await.unwrap().unwrap();
	drop(connection);

	assert_eq!(cache.idle_count(&endpoint), 1);
	assert_eq!(cache.in_use_len(), 0);
	assert!(!session.is_closed());
}

#[tokio::test]
async fn test_abandoned_dispose_leaves_connection_open() {
	let (connection, session, cache, _) = pooled_connection();
	let connection = Arc::new(connection);
	let (release, holder) = hold_lock(&connection).await;

	let attempt = tokio::time::timeout(Duration::from_millis(10), connection.dispose()).await;
	assert!(attempt.is_err());
	assert!(connection.is_open());

	release.send(()).unwrap();
	holder.await.unwrap().unwrap();
	connection.dispose().await.unwrap();

	assert!(session.is_closed());
	assert!(cache.is_empty());
}
