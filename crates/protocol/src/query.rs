//! Query and answer payloads carried between commands and sessions.
//!
//! The connection layer never looks inside these values; it only moves them
//! from the command that produced them to the session that runs them and back.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Shape of the answer a query produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryForm {
	/// Variable bindings (`select`).
	Select,
	/// A single boolean (`ask`).
	Ask,
	/// A set of statements (`construct`).
	Construct,
}

/// A compiled query, opaque to this layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
	pub form: QueryForm,
	pub text: String,
}

impl Query {
	pub fn select(text: impl Into<String>) -> Self {
		Self {
			form: QueryForm::Select,
			text: text.into(),
		}
	}

	pub fn ask(text: impl Into<String>) -> Self {
		Self {
			form: QueryForm::Ask,
			text: text.into(),
		}
	}

	pub fn construct(text: impl Into<String>) -> Self {
		Self {
			form: QueryForm::Construct,
			text: text.into(),
		}
	}
}

/// A single RDF statement in lexical form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Triple {
	pub subject: String,
	pub predicate: String,
	pub object: String,
}

/// Variable bindings returned by a `select` query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tuples {
	pub variables: Vec<String>,
	pub rows: Vec<Vec<String>>,
}

impl Tuples {
	pub fn len(&self) -> usize {
		self.rows.len()
	}

	pub fn is_empty(&self) -> bool {
		self.rows.is_empty()
	}
}

/// Answer produced by a session query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum Answer {
	Tuples(Tuples),
	Boolean(bool),
	Graph(Vec<Triple>),
}

/// Raw result of executing a command against a connection.
///
/// Callers match on the variant that corresponds to the command kind they
/// issued: status commands yield [`Outcome::Message`], updates and loads yield
/// [`Outcome::Count`], queries yield [`Outcome::Answer`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum Outcome {
	Message(String),
	Count(u64),
	Answer(Answer),
}

impl Outcome {
	pub fn as_message(&self) -> Option<&str> {
		match self {
			Outcome::Message(message) => Some(message),
			_ => None,
		}
	}

	pub fn as_count(&self) -> Option<u64> {
		match self {
			Outcome::Count(count) => Some(*count),
			_ => None,
		}
	}

	pub fn as_answer(&self) -> Option<&Answer> {
		match self {
			Outcome::Answer(answer) => Some(answer),
			_ => None,
		}
	}

	pub fn into_answer(self) -> Option<Answer> {
		match self {
			Outcome::Answer(answer) => Some(answer),
			_ => None,
		}
	}
}

/// Login details passed to a session.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
	pub user: String,
	pub password: String,
}

impl Credentials {
	pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
		Self {
			user: user.into(),
			password: password.into(),
		}
	}
}

impl fmt::Debug for Credentials {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Credentials")
			.field("user", &self.user)
			.field("password", &"<redacted>")
			.finish()
	}
}
