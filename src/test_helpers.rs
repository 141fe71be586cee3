//! Shared fixtures for unit tests: a scripted executor, a log capture and a
//! small pets/owners/toys schema.

use crate::config::Settings;
use crate::db::Db;
use crate::executor::{EngineError, Executor};
use crate::record::{Record, Relation};
use crate::row::{FromRow, Row};
use crate::statement::{NestedPreload, Statement};
use sea_query::Value;
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::Layer;

/// A statement as the executor received it
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub sql: String,
    pub values: Vec<Value>,
}

enum Response {
    Rows(Vec<Row>),
    Affected(u64),
    Fail(EngineError),
}

#[derive(Default)]
struct MockState {
    calls: Vec<Call>,
    responses: VecDeque<Response>,
    /// Failures for the next COMMIT/ROLLBACK calls
    finish_errors: VecDeque<EngineError>,
}

/// Executor that records every call and replays queued responses in order.
///
/// With nothing queued, queries return no rows and statements affect none.
/// `begin` hands out a transaction mock sharing the same call log and queue.
/// BEGIN, COMMIT and ROLLBACK are logged but never consume queued responses;
/// `push_finish_error` scripts a failing COMMIT or ROLLBACK.
#[derive(Clone, Default)]
pub struct MockExecutor {
    state: Arc<Mutex<MockState>>,
    delay: Duration,
    /// `Some(finished)` when this executor is a transaction
    tx: Option<Arc<Mutex<bool>>>,
}

impl MockExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long inside every call
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn push_rows(&self, rows: Vec<Row>) {
        self.push(Response::Rows(rows));
    }

    pub fn push_affected(&self, n: u64) {
        self.push(Response::Affected(n));
    }

    pub fn push_error(&self, err: EngineError) {
        self.push(Response::Fail(err));
    }

    /// Fail the next COMMIT or ROLLBACK of a live transaction
    pub fn push_finish_error(&self, err: EngineError) {
        self.state.lock().unwrap().finish_errors.push_back(err);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn statement(&self) -> Statement {
        Statement::new(Arc::new(self.clone()), Arc::new(Settings::default()))
    }

    pub fn db(&self) -> Db {
        Db::with_executor(Arc::new(self.clone()), Settings::default())
    }

    fn push(&self, response: Response) {
        self.state.lock().unwrap().responses.push_back(response);
    }

    fn record(&self, sql: &str, values: &[Value]) -> Option<Response> {
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call {
            sql: sql.to_string(),
            values: values.to_vec(),
        });
        state.responses.pop_front()
    }

    /// Log a transaction control statement; returns its scripted failure
    fn record_control(&self, sql: &str) -> Option<EngineError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call {
            sql: sql.to_string(),
            values: Vec::new(),
        });
        if sql == "BEGIN" {
            None
        } else {
            state.finish_errors.pop_front()
        }
    }

    fn finish(&self, sql: &str) -> Result<(), EngineError> {
        let Some(done) = &self.tx else {
            return Err(EngineError::InvalidTransaction);
        };
        {
            let mut done = done.lock().unwrap();
            if *done {
                return Err(EngineError::TransactionDone);
            }
            *done = true;
        }
        match self.record_control(sql) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl Executor for MockExecutor {
    fn execute(&self, sql: &str, values: &[Value]) -> Result<u64, EngineError> {
        match self.record(sql, values) {
            Some(Response::Affected(n)) => Ok(n),
            Some(Response::Rows(rows)) => Ok(rows.len() as u64),
            Some(Response::Fail(err)) => Err(err),
            None => Ok(0),
        }
    }

    fn query(&self, sql: &str, values: &[Value]) -> Result<Vec<Row>, EngineError> {
        match self.record(sql, values) {
            Some(Response::Rows(rows)) => Ok(rows),
            Some(Response::Affected(_)) | None => Ok(Vec::new()),
            Some(Response::Fail(err)) => Err(err),
        }
    }

    fn begin(&self) -> Result<Arc<dyn Executor>, EngineError> {
        if self.tx.is_some() {
            return Err(EngineError::InvalidTransaction);
        }
        self.record_control("BEGIN");
        Ok(Arc::new(MockExecutor {
            state: Arc::clone(&self.state),
            delay: self.delay,
            tx: Some(Arc::new(Mutex::new(false))),
        }))
    }

    fn commit(&self) -> Result<(), EngineError> {
        self.finish("COMMIT")
    }

    fn rollback(&self) -> Result<(), EngineError> {
        self.finish("ROLLBACK")
    }
}

/// One `tracing` event with its fields rendered to strings
#[derive(Debug, Clone)]
pub struct CapturedEvent {
    pub level: Level,
    pub message: String,
    pub fields: Vec<(String, String)>,
}

impl CapturedEvent {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
}

struct EventVisitor<'a>(&'a mut CapturedEvent);

impl Visit for EventVisitor<'_> {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.0.message = value.to_string();
        } else {
            self.0.fields.push((field.name().to_string(), value.to_string()));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        let rendered = format!("{value:?}");
        if field.name() == "message" {
            self.0.message = rendered;
        } else {
            self.0.fields.push((field.name().to_string(), rendered));
        }
    }
}

struct CaptureLayer(Arc<Mutex<Vec<CapturedEvent>>>);

impl<S: Subscriber> Layer<S> for CaptureLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut captured = CapturedEvent {
            level: *event.metadata().level(),
            message: String::new(),
            fields: Vec::new(),
        };
        event.record(&mut EventVisitor(&mut captured));
        self.0.lock().unwrap().push(captured);
    }
}

/// Run `f` with a subscriber that records every event emitted on this thread
pub fn capture_logs<R>(f: impl FnOnce() -> R) -> (R, Vec<CapturedEvent>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let subscriber = tracing_subscriber::registry().with(CaptureLayer(Arc::clone(&events)));
    let result = tracing::subscriber::with_default(subscriber, f);
    let captured = events.lock().unwrap().clone();
    (result, captured)
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Owner {
    pub id: i64,
    pub name: String,
    pub pets: Vec<Pet>,
}

impl Owner {
    pub fn new(id: i64, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            pets: Vec::new(),
        }
    }
}

impl FromRow for Owner {
    fn from_row(row: &Row) -> Result<Self, EngineError> {
        Ok(Self {
            id: row.get("id")?,
            name: row.get("name")?,
            pets: Vec::new(),
        })
    }
}

impl Record for Owner {
    const TABLE: &'static str = "owners";

    fn values(&self) -> Vec<(&'static str, Value)> {
        vec![("id", self.id.into()), ("name", self.name.clone().into())]
    }

    fn relations() -> Vec<Relation> {
        vec![Relation::has_many("Pets", "pets", "owner_id")]
    }

    fn attach(&mut self, relation: &str, rows: &[Row]) -> Result<(), EngineError> {
        match relation {
            "Pets" => {
                self.pets = rows.iter().map(Pet::from_row).collect::<Result<_, _>>()?;
                Ok(())
            }
            other => Err(EngineError::UnknownRelation(other.to_string())),
        }
    }

    fn preload_nested(
        owners: &mut [&mut Self],
        relation: &str,
        nested: &NestedPreload<'_>,
    ) -> Result<(), EngineError> {
        match relation {
            "Pets" => {
                let mut pets: Vec<&mut Pet> = owners.iter_mut().flat_map(|o| o.pets.iter_mut()).collect();
                nested.load(&mut pets)
            }
            other => Err(EngineError::UnknownRelation(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Pet {
    pub id: i64,
    pub name: String,
    pub status: String,
    pub owner_id: Option<i64>,
    pub owner: Option<Owner>,
    pub toys: Vec<Toy>,
}

impl Pet {
    pub fn new(id: i64, name: &str, status: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            status: status.to_string(),
            ..Self::default()
        }
    }

    pub fn with_owner(id: i64, name: &str, owner_id: i64) -> Self {
        Self {
            owner_id: Some(owner_id),
            ..Self::new(id, name, "active")
        }
    }
}

impl FromRow for Pet {
    fn from_row(row: &Row) -> Result<Self, EngineError> {
        Ok(Self {
            id: row.get("id")?,
            name: row.get("name")?,
            status: row.get("status")?,
            owner_id: row.get("owner_id")?,
            owner: None,
            toys: Vec::new(),
        })
    }
}

impl Record for Pet {
    const TABLE: &'static str = "pets";

    fn values(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("id", self.id.into()),
            ("name", self.name.clone().into()),
            ("status", self.status.clone().into()),
            ("owner_id", self.owner_id.into()),
        ]
    }

    fn relations() -> Vec<Relation> {
        vec![
            Relation::belongs_to("Owner", "owners", "owner_id"),
            Relation::has_many("Toys", "toys", "pet_id").soft_delete("deleted_at"),
        ]
    }

    fn attach(&mut self, relation: &str, rows: &[Row]) -> Result<(), EngineError> {
        match relation {
            "Owner" => {
                self.owner = rows.first().map(Owner::from_row).transpose()?;
                Ok(())
            }
            "Toys" => {
                self.toys = rows.iter().map(Toy::from_row).collect::<Result<_, _>>()?;
                Ok(())
            }
            other => Err(EngineError::UnknownRelation(other.to_string())),
        }
    }
}

/// Soft-deleted through `deleted_at`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Toy {
    pub id: i64,
    pub pet_id: i64,
    pub name: String,
}

impl Toy {
    pub fn new(id: i64, pet_id: i64, name: &str) -> Self {
        Self {
            id,
            pet_id,
            name: name.to_string(),
        }
    }
}

impl FromRow for Toy {
    fn from_row(row: &Row) -> Result<Self, EngineError> {
        Ok(Self {
            id: row.get("id")?,
            pet_id: row.get("pet_id")?,
            name: row.get("name")?,
        })
    }
}

impl Record for Toy {
    const TABLE: &'static str = "toys";
    const SOFT_DELETE: Option<&'static str> = Some("deleted_at");

    fn values(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("id", self.id.into()),
            ("pet_id", self.pet_id.into()),
            ("name", self.name.clone().into()),
        ]
    }
}

/// Composite primary key
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Follow {
    pub follower_id: i64,
    pub followee_id: i64,
}

impl FromRow for Follow {
    fn from_row(row: &Row) -> Result<Self, EngineError> {
        Ok(Self {
            follower_id: row.get("follower_id")?,
            followee_id: row.get("followee_id")?,
        })
    }
}

impl Record for Follow {
    const TABLE: &'static str = "follows";
    const PRIMARY_KEY: &'static [&'static str] = &["follower_id", "followee_id"];

    fn values(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("follower_id", self.follower_id.into()),
            ("followee_id", self.followee_id.into()),
        ]
    }
}

pub fn owner_row(id: i64, name: &str) -> Row {
    Row::from_pairs([("id", Value::from(id)), ("name", Value::from(name))])
}

pub fn toy_row(id: i64, pet_id: i64, name: &str) -> Row {
    Row::from_pairs([
        ("id", Value::from(id)),
        ("pet_id", Value::from(pet_id)),
        ("name", Value::from(name)),
    ])
}

pub fn pet_row(id: i64, name: &str, status: &str, owner_id: Option<i64>) -> Row {
    Row::from_pairs([
        ("id", Value::from(id)),
        ("name", Value::from(name)),
        ("status", Value::from(status)),
        ("owner_id", Value::from(owner_id)),
    ])
}
