//! In-memory stand-in for the warehouse that understands the statements the
//! books repository issues.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::Value;
use tower::ServiceExt;

use shelf_app::modules::books::repository::{
    DELETE_BOOK, GET_BOOK, INSERT_BOOK, LIST_BOOKS, NEXT_BOOK_ID, UPDATE_BOOK,
};
use shelf_db::{Connection, Connector, DbError, Param, QueryResult, Row};
use shelf_kernel::settings::Settings;

#[derive(Default)]
pub struct Table {
    pub rows: BTreeMap<i64, (String, String, i32)>,
    pub next_id: i64,
}

#[derive(Default)]
pub struct Warehouse {
    pub table: Mutex<Table>,
    pub opened: AtomicUsize,
    pub live: AtomicI64,
    pub refuse_connections: AtomicBool,
    pub fail_statements: AtomicBool,
    pub drop_inserts: AtomicBool,
}

impl Warehouse {
    pub fn seed(&self, id: i64, title: &str, author: &str, year: i32) {
        let mut table = self.table.lock().unwrap();
        table
            .rows
            .insert(id, (title.to_string(), author.to_string(), year));
        table.next_id = table.next_id.max(id);
    }

    pub fn live_sessions(&self) -> i64 {
        self.live.load(Ordering::SeqCst)
    }
}

pub struct MemoryConnector(pub Arc<Warehouse>);

struct MemoryConnection {
    warehouse: Arc<Warehouse>,
    open: bool,
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self) -> Result<Box<dyn Connection>, DbError> {
        if self.0.refuse_connections.load(Ordering::SeqCst) {
            return Err(DbError::Login {
                code: "390100".into(),
                message: "Incorrect username or password was specified.".into(),
            });
        }
        self.0.opened.fetch_add(1, Ordering::SeqCst);
        self.0.live.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryConnection {
            warehouse: Arc::clone(&self.0),
            open: true,
        }))
    }
}

fn int(params: &[Param], idx: usize) -> i64 {
    match &params[idx] {
        Param::Int(value) => *value,
        other => panic!("expected integer parameter at {idx}, got {other:?}"),
    }
}

fn text(params: &[Param], idx: usize) -> String {
    match &params[idx] {
        Param::Text(value) => value.clone(),
        other => panic!("expected text parameter at {idx}, got {other:?}"),
    }
}

fn book_row(id: i64, (title, author, year): &(String, String, i32)) -> Row {
    Row(vec![
        Some(id.to_string()),
        Some(title.clone()),
        Some(author.clone()),
        Some(year.to_string()),
    ])
}

fn rows(rows: Vec<Row>) -> QueryResult {
    QueryResult {
        columns: vec!["ID".into(), "TITLE".into(), "AUTHOR".into(), "YEAR".into()],
        rows,
        rows_affected: 0,
    }
}

fn affected(count: u64) -> QueryResult {
    QueryResult {
        rows_affected: count,
        ..Default::default()
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn query(&mut self, sql: &str, params: &[Param]) -> Result<QueryResult, DbError> {
        if !self.open {
            return Err(DbError::Closed);
        }
        if self.warehouse.fail_statements.load(Ordering::SeqCst) {
            return Err(DbError::Query {
                code: "000603".into(),
                message: "SQL execution internal error".into(),
            });
        }

        // Give concurrent requests a chance to interleave between statements.
        tokio::task::yield_now().await;

        let mut table = self.warehouse.table.lock().unwrap();
        let result = match sql {
            LIST_BOOKS => rows(
                table
                    .rows
                    .iter()
                    .map(|(id, fields)| book_row(*id, fields))
                    .collect(),
            ),
            GET_BOOK => {
                let id = int(params, 0);
                rows(table.rows.get(&id).map(|f| book_row(id, f)).into_iter().collect())
            }
            NEXT_BOOK_ID => {
                table.next_id += 1;
                QueryResult {
                    columns: vec!["NEXTVAL".into()],
                    rows: vec![Row(vec![Some(table.next_id.to_string())])],
                    rows_affected: 0,
                }
            }
            INSERT_BOOK => {
                if !self.warehouse.drop_inserts.load(Ordering::SeqCst) {
                    let id = int(params, 0);
                    table.rows.insert(
                        id,
                        (text(params, 1), text(params, 2), int(params, 3) as i32),
                    );
                }
                affected(1)
            }
            UPDATE_BOOK => {
                let id = int(params, 3);
                match table.rows.get_mut(&id) {
                    Some(fields) => {
                        *fields = (text(params, 0), text(params, 1), int(params, 2) as i32);
                        affected(1)
                    }
                    None => affected(0),
                }
            }
            DELETE_BOOK => affected(table.rows.remove(&int(params, 0)).map_or(0, |_| 1)),
            other => {
                return Err(DbError::Query {
                    code: "002003".into(),
                    message: format!("unknown statement: {other}"),
                })
            }
        };
        Ok(result)
    }

    async fn close(&mut self) -> Result<(), DbError> {
        if std::mem::take(&mut self.open) {
            self.warehouse.live.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

pub fn app(warehouse: &Arc<Warehouse>) -> Router {
    let registry =
        shelf_app::build_registry(Arc::new(MemoryConnector(Arc::clone(warehouse)))).unwrap();
    shelf_http::build_router(&registry, &Settings::default())
}

pub async fn send(app: &Router, method: &str, uri: &str, body: Option<&str>) -> (StatusCode, Value) {
    let mut request = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(json) => {
            request = request.header("content-type", "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };

    let response = app
        .clone()
        .oneshot(request.body(body).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}
