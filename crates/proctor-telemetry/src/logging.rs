use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use serde_json::{Map, Value};
use tracing::field::{Field, Visit};
use tracing::{span, Level};
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

use crate::AUDIT_TARGET;

const LOG_SCHEMA: &str = "
    PRAGMA journal_mode = WAL;
    PRAGMA synchronous = NORMAL;
    CREATE TABLE IF NOT EXISTS logs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        timestamp TEXT NOT NULL,
        level TEXT NOT NULL,
        target TEXT NOT NULL,
        message TEXT NOT NULL,
        fields TEXT,
        session_id TEXT,
        conn_id TEXT,
        audit INTEGER NOT NULL DEFAULT 0
    );
    CREATE INDEX IF NOT EXISTS idx_logs_session ON logs(session_id);
    CREATE INDEX IF NOT EXISTS idx_logs_audit ON logs(audit, timestamp);
";

/// Append-only SQLite table of warnings, errors and audit records.
pub struct SqliteLogSink {
    conn: Mutex<Connection>,
}

impl SqliteLogSink {
    pub fn new(db_path: &Path) -> Result<Self, rusqlite::Error> {
        let conn = Connection::open(db_path)?;
        conn.execute_batch(LOG_SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Logging must never fail the caller, so write errors are dropped.
    fn append(&self, entry: &Entry) {
        let _ = self.conn.lock().execute(
            "INSERT INTO logs (timestamp, level, target, message, fields, session_id, conn_id, audit)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                Utc::now().to_rfc3339(),
                entry.level.as_str(),
                entry.target,
                entry.message,
                entry.fields,
                entry.ids.session_id,
                entry.ids.conn_id,
                entry.audit,
            ],
        );
    }
}

struct Entry<'a> {
    level: Level,
    target: &'a str,
    message: String,
    fields: Option<String>,
    ids: Correlation,
    audit: bool,
}

/// Session and connection ids carried by an event or one of its spans.
#[derive(Clone, Default)]
struct Correlation {
    session_id: Option<String>,
    conn_id: Option<String>,
}

impl Correlation {
    fn is_complete(&self) -> bool {
        self.session_id.is_some() && self.conn_id.is_some()
    }

    fn fill_from(&mut self, other: &Correlation) {
        if self.session_id.is_none() {
            self.session_id.clone_from(&other.session_id);
        }
        if self.conn_id.is_none() {
            self.conn_id.clone_from(&other.conn_id);
        }
    }
}

#[derive(Default)]
struct Collector {
    message: Option<String>,
    ids: Correlation,
    fields: Map<String, Value>,
}

impl Collector {
    fn put(&mut self, field: &Field, text: Option<String>, value: Value) {
        match (field.name(), text) {
            ("message", Some(t)) => self.message = Some(t),
            ("session_id", Some(t)) => self.ids.session_id = Some(t),
            ("conn_id", Some(t)) => self.ids.conn_id = Some(t),
            (name, _) => {
                self.fields.insert(name.to_owned(), value);
            }
        }
    }
}

impl Visit for Collector {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.put(field, Some(value.to_owned()), Value::from(value));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        // Display-formatted ids (`%id`) arrive here without quotes.
        let text = format!("{value:?}").trim_matches('"').to_owned();
        self.put(field, Some(text.clone()), Value::String(text));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.put(field, None, Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.put(field, None, Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.put(field, None, Value::from(value));
    }
}

/// Persists WARN and above, plus everything on [`AUDIT_TARGET`] regardless
/// of level.
pub struct SqliteLogLayer {
    sink: Arc<SqliteLogSink>,
}

impl SqliteLogLayer {
    pub fn new(sink: Arc<SqliteLogSink>) -> Self {
        Self { sink }
    }
}

impl<S> Layer<S> for SqliteLogLayer
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &span::Attributes<'_>, id: &span::Id, ctx: Context<'_, S>) {
        let mut collector = Collector::default();
        attrs.record(&mut collector);
        if collector.ids.session_id.is_none() && collector.ids.conn_id.is_none() {
            return;
        }
        if let Some(span) = ctx.span(id) {
            span.extensions_mut().insert(collector.ids);
        }
    }

    fn on_event(&self, event: &tracing::Event<'_>, ctx: Context<'_, S>) {
        let meta = event.metadata();
        let audit = meta.target() == AUDIT_TARGET;
        if !audit && *meta.level() > Level::WARN {
            return;
        }

        let mut collector = Collector::default();
        event.record(&mut collector);

        if let Some(scope) = ctx.event_scope(event) {
            for span in scope {
                if collector.ids.is_complete() {
                    break;
                }
                if let Some(ids) = span.extensions().get::<Correlation>() {
                    collector.ids.fill_from(ids);
                }
            }
        }

        let fields = (!collector.fields.is_empty())
            .then(|| Value::Object(collector.fields).to_string());
        self.sink.append(&Entry {
            level: *meta.level(),
            target: meta.target(),
            message: collector.message.unwrap_or_default(),
            fields,
            ids: collector.ids,
            audit,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::layer::SubscriberExt;

    struct Row {
        level: String,
        message: String,
        fields: Option<String>,
        session_id: Option<String>,
        conn_id: Option<String>,
        audit: bool,
    }

    fn capture(emit: impl FnOnce()) -> Vec<Row> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs.db");
        let sink = Arc::new(SqliteLogSink::new(&path).unwrap());
        let subscriber = tracing_subscriber::registry().with(SqliteLogLayer::new(sink));
        tracing::subscriber::with_default(subscriber, emit);

        let conn = Connection::open(&path).unwrap();
        let mut stmt = conn
            .prepare("SELECT level, message, fields, session_id, conn_id, audit FROM logs ORDER BY id")
            .unwrap();
        let rows = stmt
            .query_map([], |r| {
                Ok(Row {
                    level: r.get(0)?,
                    message: r.get(1)?,
                    fields: r.get(2)?,
                    session_id: r.get(3)?,
                    conn_id: r.get(4)?,
                    audit: r.get(5)?,
                })
            })
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        rows
    }

    #[test]
    fn keeps_warnings_and_audit_records_only() {
        let rows = capture(|| {
            tracing::info!("routine");
            tracing::debug!("chatty");
            tracing::warn!(session_id = "sess_1", "store slow");
            tracing::info!(target: AUDIT_TARGET, conn_id = "conn_9", event = "admin:disqualify", "unauthorized command dropped");
        });

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].level, "WARN");
        assert_eq!(rows[0].session_id.as_deref(), Some("sess_1"));
        assert!(!rows[0].audit);

        assert!(rows[1].audit);
        assert_eq!(rows[1].level, "INFO");
        assert_eq!(rows[1].conn_id.as_deref(), Some("conn_9"));
        assert_eq!(rows[1].message, "unauthorized command dropped");
        assert!(rows[1].fields.as_deref().unwrap().contains("admin:disqualify"));
    }

    #[test]
    fn events_inherit_ids_from_enclosing_spans() {
        let rows = capture(|| {
            let outer = tracing::info_span!("connection", conn_id = "conn_1");
            let _o = outer.enter();
            let inner = tracing::info_span!("frame", session_id = "sess_7");
            let _i = inner.enter();
            tracing::error!(count = 3u64, "send queue closed");
        });

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].level, "ERROR");
        assert_eq!(rows[0].session_id.as_deref(), Some("sess_7"));
        assert_eq!(rows[0].conn_id.as_deref(), Some("conn_1"));
        assert_eq!(rows[0].fields.as_deref(), Some(r#"{"count":3}"#));
    }

    #[test]
    fn event_ids_take_precedence_over_span_ids() {
        let rows = capture(|| {
            let span = tracing::info_span!("connection", session_id = "sess_span");
            let _e = span.enter();
            tracing::warn!(session_id = "sess_event", "heartbeat rejected");
        });
        assert_eq!(rows[0].session_id.as_deref(), Some("sess_event"));
    }
}
