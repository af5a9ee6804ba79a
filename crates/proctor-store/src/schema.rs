/// SQL DDL for the proctor-store database.
/// WAL mode + foreign keys enabled at connection time.
pub const SCHEMA_VERSION: u32 = 1;

pub const CREATE_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    student_id TEXT UNIQUE,
    name TEXT NOT NULL,
    role TEXT NOT NULL CHECK (role IN ('STUDENT', 'ADMIN')),
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS exams (
    id TEXT PRIMARY KEY,
    exam_code TEXT NOT NULL UNIQUE,
    title TEXT NOT NULL,
    duration_minutes INTEGER NOT NULL CHECK (duration_minutes > 0),
    max_violations INTEGER NOT NULL DEFAULT 3 CHECK (max_violations > 0),
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS sessions (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL REFERENCES users(id),
    exam_id TEXT NOT NULL REFERENCES exams(id),
    status TEXT NOT NULL DEFAULT 'ACTIVE'
        CHECK (status IN ('ACTIVE', 'DISCONNECTED', 'SUBMITTED', 'DISQUALIFIED', 'EXPIRED')),
    violation_count INTEGER NOT NULL DEFAULT 0 CHECK (violation_count >= 0),
    max_violations INTEGER NOT NULL CHECK (max_violations > 0),
    time_remaining_seconds INTEGER NOT NULL CHECK (time_remaining_seconds >= 0),
    start_time TEXT NOT NULL,
    end_time TEXT,
    client_address TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS violations (
    id TEXT PRIMARY KEY,
    session_id TEXT NOT NULL REFERENCES sessions(id),
    event_type TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    metadata TEXT,
    timestamp TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS answers (
    session_id TEXT NOT NULL REFERENCES sessions(id),
    question_id TEXT NOT NULL,
    selected_answer TEXT,
    saved_at TEXT NOT NULL,
    UNIQUE (session_id, question_id)
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_sessions_open_user_exam
    ON sessions(user_id, exam_id) WHERE status IN ('ACTIVE', 'DISCONNECTED');
CREATE INDEX IF NOT EXISTS idx_sessions_status ON sessions(status);
CREATE INDEX IF NOT EXISTS idx_violations_session ON violations(session_id);
CREATE INDEX IF NOT EXISTS idx_violations_timestamp ON violations(timestamp);
CREATE INDEX IF NOT EXISTS idx_answers_session ON answers(session_id);

CREATE TRIGGER IF NOT EXISTS trg_sessions_terminal_absorbing
BEFORE UPDATE OF status ON sessions
WHEN OLD.status IN ('SUBMITTED', 'DISQUALIFIED', 'EXPIRED') AND NEW.status <> OLD.status
BEGIN
    SELECT RAISE(ABORT, 'terminal session status is final');
END;

CREATE TRIGGER IF NOT EXISTS trg_sessions_violation_count_monotonic
BEFORE UPDATE OF violation_count ON sessions
WHEN NEW.violation_count < OLD.violation_count
BEGIN
    SELECT RAISE(ABORT, 'violation_count cannot decrease');
END;

CREATE TRIGGER IF NOT EXISTS trg_violations_immutable
BEFORE UPDATE ON violations
BEGIN
    SELECT RAISE(ABORT, 'violations are append-only');
END;

CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER NOT NULL
);
"#;
