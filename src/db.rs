use rusqlite::Connection;
use std::path::Path;

pub const DB_FILE: &str = "schooldesk.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS personnel(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            position TEXT NOT NULL,
            role TEXT NOT NULL DEFAULT 'teacher',
            active INTEGER NOT NULL DEFAULT 1,
            updated_at TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            student_no TEXT,
            name TEXT NOT NULL,
            class_level TEXT,
            class_room TEXT,
            guardian_name TEXT,
            guardian_phone TEXT,
            address TEXT,
            lat REAL,
            lng REAL,
            active INTEGER NOT NULL DEFAULT 1,
            updated_at TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_class ON students(class_level, class_room)",
        [],
    )?;

    // Document ids are millisecond timestamps assigned at creation, so id
    // ordering doubles as recency ordering for registers, inbox and tasks.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS documents(
            id INTEGER PRIMARY KEY,
            doc_type TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'proposed',
            doc_no TEXT,
            title TEXT NOT NULL,
            from_party TEXT,
            to_party TEXT,
            doc_date TEXT,
            file_url TEXT,
            assigned_to TEXT,
            total_pages INTEGER NOT NULL DEFAULT 1,
            signatory_page INTEGER NOT NULL DEFAULT 1,
            stamp_scale REAL NOT NULL DEFAULT 1.0,
            show_stamp INTEGER NOT NULL DEFAULT 0,
            created_at TEXT,
            FOREIGN KEY(assigned_to) REFERENCES personnel(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_documents_type ON documents(doc_type)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_documents_status ON documents(status)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_documents_assigned ON documents(assigned_to)",
        [],
    )?;

    // Append-only signing log. Rows are inserted by documents.sign and never
    // updated or deleted while the parent document exists.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS endorsements(
            document_id INTEGER NOT NULL,
            seq INTEGER NOT NULL,
            signature TEXT NOT NULL,
            comment TEXT NOT NULL DEFAULT '',
            signer_id TEXT NOT NULL,
            signer_name TEXT NOT NULL,
            signer_position TEXT NOT NULL,
            signed_at TEXT NOT NULL,
            pos_x REAL NOT NULL,
            pos_y REAL NOT NULL,
            scale REAL NOT NULL,
            assigned_name TEXT,
            PRIMARY KEY(document_id, seq),
            FOREIGN KEY(document_id) REFERENCES documents(id)
        )",
        [],
    )?;

    // Monotone recipient set; INSERT OR IGNORE keeps it duplicate-free.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS document_recipients(
            document_id INTEGER NOT NULL,
            personnel_id TEXT NOT NULL,
            PRIMARY KEY(document_id, personnel_id),
            FOREIGN KEY(document_id) REFERENCES documents(id),
            FOREIGN KEY(personnel_id) REFERENCES personnel(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_document_recipients_person
         ON document_recipients(personnel_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance_days(
            attendance_date TEXT NOT NULL,
            student_id TEXT NOT NULL,
            code TEXT NOT NULL,
            PRIMARY KEY(attendance_date, student_id),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_days_student
         ON attendance_days(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS home_visits(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            visit_date TEXT NOT NULL,
            visitor_id TEXT,
            notes TEXT NOT NULL DEFAULT '',
            photo_urls TEXT NOT NULL DEFAULT '[]',
            lat REAL,
            lng REAL,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(visitor_id) REFERENCES personnel(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_home_visits_student ON home_visits(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_home_visits_date ON home_visits(visit_date)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS reports(
            id TEXT PRIMARY KEY,
            report_date TEXT NOT NULL,
            category TEXT NOT NULL,
            detail TEXT NOT NULL DEFAULT '',
            reporter_id TEXT,
            created_at TEXT,
            FOREIGN KEY(reporter_id) REFERENCES personnel(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_reports_date ON reports(report_date)",
        [],
    )?;

    // Existing workspaces predating the role column get it added and
    // backfilled from the old director flag.
    ensure_personnel_role(&conn)?;

    Ok(conn)
}

fn ensure_personnel_role(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "personnel", "role")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE personnel ADD COLUMN role TEXT NOT NULL DEFAULT 'teacher'",
        [],
    )?;
    if table_has_column(conn, "personnel", "is_director")? {
        conn.execute(
            "UPDATE personnel SET role = 'director' WHERE is_director = 1",
            [],
        )?;
    }
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
