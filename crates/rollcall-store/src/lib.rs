//! rollcall-store — SQLite persistence for students and attendance.
//!
//! Two tables: `students` (one row per dataset folder) and `attendance`
//! (append-only scan log). Every operation opens its own connection and each
//! statement runs in its own implicit transaction.

use chrono::{Local, NaiveDateTime};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M:%S";

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS students (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        folder_name TEXT UNIQUE NOT NULL,
        matric_no TEXT,
        name TEXT
    );
    CREATE TABLE IF NOT EXISTS attendance (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        student_id INTEGER NOT NULL REFERENCES students(id),
        course TEXT,
        date TEXT NOT NULL,
        time_in TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_attendance_date ON attendance(date);
";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Student {
    pub id: i64,
    pub folder_name: String,
    pub matric_no: Option<String>,
    pub name: Option<String>,
}

impl Student {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            folder_name: row.get(1)?,
            matric_no: row.get(2)?,
            name: row.get(3)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttendanceRecord {
    pub id: i64,
    pub student_id: i64,
    pub course: Option<String>,
    /// `YYYY-MM-DD`, local time.
    pub date: String,
    /// `HH:MM:SS`, local time.
    pub time_in: String,
}

/// One attendance row joined with the student's identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportRow {
    pub attendance_id: i64,
    pub folder_name: String,
    pub matric_no: Option<String>,
    pub name: Option<String>,
    pub course: Option<String>,
    pub date: String,
    pub time_in: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AddStudentOutcome {
    Added { student: Student },
    /// The folder key is already registered; nothing was written.
    Duplicate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LogOutcome {
    Logged { record: AttendanceRecord },
    /// No student row has this folder key; nothing was written.
    StudentNotFound,
}

impl LogOutcome {
    pub fn is_logged(&self) -> bool {
        matches!(self, LogOutcome::Logged { .. })
    }
}

/// Optional exact-match filters for [`AttendanceStore::report`].
///
/// Empty strings are treated as "no filter".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportFilter {
    pub course: Option<String>,
    pub date: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StoreCounts {
    pub students: u64,
    pub attendance: u64,
}

/// Handle to the attendance database file.
#[derive(Debug, Clone)]
pub struct AttendanceStore {
    path: PathBuf,
}

impl AttendanceStore {
    /// Open (creating if needed) the database at `path` and ensure the schema exists.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let store = Self {
            path: path.to_path_buf(),
        };
        store.connect()?.execute_batch(SCHEMA)?;
        tracing::info!(path = %path.display(), "attendance database initialized");
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn connect(&self) -> Result<Connection, StoreError> {
        let conn = Connection::open(&self.path)?;
        conn.pragma_update(None, "foreign_keys", true)?;
        Ok(conn)
    }

    /// Register a student. A folder key that already exists is reported as
    /// [`AddStudentOutcome::Duplicate`], not as an error.
    pub fn add_student(
        &self,
        folder_name: &str,
        matric_no: Option<&str>,
        name: Option<&str>,
    ) -> Result<AddStudentOutcome, StoreError> {
        let conn = self.connect()?;
        let inserted = conn.execute(
            "INSERT INTO students (folder_name, matric_no, name) VALUES (?1, ?2, ?3)",
            params![folder_name, matric_no, name],
        );

        match inserted {
            Ok(_) => {
                let student = Student {
                    id: conn.last_insert_rowid(),
                    folder_name: folder_name.to_string(),
                    matric_no: matric_no.map(str::to_string),
                    name: name.map(str::to_string),
                };
                tracing::info!(folder = folder_name, id = student.id, "student registered");
                Ok(AddStudentOutcome::Added { student })
            }
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                tracing::info!(folder = folder_name, "student already registered");
                Ok(AddStudentOutcome::Duplicate)
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn student_by_folder(&self, folder_name: &str) -> Result<Option<Student>, StoreError> {
        let conn = self.connect()?;
        let student = conn
            .query_row(
                "SELECT id, folder_name, matric_no, name FROM students WHERE folder_name = ?1",
                params![folder_name],
                Student::from_row,
            )
            .optional()?;
        Ok(student)
    }

    pub fn list_students(&self) -> Result<Vec<Student>, StoreError> {
        let conn = self.connect()?;
        let mut stmt =
            conn.prepare("SELECT id, folder_name, matric_no, name FROM students ORDER BY folder_name")?;
        let students = stmt
            .query_map([], Student::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(students)
    }

    /// Record attendance for `folder_name` at the current local time.
    ///
    /// No duplicate suppression: every call that finds the student adds a row.
    pub fn log_attendance(&self, folder_name: &str, course: Option<&str>) -> Result<LogOutcome, StoreError> {
        self.log_attendance_at(folder_name, course, Local::now().naive_local())
    }

    /// Record attendance for `folder_name` at an explicit timestamp.
    pub fn log_attendance_at(
        &self,
        folder_name: &str,
        course: Option<&str>,
        at: NaiveDateTime,
    ) -> Result<LogOutcome, StoreError> {
        let Some(student) = self.student_by_folder(folder_name)? else {
            tracing::warn!(folder = folder_name, "attendance for unregistered student");
            return Ok(LogOutcome::StudentNotFound);
        };

        let date = at.format(DATE_FORMAT).to_string();
        let time_in = at.format(TIME_FORMAT).to_string();

        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO attendance (student_id, course, date, time_in) VALUES (?1, ?2, ?3, ?4)",
            params![student.id, course, date, time_in],
        )?;

        let record = AttendanceRecord {
            id: conn.last_insert_rowid(),
            student_id: student.id,
            course: course.map(str::to_string),
            date,
            time_in,
        };
        tracing::info!(
            folder = folder_name,
            student_id = record.student_id,
            course = ?record.course,
            date = %record.date,
            time_in = %record.time_in,
            "attendance logged"
        );
        Ok(LogOutcome::Logged { record })
    }

    /// Attendance joined with student identity, filtered by exact course and/or date.
    pub fn report(&self, filter: &ReportFilter) -> Result<Vec<ReportRow>, StoreError> {
        let mut sql = String::from(
            "SELECT a.id, s.folder_name, s.matric_no, s.name, a.course, a.date, a.time_in
             FROM attendance a
             JOIN students s ON a.student_id = s.id",
        );
        let mut conds: Vec<&str> = Vec::new();
        let mut args: Vec<&str> = Vec::new();
        if let Some(course) = filter.course.as_deref().filter(|c| !c.is_empty()) {
            conds.push("a.course = ?");
            args.push(course);
        }
        if let Some(date) = filter.date.as_deref().filter(|d| !d.is_empty()) {
            conds.push("a.date = ?");
            args.push(date);
        }
        if !conds.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conds.join(" AND "));
        }
        sql.push_str(" ORDER BY a.id");

        let conn = self.connect()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(args), |row| {
                Ok(ReportRow {
                    attendance_id: row.get(0)?,
                    folder_name: row.get(1)?,
                    matric_no: row.get(2)?,
                    name: row.get(3)?,
                    course: row.get(4)?,
                    date: row.get(5)?,
                    time_in: row.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn counts(&self) -> Result<StoreCounts, StoreError> {
        let conn = self.connect()?;
        let students: i64 = conn.query_row("SELECT COUNT(*) FROM students", [], |r| r.get(0))?;
        let attendance: i64 = conn.query_row("SELECT COUNT(*) FROM attendance", [], |r| r.get(0))?;
        Ok(StoreCounts {
            students: students as u64,
            attendance: attendance as u64,
        })
    }
}
