use anyhow::Context;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnection, SqlitePoolOptions, SqliteRow};
use sqlx::{migrate::MigrateDatabase, Row, Sqlite, SqlitePool};
use uuid::Uuid;

use crate::flows::BillingCode;
use crate::models::{Encounter, Note, Observation, Patient};

// Define the database schema using CREATE TABLE IF NOT EXISTS statements
const MIGRATIONS_SQL: &str = "
-- Patients Table
CREATE TABLE IF NOT EXISTS patients (
    id TEXT PRIMARY KEY NOT NULL, -- UUID
    name TEXT NOT NULL,
    date_of_birth TEXT,
    gender TEXT,
    medical_history TEXT NOT NULL DEFAULT ''
);

-- Observations Table
CREATE TABLE IF NOT EXISTS observations (
    id TEXT PRIMARY KEY NOT NULL, -- UUID
    patient_id TEXT NOT NULL,
    code TEXT NOT NULL,
    value TEXT NOT NULL,
    recorded_at INTEGER NOT NULL, -- Unix Timestamp (seconds)
    FOREIGN KEY (patient_id) REFERENCES patients(id) ON DELETE CASCADE
);
CREATE INDEX IF NOT EXISTS idx_observations_patient_id ON observations(patient_id);

-- Encounters Table
CREATE TABLE IF NOT EXISTS encounters (
    id TEXT PRIMARY KEY NOT NULL, -- UUID
    patient_id TEXT NOT NULL,
    transcript TEXT NOT NULL,
    created_at INTEGER NOT NULL, -- Unix Timestamp (seconds)
    FOREIGN KEY (patient_id) REFERENCES patients(id) ON DELETE CASCADE
);

-- Notes Table
CREATE TABLE IF NOT EXISTS notes (
    id TEXT PRIMARY KEY NOT NULL, -- UUID
    patient_id TEXT NOT NULL,
    encounter_id TEXT NOT NULL,
    soap_note TEXT NOT NULL,
    billing_codes TEXT NOT NULL, -- JSON array
    created_at INTEGER NOT NULL, -- Unix Timestamp (seconds)
    FOREIGN KEY (patient_id) REFERENCES patients(id) ON DELETE CASCADE,
    FOREIGN KEY (encounter_id) REFERENCES encounters(id) ON DELETE CASCADE
);
CREATE INDEX IF NOT EXISTS idx_notes_patient_id ON notes(patient_id);
";

/// SQLite-backed simulated EHR.
#[derive(Debug)]
pub struct StorageManager {
    pool: SqlitePool,
}

impl StorageManager {
    /// Connects to the database at `db_url`, creating it if needed, and runs migrations.
    pub async fn connect(db_url: &str) -> Result<Self, anyhow::Error> {
        log::info!("Connecting to database: {}", db_url);

        // Create the database file if it doesn't exist
        if !Sqlite::database_exists(db_url).await.unwrap_or(false) {
            log::info!("Database file not found, creating...");
            Sqlite::create_database(db_url).await.context("Failed to create database")?;
        }

        let pool = SqlitePoolOptions::new()
            .connect(db_url)
            .await
            .context("Failed to connect to SQLite database")?;

        Self::run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    /// A private in-memory database. A single connection keeps every query
    /// on the same memory instance.
    pub async fn in_memory() -> Result<Self, anyhow::Error> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .context("Failed to open in-memory SQLite database")?;
        Self::run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    /// Applies the database schema migrations.
    async fn run_migrations(pool: &SqlitePool) -> Result<(), anyhow::Error> {
        log::info!("Running database migrations...");
        sqlx::query(MIGRATIONS_SQL)
            .execute(pool)
            .await
            .context("Failed to run database migrations")?;
        log::info!("Database migrations completed.");
        Ok(())
    }

    // --- Patients ---

    pub async fn create_patient(&self, patient: &Patient) -> Result<(), anyhow::Error> {
        log::info!("Creating patient {}", patient.id);
        sqlx::query(
            r#"
            INSERT INTO patients (id, name, date_of_birth, gender, medical_history)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(patient.id.to_string())
        .bind(&patient.name)
        .bind(&patient.date_of_birth)
        .bind(&patient.gender)
        .bind(&patient.medical_history)
        .execute(&self.pool)
        .await
        .context("Failed to insert patient into database")?;
        Ok(())
    }

    /// Fetches all patients, ordered by name.
    pub async fn list_patients(&self) -> Result<Vec<Patient>, anyhow::Error> {
        log::debug!("Fetching all patients from database");
        let rows = sqlx::query(
            "SELECT id, name, date_of_birth, gender, medical_history FROM patients ORDER BY name ASC",
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch patients from database")?;

        let patients = rows
            .iter()
            .map(patient_from_row)
            .collect::<Result<Vec<Patient>, anyhow::Error>>()?;
        log::info!("Fetched {} patients", patients.len());
        Ok(patients)
    }

    pub async fn get_patient(&self, patient_id: Uuid) -> Result<Option<Patient>, anyhow::Error> {
        log::debug!("Fetching patient with ID: {}", patient_id);
        let row = sqlx::query(
            "SELECT id, name, date_of_birth, gender, medical_history FROM patients WHERE id = ?",
        )
        .bind(patient_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch patient from database")?;

        row.as_ref().map(patient_from_row).transpose()
    }

    /// Deletes a patient together with their observations, encounters and notes.
    pub async fn delete_patient(&self, patient_id: Uuid) -> Result<(), anyhow::Error> {
        log::warn!("Deleting patient with ID: {}", patient_id);
        let result = sqlx::query("DELETE FROM patients WHERE id = ?")
            .bind(patient_id.to_string())
            .execute(&self.pool)
            .await
            .context("Failed to delete patient from database")?;

        if result.rows_affected() == 0 {
            return Err(anyhow::anyhow!("Patient {} not found", patient_id));
        }
        Ok(())
    }

    // --- Observations ---

    pub async fn add_observation(&self, observation: &Observation) -> Result<(), anyhow::Error> {
        log::debug!("Saving observation {} for patient {}", observation.id, observation.patient_id);
        sqlx::query(
            r#"
            INSERT INTO observations (id, patient_id, code, value, recorded_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(observation.id.to_string())
        .bind(observation.patient_id.to_string())
        .bind(&observation.code)
        .bind(&observation.value)
        .bind(observation.recorded_at.timestamp())
        .execute(&self.pool)
        .await
        .context("Failed to insert observation into database")?;
        Ok(())
    }

    /// Observations for a patient, oldest first.
    pub async fn list_observations(&self, patient_id: Uuid) -> Result<Vec<Observation>, anyhow::Error> {
        let rows = sqlx::query(
            r#"
            SELECT id, patient_id, code, value, recorded_at
            FROM observations
            WHERE patient_id = ?
            ORDER BY recorded_at ASC, rowid ASC
            "#,
        )
        .bind(patient_id.to_string())
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch observations from database")?;

        rows.iter()
            .map(|row| -> Result<_, anyhow::Error> {
                Ok(Observation {
                    id: uuid_column(row, "id")?,
                    patient_id: uuid_column(row, "patient_id")?,
                    code: row.try_get("code")?,
                    value: row.try_get("value")?,
                    recorded_at: timestamp_column(row, "recorded_at")?,
                })
            })
            .collect()
    }

    // --- Encounters and notes ---

    pub async fn save_encounter(&self, encounter: &Encounter) -> Result<(), anyhow::Error> {
        let mut conn = self.pool.acquire().await.context("Failed to acquire a connection")?;
        insert_encounter(&mut conn, encounter).await
    }

    pub async fn save_note(&self, note: &Note) -> Result<(), anyhow::Error> {
        let mut conn = self.pool.acquire().await.context("Failed to acquire a connection")?;
        insert_note(&mut conn, note).await?;
        log::info!("Successfully saved note ID: {}", note.id);
        Ok(())
    }

    /// Saves an encounter and its note in one transaction: either both rows
    /// are written or neither is.
    pub async fn save_documented_encounter(&self, encounter: &Encounter, note: &Note) -> Result<(), anyhow::Error> {
        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;
        insert_encounter(&mut tx, encounter).await?;
        insert_note(&mut tx, note).await?;
        tx.commit().await.context("Failed to commit encounter and note")?;

        log::info!("Saved encounter {} with note {}", encounter.id, note.id);
        Ok(())
    }

    /// Notes for a patient, newest first.
    pub async fn list_notes_for_patient(&self, patient_id: Uuid) -> Result<Vec<Note>, anyhow::Error> {
        let rows = sqlx::query(
            r#"
            SELECT id, patient_id, encounter_id, soap_note, billing_codes, created_at
            FROM notes
            WHERE patient_id = ?
            ORDER BY created_at DESC, rowid DESC
            "#,
        )
        .bind(patient_id.to_string())
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch notes from database")?;

        rows.iter()
            .map(|row| -> Result<_, anyhow::Error> {
                let billing_codes: String = row.try_get("billing_codes")?;
                Ok(Note {
                    id: uuid_column(row, "id")?,
                    patient_id: uuid_column(row, "patient_id")?,
                    encounter_id: uuid_column(row, "encounter_id")?,
                    soap_note: row.try_get("soap_note")?,
                    billing_codes: serde_json::from_str::<Vec<BillingCode>>(&billing_codes)
                        .context("Failed to decode stored billing codes")?,
                    created_at: timestamp_column(row, "created_at")?,
                })
            })
            .collect()
    }
}

async fn insert_encounter(conn: &mut SqliteConnection, encounter: &Encounter) -> Result<(), anyhow::Error> {
    log::debug!("Saving encounter {} for patient {}", encounter.id, encounter.patient_id);
    sqlx::query("INSERT INTO encounters (id, patient_id, transcript, created_at) VALUES (?, ?, ?, ?)")
        .bind(encounter.id.to_string())
        .bind(encounter.patient_id.to_string())
        .bind(&encounter.transcript)
        .bind(encounter.created_at.timestamp())
        .execute(&mut *conn)
        .await
        .context("Failed to insert encounter into database")?;
    Ok(())
}

async fn insert_note(conn: &mut SqliteConnection, note: &Note) -> Result<(), anyhow::Error> {
    log::debug!("Saving note {} for encounter {}", note.id, note.encounter_id);
    let billing_codes = serde_json::to_string(&note.billing_codes).context("Failed to encode billing codes")?;

    sqlx::query(
        r#"
        INSERT INTO notes (id, patient_id, encounter_id, soap_note, billing_codes, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(note.id.to_string())
    .bind(note.patient_id.to_string())
    .bind(note.encounter_id.to_string())
    .bind(&note.soap_note)
    .bind(billing_codes)
    .bind(note.created_at.timestamp())
    .execute(&mut *conn)
    .await
    .context("Failed to insert note into database")?;
    Ok(())
}

fn patient_from_row(row: &SqliteRow) -> Result<Patient, anyhow::Error> {
    Ok(Patient {
        id: uuid_column(row, "id")?,
        name: row.try_get("name")?,
        date_of_birth: row.try_get("date_of_birth")?,
        gender: row.try_get("gender")?,
        medical_history: row.try_get("medical_history")?,
    })
}

// UUIDs are stored as TEXT
fn uuid_column(row: &SqliteRow, column: &str) -> Result<Uuid, anyhow::Error> {
    let text: String = row.try_get(column)?;
    Uuid::parse_str(&text).with_context(|| format!("Failed to parse {column}"))
}

// Timestamps are stored as INTEGER (Unix seconds)
fn timestamp_column(row: &SqliteRow, column: &str) -> Result<DateTime<Utc>, anyhow::Error> {
    let seconds: i64 = row.try_get(column)?;
    DateTime::from_timestamp(seconds, 0).with_context(|| format!("Invalid {column} timestamp"))
}
