//! Device registry: device records and their command associations

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, Row, TransactionBehavior};

use super::DbPool;
use crate::security::pin;
use crate::{Error, Result};

/// A registered device
#[derive(Debug, Clone, PartialEq)]
pub struct Device {
    pub id: i64,
    pub owner: String,
    pub name: String,
    /// Push endpoint; unique across all devices
    pub endpoint: String,
    /// Argon2 PHC string, never the PIN itself
    pub sms_pin_hash: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    /// When the location was last reported
    pub updated_at: Option<DateTime<Utc>>,
}

impl Device {
    /// Whether this device can be addressed from the SMS path
    #[must_use]
    pub const fn has_sms_pin(&self) -> bool {
        self.sms_pin_hash.is_some()
    }
}

/// Input for registering a device
#[derive(Debug, Clone)]
pub struct NewDevice {
    pub owner: String,
    pub name: String,
    pub endpoint: String,
    /// Plaintext PIN; hashed before it reaches the database
    pub sms_pin: Option<String>,
}

const DEVICE_COLUMNS: &str =
    "id, owner, name, endpoint, sms_pin_hash, latitude, longitude, updated_at";

/// Device repository
#[derive(Clone)]
pub struct DeviceRepo {
    pool: DbPool,
}

impl DeviceRepo {
    /// Create a new device repository
    #[must_use]
    #[allow(clippy::missing_const_for_fn)]
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Register a device for its owner
    ///
    /// Hashes the SMS PIN when one is given. A PIN must be unique among the
    /// owner's devices, otherwise SMS resolution would be ambiguous.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for an empty name, a non-http(s) endpoint or a
    /// malformed PIN, `Conflict` if the endpoint is taken or the PIN is
    /// already used by another of the owner's devices
    pub fn create(&self, new: NewDevice) -> Result<Device> {
        let name = new.name.trim();
        if new.owner.is_empty() {
            return Err(Error::InvalidInput("owner is required".to_string()));
        }
        if name.is_empty() {
            return Err(Error::InvalidInput("device name is required".to_string()));
        }
        validate_endpoint(&new.endpoint)?;

        let raw_pin = new.sms_pin.as_deref();
        if let Some(raw) = raw_pin {
            pin::validate_pin(raw)?;
        }

        let mut conn = self
            .pool
            .get()
            .map_err(|e| Error::Database(e.to_string()))?;

        // Argon2 work happens outside the write lock
        let (sms_pin_hash, checked) = match raw_pin {
            Some(raw) => {
                let existing = owner_pin_hashes(&conn, &new.owner)?;
                ensure_pin_unused(raw, &existing)?;
                (Some(pin::hash_pin(raw)?), existing)
            }
            None => (None, Vec::new()),
        };

        // Immediate transaction so the insert cannot interleave with another
        // registration for the same owner; only PINs added since the check
        // above are verified while holding the lock
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| Error::Database(e.to_string()))?;

        if let Some(raw) = raw_pin {
            let added: Vec<String> = owner_pin_hashes(&tx, &new.owner)?
                .into_iter()
                .filter(|hash| !checked.contains(hash))
                .collect();
            ensure_pin_unused(raw, &added)?;
        }

        tx.execute(
            "INSERT INTO devices (owner, name, endpoint, sms_pin_hash) VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![new.owner, name, new.endpoint, sms_pin_hash],
        )
        .map_err(|e| {
            if e.to_string().contains("UNIQUE constraint") {
                Error::Conflict("push endpoint already registered".to_string())
            } else {
                Error::Database(e.to_string())
            }
        })?;

        let id = tx.last_insert_rowid();
        tx.commit().map_err(|e| Error::Database(e.to_string()))?;

        tracing::info!(device_id = id, owner = %new.owner, name, "device registered");

        Ok(Device {
            id,
            owner: new.owner,
            name: name.to_string(),
            endpoint: new.endpoint,
            sms_pin_hash,
            latitude: 0.0,
            longitude: 0.0,
            updated_at: None,
        })
    }

    /// Find a device by ID
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn find(&self, id: i64) -> Result<Option<Device>> {
        let conn = self
            .pool
            .get()
            .map_err(|e| Error::Database(e.to_string()))?;

        conn.query_row(
            &format!("SELECT {DEVICE_COLUMNS} FROM devices WHERE id = ?1"),
            [id],
            row_to_device,
        )
        .optional()
        .map_err(|e| Error::Database(e.to_string()))
    }

    /// Find a device by ID, only if it belongs to `owner`
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn find_owned(&self, id: i64, owner: &str) -> Result<Option<Device>> {
        Ok(self.find(id)?.filter(|d| d.owner == owner))
    }

    /// List the devices of an owner in registration order
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn list_for_owner(&self, owner: &str) -> Result<Vec<Device>> {
        let conn = self
            .pool
            .get()
            .map_err(|e| Error::Database(e.to_string()))?;

        let mut stmt = conn
            .prepare(&format!(
                "SELECT {DEVICE_COLUMNS} FROM devices WHERE owner = ?1 ORDER BY id"
            ))
            .map_err(|e| Error::Database(e.to_string()))?;

        let devices = stmt
            .query_map([owner], row_to_device)
            .map_err(|e| Error::Database(e.to_string()))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::Database(e.to_string()))?;

        Ok(devices)
    }

    /// Record the last known location of a device
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for out-of-range coordinates, `NotFound` if the
    /// device does not exist
    pub fn update_location(&self, id: i64, latitude: f64, longitude: f64) -> Result<()> {
        if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
            return Err(Error::InvalidInput(format!(
                "coordinates out of range: ({latitude}, {longitude})"
            )));
        }

        let conn = self
            .pool
            .get()
            .map_err(|e| Error::Database(e.to_string()))?;
        let now = Utc::now().to_rfc3339();

        let updated = conn
            .execute(
                "UPDATE devices SET latitude = ?1, longitude = ?2, updated_at = ?3 WHERE id = ?4",
                rusqlite::params![latitude, longitude, now, id],
            )
            .map_err(|e| Error::Database(e.to_string()))?;

        if updated == 0 {
            return Err(Error::NotFound(format!("device {id}")));
        }

        tracing::debug!(device_id = id, "device location updated");
        Ok(())
    }

    /// IDs of the commands a device implements
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn command_ids(&self, device_id: i64) -> Result<Vec<i64>> {
        let conn = self
            .pool
            .get()
            .map_err(|e| Error::Database(e.to_string()))?;

        let mut stmt = conn
            .prepare(
                "SELECT command_id FROM device_commands WHERE device_id = ?1 ORDER BY command_id",
            )
            .map_err(|e| Error::Database(e.to_string()))?;

        let ids = stmt
            .query_map([device_id], |row| row.get(0))
            .map_err(|e| Error::Database(e.to_string()))?
            .collect::<std::result::Result<Vec<i64>, _>>()
            .map_err(|e| Error::Database(e.to_string()))?;

        Ok(ids)
    }

    /// Replace the full set of commands a device implements
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails; the previous set is kept
    pub fn replace_commands(&self, device_id: i64, command_ids: &[i64]) -> Result<()> {
        let mut conn = self
            .pool
            .get()
            .map_err(|e| Error::Database(e.to_string()))?;

        let tx = conn
            .transaction()
            .map_err(|e| Error::Database(e.to_string()))?;

        tx.execute("DELETE FROM device_commands WHERE device_id = ?1", [device_id])
            .map_err(|e| Error::Database(e.to_string()))?;

        for command_id in command_ids {
            tx.execute(
                "INSERT OR IGNORE INTO device_commands (device_id, command_id) VALUES (?1, ?2)",
                [device_id, *command_id],
            )
            .map_err(|e| Error::Database(e.to_string()))?;
        }

        tx.commit().map_err(|e| Error::Database(e.to_string()))?;

        tracing::info!(device_id, count = command_ids.len(), "device commands replaced");
        Ok(())
    }
}

/// PIN hashes of every device the owner has registered
fn owner_pin_hashes(conn: &rusqlite::Connection, owner: &str) -> Result<Vec<String>> {
    let mut stmt = conn
        .prepare("SELECT sms_pin_hash FROM devices WHERE owner = ?1 AND sms_pin_hash IS NOT NULL")
        .map_err(|e| Error::Database(e.to_string()))?;

    stmt.query_map([owner], |row| row.get(0))
        .map_err(|e| Error::Database(e.to_string()))?
        .collect::<std::result::Result<Vec<String>, _>>()
        .map_err(|e| Error::Database(e.to_string()))
}

fn ensure_pin_unused(raw: &str, hashes: &[String]) -> Result<()> {
    if hashes.iter().any(|hash| pin::verify_pin(raw, hash)) {
        return Err(Error::Conflict(
            "SMS PIN already used by another device".to_string(),
        ));
    }
    Ok(())
}

fn validate_endpoint(endpoint: &str) -> Result<()> {
    let url = url::Url::parse(endpoint)
        .map_err(|e| Error::InvalidInput(format!("invalid push endpoint: {e}")))?;

    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(Error::InvalidInput(format!(
            "push endpoint must be http or https, got {other}"
        ))),
    }
}

fn row_to_device(row: &Row<'_>) -> rusqlite::Result<Device> {
    Ok(Device {
        id: row.get(0)?,
        owner: row.get(1)?,
        name: row.get(2)?,
        endpoint: row.get(3)?,
        sms_pin_hash: row.get(4)?,
        latitude: row.get(5)?,
        longitude: row.get(6)?,
        updated_at: row
            .get::<_, Option<String>>(7)?
            .as_deref()
            .and_then(parse_datetime),
    })
}

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory;

    fn setup() -> DeviceRepo {
        let pool = init_memory().unwrap();
        DeviceRepo::new(pool)
    }

    fn new_device(owner: &str, name: &str, endpoint: &str, pin: Option<&str>) -> NewDevice {
        NewDevice {
            owner: owner.to_string(),
            name: name.to_string(),
            endpoint: endpoint.to_string(),
            sms_pin: pin.map(ToString::to_string),
        }
    }

    #[test]
    fn test_create_and_find() {
        let repo = setup();

        let device = repo
            .create(new_device("ann@example.com", "phone", "https://push.example.com/a", None))
            .unwrap();
        assert_eq!(device.owner, "ann@example.com");
        assert!(!device.has_sms_pin());

        let found = repo.find(device.id).unwrap().unwrap();
        assert_eq!(found, device);
    }

    #[test]
    fn test_pin_is_hashed() {
        let repo = setup();

        let device = repo
            .create(new_device("ann@example.com", "phone", "https://push.example.com/a", Some("4242")))
            .unwrap();
        let hash = device.sms_pin_hash.unwrap();
        assert_ne!(hash, "4242");
        assert!(pin::verify_pin("4242", &hash));
    }

    #[test]
    fn test_duplicate_endpoint_conflicts() {
        let repo = setup();

        repo.create(new_device("ann@example.com", "phone", "https://push.example.com/a", None))
            .unwrap();
        let err = repo
            .create(new_device("bob@example.com", "tablet", "https://push.example.com/a", None))
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[test]
    fn test_duplicate_pin_per_owner_conflicts() {
        let repo = setup();

        repo.create(new_device("ann@example.com", "phone", "https://push.example.com/a", Some("4242")))
            .unwrap();
        let err = repo
            .create(new_device("ann@example.com", "tablet", "https://push.example.com/b", Some("4242")))
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));

        // Same PIN under a different owner is fine
        repo.create(new_device("bob@example.com", "phone", "https://push.example.com/c", Some("4242")))
            .unwrap();
    }

    #[test]
    fn test_unreadable_pin_hash_fails_registration() {
        let repo = setup();
        repo.pool
            .get()
            .unwrap()
            .execute(
                "INSERT INTO devices (owner, name, endpoint, sms_pin_hash)
                 VALUES ('ann@example.com', 'phone', 'https://push.example.com/a', X'DEADBEEF')",
                [],
            )
            .unwrap();

        // A hash that cannot be read must not be skipped over
        let err = repo
            .create(new_device("ann@example.com", "tablet", "https://push.example.com/b", Some("4242")))
            .unwrap_err();
        assert!(matches!(err, Error::Database(_)));
    }

    #[test]
    fn test_pin_hash_helpers() {
        let repo = setup();
        repo.create(new_device("ann@example.com", "phone", "https://push.example.com/a", Some("4242")))
            .unwrap();
        repo.create(new_device("ann@example.com", "laptop", "https://push.example.com/b", None))
            .unwrap();

        let conn = repo.pool.get().unwrap();
        let hashes = owner_pin_hashes(&conn, "ann@example.com").unwrap();
        assert_eq!(hashes.len(), 1);
        assert!(owner_pin_hashes(&conn, "bob@example.com").unwrap().is_empty());

        assert!(matches!(ensure_pin_unused("4242", &hashes), Err(Error::Conflict(_))));
        assert!(ensure_pin_unused("9999", &hashes).is_ok());
        assert!(ensure_pin_unused("4242", &[]).is_ok());
    }

    #[test]
    fn test_rejects_bad_input() {
        let repo = setup();

        let err = repo
            .create(new_device("ann@example.com", " ", "https://push.example.com/a", None))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));

        let err = repo
            .create(new_device("ann@example.com", "phone", "ftp://push.example.com/a", None))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));

        let err = repo
            .create(new_device("ann@example.com", "phone", "https://push.example.com/a", Some("12 34")))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_find_owned_hides_foreign_devices() {
        let repo = setup();

        let device = repo
            .create(new_device("ann@example.com", "phone", "https://push.example.com/a", None))
            .unwrap();
        assert!(repo.find_owned(device.id, "ann@example.com").unwrap().is_some());
        assert!(repo.find_owned(device.id, "bob@example.com").unwrap().is_none());
        assert!(repo.find_owned(999, "ann@example.com").unwrap().is_none());
    }

    #[test]
    fn test_list_for_owner_in_registration_order() {
        let repo = setup();

        let first = repo
            .create(new_device("ann@example.com", "phone", "https://push.example.com/a", None))
            .unwrap();
        repo.create(new_device("bob@example.com", "phone", "https://push.example.com/b", None))
            .unwrap();
        let second = repo
            .create(new_device("ann@example.com", "tablet", "https://push.example.com/c", None))
            .unwrap();

        let ids: Vec<i64> = repo
            .list_for_owner("ann@example.com")
            .unwrap()
            .into_iter()
            .map(|d| d.id)
            .collect();
        assert_eq!(ids, vec![first.id, second.id]);
    }

    #[test]
    fn test_update_location() {
        let repo = setup();

        let device = repo
            .create(new_device("ann@example.com", "phone", "https://push.example.com/a", None))
            .unwrap();
        repo.update_location(device.id, 52.52, 13.405).unwrap();

        let found = repo.find(device.id).unwrap().unwrap();
        assert!((found.latitude - 52.52).abs() < f64::EPSILON);
        assert!((found.longitude - 13.405).abs() < f64::EPSILON);
        assert!(found.updated_at.is_some());

        assert!(matches!(
            repo.update_location(device.id, 91.0, 0.0),
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            repo.update_location(999, 0.0, 0.0),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_replace_commands_is_wholesale() {
        let repo = setup();

        let device = repo
            .create(new_device("ann@example.com", "phone", "https://push.example.com/a", None))
            .unwrap();

        repo.replace_commands(device.id, &[1, 2, 3]).unwrap();
        assert_eq!(repo.command_ids(device.id).unwrap(), vec![1, 2, 3]);

        repo.replace_commands(device.id, &[3, 4, 4]).unwrap();
        assert_eq!(repo.command_ids(device.id).unwrap(), vec![3, 4]);

        repo.replace_commands(device.id, &[]).unwrap();
        assert!(repo.command_ids(device.id).unwrap().is_empty());
    }
}
