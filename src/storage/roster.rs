use crate::common::{GymAuthError, Result};
use crate::storage::admin::AdminRecord;
use std::cmp::Ordering;
use std::path::Path;
use std::fs;
use std::sync::Arc;
use tokio::sync::watch;

/// Inserts the default super admin into an empty roster. Returns whether it
/// did, so the caller can write the seeded list back to the remote store.
pub fn seed_default_admin(admins: &mut Vec<AdminRecord>) -> bool {
    if !admins.is_empty() {
        return false;
    }
    tracing::warn!("Admin roster is empty, seeding default administrator");
    admins.push(AdminRecord::default_admin());
    true
}

/// Read side of the admin roster. Cheap to clone; every clone sees updates
/// published through the matching [`RosterFeed`].
#[derive(Debug, Clone)]
pub struct Roster {
    rx: watch::Receiver<Arc<Vec<AdminRecord>>>,
}

/// Write side of the roster, held by whatever keeps it in sync with the
/// remote store.
#[derive(Debug)]
pub struct RosterFeed {
    tx: watch::Sender<Arc<Vec<AdminRecord>>>,
}

impl Roster {
    pub fn channel(mut initial: Vec<AdminRecord>) -> (RosterFeed, Roster) {
        seed_default_admin(&mut initial);
        let (tx, rx) = watch::channel(Arc::new(initial));
        (RosterFeed { tx }, Roster { rx })
    }

    /// A roster that never changes. Unlike [`Roster::channel`] this does not
    /// seed an empty list.
    pub fn fixed(admins: Vec<AdminRecord>) -> Roster {
        let (_tx, rx) = watch::channel(Arc::new(admins));
        Roster { rx }
    }

    /// Current admins in roster order.
    pub fn snapshot(&self) -> Arc<Vec<AdminRecord>> {
        self.rx.borrow().clone()
    }
}

impl RosterFeed {
    /// Replaces the roster. Returns `true` when the default admin was seeded.
    pub fn publish(&self, mut admins: Vec<AdminRecord>) -> bool {
        let seeded = seed_default_admin(&mut admins);
        tracing::debug!("Roster updated: {} admin(s)", admins.len());
        self.tx.send_replace(Arc::new(admins));
        seeded
    }
}

/// Reads the local mirror of the `admins` collection. The remote store may
/// hand the collection back either as an array or as an object keyed by id;
/// both are accepted. A missing file is an empty roster.
pub fn load_roster_file(path: &Path) -> Result<Vec<AdminRecord>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let raw: serde_json::Value = serde_json::from_slice(&fs::read(path)?)?;
    let admins = match raw {
        serde_json::Value::Null => Vec::new(),
        serde_json::Value::Array(items) => items
            .into_iter()
            .map(serde_json::from_value)
            .collect::<std::result::Result<Vec<AdminRecord>, _>>()?,
        serde_json::Value::Object(map) => {
            let mut entries: Vec<_> = map.into_iter().collect();
            entries.sort_by(|(a, _), (b, _)| key_order(a, b));
            entries
                .into_iter()
                .map(|(_, v)| serde_json::from_value(v))
                .collect::<std::result::Result<Vec<AdminRecord>, _>>()?
        }
        other => {
            return Err(GymAuthError::Storage(format!(
                "Unexpected roster format in {}: {}", path.display(), other
            )))
        }
    };

    Ok(admins)
}

/// Integer keys first in numeric order, then the rest by string, the same
/// order a JS object enumerates its keys in.
fn key_order(a: &str, b: &str) -> Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}

pub fn save_roster_file(path: &Path, admins: &[AdminRecord]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, serde_json::to_vec_pretty(admins)?)?;
    Ok(())
}
