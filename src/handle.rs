//! IMAS data entry handles and the run manifest.
//!
//! A handle names one data entry as `user/db/shot/run`. The user part is
//! optional on input; it defaults to whoever is running the tool, matching
//! how entries are laid out on shared machines.

use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{ConfigError, HandleError};

/// Identity of one IMAS data entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImasHandle {
    pub user: String,
    pub db: String,
    pub shot: u32,
    pub run: u32,
}

impl ImasHandle {
    /// Same entry under a different run number.
    pub fn with_run(&self, run: u32) -> ImasHandle {
        ImasHandle {
            run,
            ..self.clone()
        }
    }
}

/// Name of the user running the tool, used when a handle omits the user part.
pub fn current_user() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| String::from("unknown"))
}

impl FromStr for ImasHandle {
    type Err = HandleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('/').collect();
        let (user, db, shot, run) = match parts.as_slice() {
            [user, db, shot, run] => (user.to_string(), db, shot, run),
            [db, shot, run] => (current_user(), db, shot, run),
            _ => {
                return Err(HandleError::Malformed {
                    string: s.to_string(),
                })
            }
        };
        if user.is_empty() || db.is_empty() {
            return Err(HandleError::Malformed {
                string: s.to_string(),
            });
        }
        let shot = shot.parse().map_err(|_| HandleError::BadField {
            string: s.to_string(),
            field: "shot",
        })?;
        let run = run.parse().map_err(|_| HandleError::BadField {
            string: s.to_string(),
            field: "run",
        })?;
        Ok(ImasHandle {
            user,
            db: db.to_string(),
            shot,
            run,
        })
    }
}

impl fmt::Display for ImasHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}/{}", self.user, self.db, self.shot, self.run)
    }
}

// Handles travel through YAML in their string form.
impl Serialize for ImasHandle {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ImasHandle {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(D::Error::custom)
    }
}

/// One generated run: a unique name plus the handle its data lives under.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub name: String,
    pub handle: ImasHandle,
}

/// Read a run manifest and check that run names are unique.
pub fn read_manifest(path: &Path) -> Result<Vec<RunRecord>, ConfigError> {
    let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let records: Vec<RunRecord> =
        serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
    let mut seen = std::collections::HashSet::new();
    for record in &records {
        if !seen.insert(record.name.as_str()) {
            return Err(ConfigError::Validation(format!(
                "duplicate run name {:?} in {}",
                record.name,
                path.display()
            )));
        }
    }
    Ok(records)
}

/// Write the run manifest produced by the create step.
pub fn write_manifest(path: &Path, records: &[RunRecord]) -> Result<(), ConfigError> {
    let text = serde_yaml::to_string(records).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    fs::write(path, text).map_err(|source| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_handle() {
        let handle: ImasHandle = "gu3ido/m0o/9234/123".parse().unwrap();
        assert_eq!(handle.user, "gu3ido");
        assert_eq!(handle.db, "m0o");
        assert_eq!(handle.shot, 9234);
        assert_eq!(handle.run, 123);
    }

    #[test]
    fn missing_user_defaults_to_current_user() {
        let handle: ImasHandle = "jet/92436/5".parse().unwrap();
        assert_eq!(handle.user, current_user());
        assert_eq!(handle.db, "jet");
        assert_eq!(handle.shot, 92436);
        assert_eq!(handle.run, 5);
    }

    #[test]
    fn rejects_malformed_strings() {
        assert!(matches!(
            "badstring".parse::<ImasHandle>().unwrap_err(),
            HandleError::Malformed { .. }
        ));
        assert!(matches!(
            "a/b/c/d/e".parse::<ImasHandle>().unwrap_err(),
            HandleError::Malformed { .. }
        ));
        assert!(matches!(
            "jet/shot/5".parse::<ImasHandle>().unwrap_err(),
            HandleError::BadField { field: "shot", .. }
        ));
        assert!(matches!(
            "alice/jet/92436/x".parse::<ImasHandle>().unwrap_err(),
            HandleError::BadField { field: "run", .. }
        ));
    }

    #[test]
    fn round_trips_through_display() {
        let handle: ImasHandle = "alice/jet/92436/1".parse().unwrap();
        assert_eq!(handle.to_string(), "alice/jet/92436/1");
        let again: ImasHandle = handle.to_string().parse().unwrap();
        assert_eq!(again, handle);
    }

    #[test]
    fn with_run_keeps_the_rest() {
        let handle: ImasHandle = "alice/jet/92436/1".parse().unwrap();
        let next = handle.with_run(17);
        assert_eq!(next.run, 17);
        assert_eq!(next.user, "alice");
        assert_eq!(next.shot, 92436);
    }

    #[test]
    fn manifest_round_trip_and_duplicate_names() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runs.yaml");
        let records = vec![
            RunRecord {
                name: "run_0000".into(),
                handle: "alice/jet/92436/100".parse().unwrap(),
            },
            RunRecord {
                name: "run_0001".into(),
                handle: "alice/jet/92436/101".parse().unwrap(),
            },
        ];
        write_manifest(&path, &records).unwrap();
        assert_eq!(read_manifest(&path).unwrap(), records);

        let dupes = vec![records[0].clone(), records[0].clone()];
        write_manifest(&path, &dupes).unwrap();
        assert!(matches!(
            read_manifest(&path).unwrap_err(),
            ConfigError::Validation(_)
        ));
    }
}
