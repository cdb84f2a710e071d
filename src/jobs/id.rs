// src/jobs/id.rs

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{Datelike, NaiveDate};

use crate::config::validate::is_valid_segment;
use crate::errors::{Result, SubforgeError};

/// Highest sequence number a day can hold (`NNNN`).
pub const MAX_SEQUENCE: u32 = 9999;

/// `YYYYMMDD-NNNN`: allocation date plus a per-day, per-owner sequence.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId {
    raw: String,
    date: NaiveDate,
    sequence: u32,
}

impl JobId {
    pub fn new(date: NaiveDate, sequence: u32) -> Self {
        Self {
            raw: format!("{}-{sequence:04}", date.format("%Y%m%d")),
            date,
            sequence,
        }
    }

    /// Validate a job id string: 13 bytes, `-` at byte 8, ASCII digits
    /// elsewhere, and a real calendar date.
    pub fn parse(s: &str) -> Result<Self> {
        let bytes = s.as_bytes();
        let well_formed = bytes.len() == 13
            && bytes[8] == b'-'
            && bytes
                .iter()
                .enumerate()
                .all(|(i, b)| i == 8 || b.is_ascii_digit());
        if !well_formed {
            return Err(malformed(s, "expected YYYYMMDD-NNNN"));
        }

        let date = NaiveDate::parse_from_str(&s[..8], "%Y%m%d")
            .map_err(|_| malformed(s, "not a calendar date"))?;
        let sequence: u32 = s[9..]
            .parse()
            .map_err(|_| malformed(s, "bad sequence number"))?;

        Ok(Self {
            raw: s.to_string(),
            date,
            sequence,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn sequence(&self) -> u32 {
        self.sequence
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for JobId {
    type Err = SubforgeError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

fn malformed(s: &str, why: &str) -> SubforgeError {
    SubforgeError::ConfigError(format!("malformed job id '{s}': {why}"))
}

pub fn validate_owner(owner: &str) -> Result<()> {
    if is_valid_segment(owner) {
        Ok(())
    } else {
        Err(SubforgeError::ConfigError(format!(
            "owner '{owner}' is not a valid directory name"
        )))
    }
}

/// `<root>/<YYYY>/<MM>/<DD>/<owner>`
pub fn owner_dir(root: &Path, date: NaiveDate, owner: &str) -> PathBuf {
    root.join(format!("{:04}", date.year()))
        .join(format!("{:02}", date.month()))
        .join(format!("{:02}", date.day()))
        .join(owner)
}

/// `<root>/<YYYY>/<MM>/<DD>/<owner>/<job_id>`; pure, touches nothing.
pub fn job_dir(root: &Path, owner: &str, id: &JobId) -> PathBuf {
    owner_dir(root, id.date(), owner).join(id.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_formats() {
        let id = JobId::parse("20261019-0042").unwrap();
        assert_eq!(id.date(), NaiveDate::from_ymd_opt(2026, 10, 19).unwrap());
        assert_eq!(id.sequence(), 42);
        assert_eq!(id, JobId::new(id.date(), 42));
        assert_eq!(id.to_string(), "20261019-0042");
    }

    #[test]
    fn rejects_malformed_ids() {
        for bad in [
            "",
            "20261019",
            "20261019-42",
            "20261019_0001",
            "2026101a-0001",
            "20261019-00a1",
            "20261319-0001",
            "20260230-0001",
            "../../etc/pas",
            "20261019-0001 ",
        ] {
            assert!(
                matches!(JobId::parse(bad), Err(SubforgeError::ConfigError(_))),
                "accepted {bad:?}"
            );
        }
    }

    #[test]
    fn job_dir_layout() {
        let id = JobId::parse("20260105-0003").unwrap();
        assert_eq!(
            job_dir(Path::new("/srv/jobs"), "studio", &id),
            PathBuf::from("/srv/jobs/2026/01/05/studio/20260105-0003")
        );
    }

    #[test]
    fn owner_validation() {
        assert!(validate_owner("studio-a").is_ok());
        for bad in ["", ".", "..", "a/b", "a\\b", "-x"] {
            assert!(validate_owner(bad).is_err(), "accepted {bad:?}");
        }
    }
}
