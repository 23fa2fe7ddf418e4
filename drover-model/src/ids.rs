use crate::error::ModelError;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;

const ID_LEN: usize = 32;

fn generate_hex_id() -> String {
    let mut bytes = [0u8; ID_LEN / 2];
    rand::rng().fill_bytes(&mut bytes);
    let mut out = String::with_capacity(ID_LEN);
    for byte in bytes {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

fn validate_hex_id(raw: &str) -> Result<(), ModelError> {
    let ok = raw.len() == ID_LEN
        && raw
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
    if ok {
        Ok(())
    } else {
        Err(ModelError::InvalidId(raw.to_string()))
    }
}

/// Strongly typed job identifier: 32 lowercase hex characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn generate() -> Self {
        JobId(generate_hex_id())
    }

    pub fn parse(raw: &str) -> Result<Self, ModelError> {
        validate_hex_id(raw)?;
        Ok(JobId(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Strongly typed worker identifier: 32 lowercase hex characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(String);

impl WorkerId {
    pub fn generate() -> Self {
        WorkerId(generate_hex_id())
    }

    pub fn parse(raw: &str) -> Result<Self, ModelError> {
        validate_hex_id(raw)?;
        Ok(WorkerId(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_32_lowercase_hex() {
        let id = JobId::generate();
        assert_eq!(id.as_str().len(), 32);
        assert!(JobId::parse(id.as_str()).is_ok());
    }

    #[test]
    fn parse_rejects_bad_ids() {
        assert!(JobId::parse("short").is_err());
        assert!(JobId::parse(&"G".repeat(32)).is_err());
        assert!(WorkerId::parse(&"A1".repeat(16)).is_err());
    }

    #[test]
    fn generated_ids_are_distinct() {
        assert_ne!(JobId::generate(), JobId::generate());
    }
}
