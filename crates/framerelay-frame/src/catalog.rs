//! Packet-code catalog.
//!
//! Codes 1111-1113 travel client → worker, codes 1114-1115 travel
//! worker → client. The catalog is built once at start-up and shared
//! read-only afterwards.

use std::collections::BTreeMap;

use crate::error::CatalogError;

/// Select which detectors the worker runs.
pub const SET_DETECTION_TYPE: u32 = 1111;

/// Set the frame orientation the worker should assume.
pub const SET_ORIENTATION: u32 = 1112;

/// Ask the worker for the next analysed frame.
pub const GET_DETECTED_FRAME: u32 = 1113;

/// An analysed frame produced by the worker.
pub const SET_DETECTED_FRAME: u32 = 1114;

/// Marks the end of a frame sequence.
pub const END_OF_FRAME: u32 = 1115;

/// Codes a client may send that are relayed to the worker.
pub const FORWARD_TO_WORKER: [u32; 3] = [SET_DETECTION_TYPE, SET_ORIENTATION, GET_DETECTED_FRAME];

/// Codes the worker may send that are relayed to the active client.
pub const FORWARD_TO_CLIENT: [u32; 2] = [SET_DETECTED_FRAME, END_OF_FRAME];

/// Which way a packet code is allowed to travel through the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ToWorker,
    ToClient,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::ToWorker => "client->worker",
            Direction::ToClient => "worker->client",
        }
    }
}

/// Returns the relay direction of a code, or `None` if it is never relayed.
pub fn direction(code: u32) -> Option<Direction> {
    if FORWARD_TO_WORKER.contains(&code) {
        Some(Direction::ToWorker)
    } else if FORWARD_TO_CLIENT.contains(&code) {
        Some(Direction::ToClient)
    } else {
        None
    }
}

/// Registry of known packet codes and their canonical names.
#[derive(Debug, Clone, Default)]
pub struct PacketCatalog {
    entries: BTreeMap<u32, String>,
}

impl PacketCatalog {
    /// Create an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// The catalog of every packet kind the relay understands.
    pub fn standard() -> Self {
        let mut catalog = Self::new();
        for (code, name) in [
            (SET_DETECTION_TYPE, "SetDetectionType"),
            (SET_ORIENTATION, "SetOrientation"),
            (GET_DETECTED_FRAME, "GetDetectedFrame"),
            (SET_DETECTED_FRAME, "SetDetectedFrame"),
            (END_OF_FRAME, "EndOfFrame"),
        ] {
            catalog.entries.insert(code, name.to_string());
        }
        catalog
    }

    /// Register a new code.
    pub fn register(&mut self, code: u32, name: impl Into<String>) -> Result<(), CatalogError> {
        if let Some(existing) = self.entries.get(&code) {
            return Err(CatalogError::DuplicateCode {
                code,
                existing: existing.clone(),
            });
        }
        self.entries.insert(code, name.into());
        Ok(())
    }

    /// Canonical name of a code.
    pub fn lookup(&self, code: u32) -> Result<&str, CatalogError> {
        self.entries
            .get(&code)
            .map(String::as_str)
            .ok_or(CatalogError::UnknownCode(code))
    }

    pub fn contains(&self, code: u32) -> bool {
        self.entries.contains_key(&code)
    }

    /// All entries ordered by code.
    pub fn entries(&self) -> impl Iterator<Item = (u32, &str)> {
        self.entries.iter().map(|(code, name)| (*code, name.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_catalog_names() {
        let catalog = PacketCatalog::standard();
        assert_eq!(catalog.len(), 5);
        assert_eq!(catalog.lookup(1111).unwrap(), "SetDetectionType");
        assert_eq!(catalog.lookup(1112).unwrap(), "SetOrientation");
        assert_eq!(catalog.lookup(1113).unwrap(), "GetDetectedFrame");
        assert_eq!(catalog.lookup(1114).unwrap(), "SetDetectedFrame");
        assert_eq!(catalog.lookup(1115).unwrap(), "EndOfFrame");
    }

    #[test]
    fn lookup_unknown_code() {
        let catalog = PacketCatalog::standard();
        assert_eq!(catalog.lookup(9999), Err(CatalogError::UnknownCode(9999)));
        assert!(!catalog.contains(9999));
    }

    #[test]
    fn register_rejects_duplicate() {
        let mut catalog = PacketCatalog::standard();
        let err = catalog.register(1113, "Again").unwrap_err();
        assert_eq!(
            err,
            CatalogError::DuplicateCode {
                code: 1113,
                existing: "GetDetectedFrame".to_string(),
            }
        );
        assert_eq!(catalog.lookup(1113).unwrap(), "GetDetectedFrame");
    }

    #[test]
    fn register_new_code() {
        let mut catalog = PacketCatalog::new();
        assert!(catalog.is_empty());
        catalog.register(42, "Answer").unwrap();
        assert_eq!(catalog.lookup(42).unwrap(), "Answer");
    }

    #[test]
    fn entries_sorted_by_code() {
        let catalog = PacketCatalog::standard();
        let codes: Vec<u32> = catalog.entries().map(|(code, _)| code).collect();
        assert_eq!(codes, vec![1111, 1112, 1113, 1114, 1115]);
    }

    #[test]
    fn directions() {
        for code in FORWARD_TO_WORKER {
            assert_eq!(direction(code), Some(Direction::ToWorker));
        }
        for code in FORWARD_TO_CLIENT {
            assert_eq!(direction(code), Some(Direction::ToClient));
        }
        assert_eq!(direction(9999), None);
    }
}
