//! Assembly of per-node artifacts into one downloadable archive.
//!
//! The archive layout is a single JSON manifest line followed by the node
//! payloads back to back. Each manifest entry records the byte offset, size
//! and SHA-256 digest of its payload.

use crate::core::{ArtifactRef, Bundle, BundleId, BundlePhase};
use crate::errors::BundleError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::Path;

/// One node's artifact as fetched for assembly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeArtifact {
    /// The artifact was downloaded.
    Fetched {
        /// Node address.
        node: String,
        /// Location on the node.
        artifact: ArtifactRef,
        /// Payload.
        bytes: Vec<u8>,
    },
    /// The artifact could not be downloaded.
    Missing {
        /// Node address.
        node: String,
        /// Why the download failed.
        reason: String,
    },
}

/// Manifest entry for a node payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveEntry {
    /// Node address.
    pub node: String,
    /// Location of the artifact on the node.
    pub artifact: ArtifactRef,
    /// Offset of the payload after the manifest line.
    pub offset: u64,
    /// Payload size in bytes.
    pub size: u64,
    /// Hex SHA-256 of the payload.
    pub sha256: String,
}

/// Manifest entry for a node whose artifact is absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissingEntry {
    /// Node address.
    pub node: String,
    /// Why the artifact is absent.
    pub reason: String,
}

/// Archive header describing its contents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveManifest {
    /// Bundle the archive belongs to.
    pub bundle_id: BundleId,
    /// Bundle phase at assembly time.
    pub phase: BundlePhase,
    /// When the bundle was created.
    pub created_at: DateTime<Utc>,
    /// When the archive was assembled.
    pub assembled_at: DateTime<Utc>,
    /// Included node payloads, in bundle node order.
    pub entries: Vec<ArchiveEntry>,
    /// Succeeded nodes whose payload could not be fetched.
    #[serde(default)]
    pub missing: Vec<MissingEntry>,
    /// Nodes that did not produce an artifact at all, with their errors.
    #[serde(default)]
    pub failed_nodes: Vec<MissingEntry>,
    /// Total payload size in bytes.
    pub total_size: u64,
}

/// An assembled diagnostics archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleArchive {
    manifest: ArchiveManifest,
    payload: Vec<u8>,
}

impl BundleArchive {
    /// Concatenates node artifacts into one archive for `bundle`.
    #[must_use]
    pub fn assemble(bundle: &Bundle, parts: Vec<NodeArtifact>) -> Self {
        let mut payload = Vec::new();
        let mut entries = Vec::new();
        let mut missing = Vec::new();

        for part in parts {
            match part {
                NodeArtifact::Fetched {
                    node,
                    artifact,
                    bytes,
                } => {
                    entries.push(ArchiveEntry {
                        node,
                        artifact,
                        offset: payload.len() as u64,
                        size: bytes.len() as u64,
                        sha256: hex::encode(Sha256::digest(&bytes)),
                    });
                    payload.extend_from_slice(&bytes);
                }
                NodeArtifact::Missing { node, reason } => {
                    missing.push(MissingEntry { node, reason });
                }
            }
        }

        let failed_nodes = bundle
            .jobs
            .iter()
            .filter(|job| job.phase.is_failure())
            .map(|job| MissingEntry {
                node: job.node.clone(),
                reason: job.error.clone().unwrap_or_else(|| job.phase.to_string()),
            })
            .collect();

        Self {
            manifest: ArchiveManifest {
                bundle_id: bundle.id.clone(),
                phase: bundle.phase,
                created_at: bundle.created_at,
                assembled_at: Utc::now(),
                entries,
                missing,
                failed_nodes,
                total_size: payload.len() as u64,
            },
            payload,
        }
    }

    /// Returns the manifest.
    #[must_use]
    pub const fn manifest(&self) -> &ArchiveManifest {
        &self.manifest
    }

    /// File name for the archive.
    #[must_use]
    pub fn name(&self) -> String {
        format!("{}.bundle", self.manifest.bundle_id)
    }

    /// Returns true if every succeeded node's payload is included.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.manifest.missing.is_empty()
    }

    /// Total payload size in bytes.
    #[must_use]
    pub const fn size(&self) -> u64 {
        self.manifest.total_size
    }

    /// Returns the payload of one node.
    #[must_use]
    pub fn node_payload(&self, node: &str) -> Option<&[u8]> {
        let entry = self.manifest.entries.iter().find(|e| e.node == node)?;
        let start = usize::try_from(entry.offset).ok()?;
        let end = start.checked_add(usize::try_from(entry.size).ok()?)?;
        self.payload.get(start..end)
    }

    /// Serializes the archive.
    ///
    /// # Errors
    ///
    /// Returns `Internal` if the manifest cannot be encoded.
    pub fn to_bytes(&self) -> Result<Vec<u8>, BundleError> {
        let mut out = serde_json::to_vec(&self.manifest)
            .map_err(|e| BundleError::Internal(format!("failed to encode manifest: {e}")))?;
        out.push(b'\n');
        out.extend_from_slice(&self.payload);
        Ok(out)
    }

    /// Parses an archive produced by [`to_bytes`](Self::to_bytes).
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` if the header is missing or malformed, or if
    /// a payload does not match its recorded digest.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, BundleError> {
        let split = bytes
            .iter()
            .position(|b| *b == b'\n')
            .ok_or_else(|| BundleError::invalid_request("archive has no manifest line"))?;
        let manifest: ArchiveManifest = serde_json::from_slice(&bytes[..split])
            .map_err(|e| BundleError::invalid_request(format!("invalid archive manifest: {e}")))?;

        let archive = Self {
            manifest,
            payload: bytes[split + 1..].to_vec(),
        };
        for entry in &archive.manifest.entries {
            let payload = archive.node_payload(&entry.node).ok_or_else(|| {
                BundleError::invalid_request(format!("payload for {} is truncated", entry.node))
            })?;
            if hex::encode(Sha256::digest(payload)) != entry.sha256 {
                return Err(BundleError::invalid_request(format!(
                    "payload for {} does not match its digest",
                    entry.node
                )));
            }
        }
        Ok(archive)
    }

    /// Writes the archive to `path` and returns the number of bytes written.
    ///
    /// # Errors
    ///
    /// Returns `Internal` on I/O failure.
    pub fn write_to_path(&self, path: impl AsRef<Path>) -> Result<u64, BundleError> {
        let path = path.as_ref();
        let bytes = self.to_bytes()?;
        let mut file = std::fs::File::create(path).map_err(|e| {
            BundleError::Internal(format!("failed to create {}: {e}", path.display()))
        })?;
        file.write_all(&bytes).map_err(|e| {
            BundleError::Internal(format!("failed to write {}: {e}", path.display()))
        })?;
        Ok(bytes.len() as u64)
    }
}
