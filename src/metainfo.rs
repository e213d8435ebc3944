//! Torrent metainfo parser
//!
//! Extracts the session-relevant view of a .torrent file: name, piece
//! table, file layout, and the info-hash that identifies the content.

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

use crate::bencode::BencodeValue;
use crate::error::{EngineError, MetadataErrorKind, Result};

/// SHA-1 hash (20 bytes)
pub type Sha1Hash = [u8; 20];

/// Parsed torrent metainfo
#[derive(Debug, Clone)]
pub struct Metainfo {
    /// SHA-1 hash of the canonically re-encoded info dictionary
    pub info_hash: Sha1Hash,
    /// Display name for the torrent
    pub name: String,
    /// Number of bytes per piece
    pub piece_length: u64,
    /// Per-piece index, size, and expected hash
    pub pieces: Vec<Piece>,
    /// Files in this torrent, in info-dict order
    pub files: Vec<FileEntry>,
    /// Total size of all files
    pub total_size: u64,
    /// Whether this is a single-file torrent
    pub is_single_file: bool,
}

/// A single piece of the torrent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Piece {
    /// Zero-based index
    pub index: usize,
    /// Size in bytes (the last piece may be shorter)
    pub size: u64,
    /// Expected SHA-1 hash of the piece contents
    pub hash: Sha1Hash,
    /// Whether the piece has been verified on disk; always false for
    /// the simulation, carried for a real piece-exchange driver
    pub downloaded: bool,
}

/// A file within the torrent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Slash-joined relative path within the torrent
    pub path: String,
    /// File size in bytes
    pub length: u64,
    /// Byte offset in the concatenated file stream
    pub offset: u64,
    /// Whether this file should be materialized on completion
    pub selected: bool,
}

impl Metainfo {
    /// Parse a .torrent file from bytes
    ///
    /// `fallback_name` is used when the info dict has no `name` key;
    /// callers pass the source file stem.
    pub fn parse(data: &[u8], fallback_name: &str) -> Result<Self> {
        let root = BencodeValue::decode(data)?;
        let dict = root.as_dict().ok_or_else(|| {
            EngineError::metadata(MetadataErrorKind::NotADict, "Root must be a dictionary")
        })?;

        let info_value = dict
            .get(b"info".as_slice())
            .filter(|v| v.is_dict())
            .ok_or_else(|| {
                EngineError::metadata(
                    MetadataErrorKind::MissingInfoDict,
                    "Missing 'info' dictionary",
                )
            })?;

        // The info-hash is SHA-1 over the canonical (sorted-key)
        // re-encoding of the parsed info dict. For torrents whose
        // encoder did not sort keys this differs from BEP 3's hash of
        // the original byte span; ids here only need to be a stable
        // function of the metadata, so the canonical form is used.
        let info_hash = Self::calculate_info_hash(info_value);

        let info = info_value
            .as_dict()
            .ok_or_else(|| EngineError::Internal("info filtered as dict".into()))?;

        let name = info
            .get(b"name".as_slice())
            .and_then(|v| v.as_string())
            .unwrap_or(fallback_name)
            .to_string();

        let piece_length = info
            .get(b"piece length".as_slice())
            .and_then(|v| v.as_uint())
            .filter(|&n| n > 0)
            .ok_or_else(|| {
                EngineError::metadata(
                    MetadataErrorKind::BadPieceLength,
                    "Missing or non-positive 'piece length'",
                )
            })?;

        let pieces_bytes = info
            .get(b"pieces".as_slice())
            .and_then(|v| v.as_bytes())
            .ok_or_else(|| {
                EngineError::metadata(MetadataErrorKind::BadPieceTable, "Missing 'pieces'")
            })?;

        if pieces_bytes.len() % 20 != 0 {
            return Err(EngineError::metadata(
                MetadataErrorKind::BadPieceTable,
                format!(
                    "Pieces length {} is not a multiple of 20",
                    pieces_bytes.len()
                ),
            ));
        }

        let (files, total_size, is_single_file) =
            if let Some(files_value) = info.get(b"files".as_slice()) {
                let (files, total_size) = Self::parse_files(files_value)?;
                (files, total_size, false)
            } else {
                let length = info
                    .get(b"length".as_slice())
                    .and_then(|v| v.as_uint())
                    .ok_or_else(|| {
                        EngineError::metadata(
                            MetadataErrorKind::MissingLength,
                            "Missing 'length' for single-file torrent",
                        )
                    })?;
                let file = FileEntry {
                    path: name.clone(),
                    length,
                    offset: 0,
                    selected: true,
                };
                (vec![file], length, true)
            };

        let expected_pieces = total_size.div_ceil(piece_length);
        if (pieces_bytes.len() / 20) as u64 != expected_pieces {
            return Err(EngineError::metadata(
                MetadataErrorKind::BadPieceTable,
                format!(
                    "Piece count mismatch: have {}, expected {} for {} bytes with {} byte pieces",
                    pieces_bytes.len() / 20,
                    expected_pieces,
                    total_size,
                    piece_length
                ),
            ));
        }

        let pieces = pieces_bytes
            .chunks_exact(20)
            .enumerate()
            .map(|(index, chunk)| {
                let mut hash = [0u8; 20];
                hash.copy_from_slice(chunk);
                let size = std::cmp::min(piece_length, total_size - index as u64 * piece_length);
                Piece {
                    index,
                    size,
                    hash,
                    downloaded: false,
                }
            })
            .collect();

        Ok(Metainfo {
            info_hash,
            name,
            piece_length,
            pieces,
            files,
            total_size,
            is_single_file,
        })
    }

    /// Calculate SHA-1 over the canonical encoding of the info dict
    fn calculate_info_hash(info: &BencodeValue) -> Sha1Hash {
        let mut hasher = Sha1::new();
        hasher.update(info.encode());
        hasher.finalize().into()
    }

    /// Parse the files list for multi-file torrents
    fn parse_files(value: &BencodeValue) -> Result<(Vec<FileEntry>, u64)> {
        let files_list = value.as_list().ok_or_else(|| {
            EngineError::metadata(MetadataErrorKind::BadFileEntry, "'files' must be a list")
        })?;

        let mut files = Vec::new();
        let mut offset = 0u64;

        for file_value in files_list {
            let file_dict = file_value.as_dict().ok_or_else(|| {
                EngineError::metadata(
                    MetadataErrorKind::BadFileEntry,
                    "File entry must be a dictionary",
                )
            })?;

            let length = file_dict
                .get(b"length".as_slice())
                .and_then(|v| v.as_uint())
                .ok_or_else(|| {
                    EngineError::metadata(
                        MetadataErrorKind::BadFileEntry,
                        "Missing 'length' in file entry",
                    )
                })?;

            let path_list = file_dict
                .get(b"path".as_slice())
                .and_then(|v| v.as_list())
                .ok_or_else(|| {
                    EngineError::metadata(
                        MetadataErrorKind::BadFileEntry,
                        "'path' must be a list of strings",
                    )
                })?;

            let mut components = Vec::with_capacity(path_list.len());
            for component in path_list {
                let s = component.as_string().ok_or_else(|| {
                    EngineError::metadata(
                        MetadataErrorKind::BadFileEntry,
                        "Path component must be a string",
                    )
                })?;
                components.push(s);
            }

            files.push(FileEntry {
                path: components.join("/"),
                length,
                offset,
                selected: true,
            });

            // Lengths are attacker-controlled; the running sum must not wrap
            offset = offset.checked_add(length).ok_or_else(|| {
                EngineError::metadata(
                    MetadataErrorKind::BadFileEntry,
                    "File lengths overflow the total size",
                )
            })?;
        }

        Ok((files, offset))
    }

    /// Get the info_hash as a hex string
    pub fn info_hash_hex(&self) -> String {
        hex::encode(self.info_hash)
    }

    /// Get the total number of pieces
    pub fn num_pieces(&self) -> usize {
        self.pieces.len()
    }
}
