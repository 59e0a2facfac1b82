use std::{fs, io::ErrorKind, path::PathBuf};

use alloy::primitives::B256;
use anyhow::Result;
use ssz::{Decode, Encode};
use tracing::{debug, warn};
use tree_hash::TreeHash;

use crate::{config::client_config::Config, consensus::types::BeaconBlockHeader};

const FINALIZED_HEADER_FILE: &str = "finalized_header";

/// Where the client resumes from across restarts.
pub trait Database {
    fn new(config: &Config) -> Result<Self>
    where
        Self: Sized;
    fn save_finalized_header(&self, header: &BeaconBlockHeader) -> Result<()>;
    /// Block root to bootstrap from on the next start.
    fn load_checkpoint(&self) -> Result<B256>;
}

/// Keeps the last finalized header as SSZ in the data directory. Its block root is the next
/// checkpoint.
#[derive(Clone, Debug)]
pub struct FileDB {
    data_dir: PathBuf,
    default_checkpoint: B256,
}

impl Database for FileDB {
    fn new(config: &Config) -> Result<Self> {
        if let Some(data_dir) = &config.data_dir {
            return Ok(FileDB {
                data_dir: data_dir.to_path_buf(),
                default_checkpoint: config.default_checkpoint,
            });
        }

        anyhow::bail!("data dir not in config")
    }

    fn save_finalized_header(&self, header: &BeaconBlockHeader) -> Result<()> {
        fs::create_dir_all(&self.data_dir)?;
        fs::write(self.data_dir.join(FINALIZED_HEADER_FILE), header.as_ssz_bytes())?;
        debug!(slot = header.slot, "Saved finalized header");
        Ok(())
    }

    fn load_checkpoint(&self) -> Result<B256> {
        let path = self.data_dir.join(FINALIZED_HEADER_FILE);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(self.default_checkpoint),
            Err(err) => {
                return Err(anyhow::Error::new(err)
                    .context(format!("failed to read {}", path.display())))
            }
        };

        match BeaconBlockHeader::from_ssz_bytes(&bytes) {
            Ok(header) => Ok(header.tree_hash_root()),
            Err(err) => {
                warn!(?err, "Stored finalized header is corrupt, using default checkpoint");
                Ok(self.default_checkpoint)
            }
        }
    }
}

/// Never persists. The checkpoint comes from the config.
#[derive(Clone, Debug)]
pub struct ConfigDB {
    checkpoint: B256,
}

impl Database for ConfigDB {
    fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            checkpoint: config.checkpoint.unwrap_or(config.default_checkpoint),
        })
    }

    fn load_checkpoint(&self) -> Result<B256> {
        Ok(self.checkpoint)
    }

    fn save_finalized_header(&self, _header: &BeaconBlockHeader) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(data_dir: Option<PathBuf>) -> Config {
        Config {
            data_dir,
            default_checkpoint: B256::repeat_byte(7),
            ..Default::default()
        }
    }

    #[test]
    fn file_db_requires_data_dir() {
        assert!(FileDB::new(&config(None)).is_err());
    }

    #[test]
    fn file_db_round_trips_finalized_root() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db = FileDB::new(&config(Some(temp_dir.path().join("db")))).unwrap();
        assert_eq!(db.load_checkpoint().unwrap(), B256::repeat_byte(7));

        let header = BeaconBlockHeader {
            slot: 4242,
            state_root: B256::repeat_byte(3),
            ..Default::default()
        };
        db.save_finalized_header(&header).unwrap();
        assert_eq!(db.load_checkpoint().unwrap(), header.tree_hash_root());
    }

    #[test]
    fn file_db_ignores_corrupt_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        fs::write(temp_dir.path().join(FINALIZED_HEADER_FILE), [1, 2, 3]).unwrap();
        let db = FileDB::new(&config(Some(temp_dir.path().to_path_buf()))).unwrap();
        assert_eq!(db.load_checkpoint().unwrap(), B256::repeat_byte(7));
    }

    #[test]
    fn file_db_propagates_read_errors() {
        let temp_dir = tempfile::tempdir().unwrap();
        // A directory in place of the file cannot be read.
        fs::create_dir(temp_dir.path().join(FINALIZED_HEADER_FILE)).unwrap();
        let db = FileDB::new(&config(Some(temp_dir.path().to_path_buf()))).unwrap();
        assert!(db.load_checkpoint().is_err());
    }

    #[test]
    fn config_db_prefers_explicit_checkpoint() {
        let mut config = config(None);
        assert_eq!(
            ConfigDB::new(&config).unwrap().load_checkpoint().unwrap(),
            B256::repeat_byte(7)
        );

        config.checkpoint = Some(B256::repeat_byte(9));
        let db = ConfigDB::new(&config).unwrap();
        db.save_finalized_header(&BeaconBlockHeader::default()).unwrap();
        assert_eq!(db.load_checkpoint().unwrap(), B256::repeat_byte(9));
    }
}
