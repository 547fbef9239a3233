// SPDX-License-Identifier: AGPL-3.0-only

//! Atomare Ablage der Evidenz je Session unter `sessions/<hex(header_digest)>.bin`.

use anyhow::{anyhow, Result};
use por_codec::{decode_exact, encode_to_vec, CodecError, Decodable, Encodable};
use por_crypto::Hash32;
use por_types::{RelayReceipt, Session, SessionHeader};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Persistierte Form einer Session-Evidenz (Receipts nach Hash sortiert)
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionRecord {
    pub session: Session,
    pub sealed: bool,
    pub receipts: Vec<RelayReceipt>,
}

impl Encodable for SessionRecord {
    fn encode<W: Write>(&self, w: &mut W) -> Result<(), CodecError> {
        self.session.encode(w)?;
        self.sealed.encode(w)?;
        self.receipts.encode(w)
    }
    fn encoded_len(&self) -> usize {
        self.session.encoded_len() + 1 + self.receipts.encoded_len()
    }
}
impl Decodable for SessionRecord {
    fn decode<R: Read>(r: &mut R) -> Result<Self, CodecError> {
        Ok(Self {
            session: Session::decode(r)?,
            sealed: bool::decode(r)?,
            receipts: Vec::<RelayReceipt>::decode(r)?,
        })
    }
}

pub struct EvidenceFileStore {
    sessions_dir: PathBuf,
    fsync: bool,
}

impl EvidenceFileStore {
    pub fn open<P: AsRef<Path>>(root: P, fsync: bool) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let sessions_dir = root.join("sessions");
        fs::create_dir_all(&sessions_dir)?;
        if fsync {
            Self::fsync_dir(&root)?;
            Self::fsync_dir(&sessions_dir)?;
        }
        Ok(Self { sessions_dir, fsync })
    }

    fn fsync_dir(dir: &Path) -> Result<()> {
        let f = OpenOptions::new().read(true).open(dir)?;
        f.sync_all()?;
        Ok(())
    }

    fn write_atomic(dir: &Path, file_name: &str, data: &[u8], fsync: bool) -> Result<()> {
        let target = dir.join(file_name);
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(data)?;
        if fsync {
            tmp.as_file().sync_all()?;
        }
        tmp.persist(&target)
            .map_err(|e| anyhow!("persist failed: {}", e))?;
        if fsync {
            Self::fsync_dir(dir)?;
        }
        Ok(())
    }

    fn read_all(path: &Path) -> Result<Vec<u8>> {
        let mut f = File::open(path)?;
        let mut buf = Vec::new();
        f.read_to_end(&mut buf)?;
        Ok(buf)
    }

    fn file_name(digest: &Hash32) -> String {
        format!("{}.bin", hex::encode(digest))
    }

    pub fn path_for(&self, header: &SessionHeader) -> PathBuf {
        self.sessions_dir.join(Self::file_name(&header.digest()))
    }

    pub fn put(&self, rec: &SessionRecord) -> Result<Hash32> {
        let digest = rec.session.header.digest();
        let buf = encode_to_vec(rec)?;
        Self::write_atomic(&self.sessions_dir, &Self::file_name(&digest), &buf, self.fsync)?;
        Ok(digest)
    }

    pub fn get(&self, header: &SessionHeader) -> Result<Option<SessionRecord>> {
        let path = self.path_for(header);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(decode_exact(&Self::read_all(&path)?)?))
    }

    pub fn remove(&self, header: &SessionHeader) -> Result<bool> {
        let path = self.path_for(header);
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(&path)?;
        if self.fsync {
            Self::fsync_dir(&self.sessions_dir)?;
        }
        Ok(true)
    }

    /// Alle gespeicherten Sessions; fremde Dateien (z.B. verwaiste Tempfiles) werden übersprungen
    pub fn load_all(&self) -> Result<Vec<SessionRecord>> {
        let mut names: Vec<PathBuf> = Vec::new();
        for entry in fs::read_dir(&self.sessions_dir)? {
            let p = entry?.path();
            if p.extension().is_some_and(|e| e == "bin") {
                names.push(p);
            }
        }
        names.sort();
        let mut out = Vec::with_capacity(names.len());
        for p in names {
            let rec: SessionRecord = decode_exact(&Self::read_all(&p)?)
                .map_err(|e| anyhow!("decode {}: {}", p.display(), e))?;
            out.push(rec);
        }
        Ok(out)
    }
}
