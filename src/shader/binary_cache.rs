//! Two-tier program binary cache.
//!
//! Tier one is an in-memory LRU bounded by bytes and entry count; tier two
//! is a directory of one file per program hash plus an `index.dat`. Disk
//! entries record the context version/extension hashes they were produced
//! under; a mismatch makes the entry invisible rather than an error.
//!
//! Entry files: header `{magic, version, gl_version_hash, extension_hash,
//! binary_format, payload_length}` (six little-endian u32s, payload_length
//! is the uncompressed size) followed by the payload, deflate-compressed
//! when the configuration asks for it.

use std::collections::VecDeque;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use fxhash::FxHashMap;

use crate::backend::ProgramBinary;
use crate::config::Config;
use crate::error::CacheError;

const MAGIC: u32 = 0x4438_474C; // "LG8D" on disk, read back as one word
const FORMAT_VERSION: u32 = 1;
const HEADER_LEN: usize = 24;
const INDEX_FILE: &str = "index.dat";
const INDEX_HASH_FIELD: usize = 64;

#[derive(Default, Clone, Debug)]
pub struct CacheStatistics {
    pub memory_hits: usize,
    pub memory_misses: usize,
    pub memory_entries: usize,
    pub memory_bytes: usize,
    pub disk_hits: usize,
    pub disk_misses: usize,
    pub disk_entries: usize,
    pub binary_load_failures: usize,
    pub binary_save_failures: usize,
}

struct MemEntry {
    binary: ProgramBinary,
    byte_size: usize,
    last_access: u64,
    access_count: u64,
}

#[derive(Clone, Debug)]
struct IndexEntry {
    filename: String,
    size: u32,
    creation_time: u64,
    last_access_time: u64,
}

struct MemCache {
    map: FxHashMap<String, MemEntry>,
    tick: u64,
    total_bytes: usize,
}

/// Device-scoped binary cache (one per device, never a global).
pub struct ShaderBinaryCache {
    enabled: bool,
    dir: PathBuf,
    max_memory_bytes: usize,
    max_memory_entries: usize,
    max_disk_bytes: u64,
    ttl: Duration,
    compress: bool,
    gl_version_hash: u32,
    extension_hash: u32,
    mem: Mutex<MemCache>,
    index: Mutex<FxHashMap<String, IndexEntry>>,
    /// Keys with a disk write in flight; a second writer backs off.
    writing: Mutex<Vec<String>>,
    stats: Mutex<CacheStatistics>,
}

impl ShaderBinaryCache {
    pub fn new(config: &Config, gl_version_hash: u32, extension_hash: u32) -> ShaderBinaryCache {
        ShaderBinaryCache {
            enabled: !config.disable_shader_cache,
            dir: config.shader_cache_dir.clone(),
            max_memory_bytes: config.max_memory_cache_bytes,
            max_memory_entries: config.max_memory_cache_entries,
            max_disk_bytes: config.max_disk_cache_bytes,
            ttl: config.disk_cache_ttl,
            compress: config.compress_disk_cache,
            gl_version_hash,
            extension_hash,
            mem: Mutex::new(MemCache {
                map: FxHashMap::default(),
                tick: 0,
                total_bytes: 0,
            }),
            index: Mutex::new(FxHashMap::default()),
            writing: Mutex::new(Vec::new()),
            stats: Mutex::new(CacheStatistics::default()),
        }
    }

    /// Create the cache directory and read the index. Failure disables the
    /// disk tier only.
    pub fn initialize(&self) -> bool {
        if !self.enabled {
            return false;
        }
        if let Err(err) = fs::create_dir_all(&self.dir) {
            warn!("shader cache directory {:?} unusable: {}", self.dir, err);
            return false;
        }
        match self.load_index() {
            Ok(entries) => {
                debug!("shader cache index loaded, {} entries", entries);
                true
            }
            Err(err) => {
                debug!("no shader cache index ({}), starting empty", err);
                true
            }
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    // -- store ---------------------------------------------------------------

    /// Store a binary under `hash`. A second store under the same hash with
    /// a different payload size is rejected and leaves the original intact.
    pub fn store(&self, hash: &str, binary: &ProgramBinary) -> Result<(), CacheError> {
        if !self.enabled {
            return Ok(());
        }

        {
            let mut mem = self.mem.lock().unwrap();
            if let Some(existing) = mem.map.get(hash) {
                if existing.binary.data.len() != binary.data.len() {
                    let err = CacheError::SizeMismatch {
                        hash: hash.to_string(),
                        stored: existing.binary.data.len(),
                        new: binary.data.len(),
                    };
                    self.stats.lock().unwrap().binary_save_failures += 1;
                    return Err(err);
                }
                return Ok(()); // idempotent
            }
            let tick = mem.tick;
            mem.tick += 1;
            mem.total_bytes += binary.data.len();
            mem.map.insert(
                hash.to_string(),
                MemEntry {
                    binary: binary.clone(),
                    byte_size: binary.data.len(),
                    last_access: tick,
                    access_count: 0,
                },
            );
        }
        self.trim_memory();

        // size-stability also holds on disk
        {
            let index = self.index.lock().unwrap();
            if let Some(entry) = index.get(hash) {
                if entry.size as usize != binary.data.len() {
                    self.stats.lock().unwrap().binary_save_failures += 1;
                    return Err(CacheError::SizeMismatch {
                        hash: hash.to_string(),
                        stored: entry.size as usize,
                        new: binary.data.len(),
                    });
                }
                return Ok(());
            }
        }

        {
            let mut writing = self.writing.lock().unwrap();
            if writing.iter().any(|k| k == hash) {
                return Ok(());
            }
            writing.push(hash.to_string());
        }

        let result = self.write_entry_file(hash, binary);

        {
            let mut writing = self.writing.lock().unwrap();
            writing.retain(|k| k != hash);
        }

        match result {
            Ok(()) => {
                let now = unix_now();
                self.index.lock().unwrap().insert(
                    hash.to_string(),
                    IndexEntry {
                        filename: entry_filename(hash),
                        size: binary.data.len() as u32,
                        creation_time: now,
                        last_access_time: now,
                    },
                );
                self.save_index();
                Ok(())
            }
            Err(err) => {
                self.stats.lock().unwrap().binary_save_failures += 1;
                warn!("failed to persist shader binary {}: {}", hash, err);
                Err(err)
            }
        }
    }

    fn write_entry_file(&self, hash: &str, binary: &ProgramBinary) -> Result<(), CacheError> {
        let payload = if self.compress {
            let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(&binary.data)?;
            encoder.finish()?
        } else {
            binary.data.clone()
        };

        let mut file_bytes = Vec::with_capacity(HEADER_LEN + payload.len());
        for word in [
            MAGIC,
            FORMAT_VERSION,
            self.gl_version_hash,
            self.extension_hash,
            binary.format,
            binary.data.len() as u32,
        ] {
            file_bytes.extend_from_slice(&word.to_le_bytes());
        }
        file_bytes.extend_from_slice(&payload);

        fs::write(self.dir.join(entry_filename(hash)), file_bytes)?;
        Ok(())
    }

    // -- load ----------------------------------------------------------------

    /// Memory first, then disk. Context mismatches and unreadable entries
    /// report as a plain miss.
    pub fn load(&self, hash: &str) -> Option<ProgramBinary> {
        if !self.enabled {
            return None;
        }

        {
            let mut mem = self.mem.lock().unwrap();
            let tick = mem.tick;
            mem.tick += 1;
            if let Some(entry) = mem.map.get_mut(hash) {
                entry.last_access = tick;
                entry.access_count += 1;
                self.stats.lock().unwrap().memory_hits += 1;
                return Some(entry.binary.clone());
            }
        }
        self.stats.lock().unwrap().memory_misses += 1;

        match self.load_from_disk(hash) {
            Ok(Some(binary)) => {
                self.stats.lock().unwrap().disk_hits += 1;
                if let Some(entry) = self.index.lock().unwrap().get_mut(hash) {
                    entry.last_access_time = unix_now();
                }
                // promote into the memory tier
                let mut mem = self.mem.lock().unwrap();
                let tick = mem.tick;
                mem.tick += 1;
                mem.total_bytes += binary.data.len();
                mem.map.insert(
                    hash.to_string(),
                    MemEntry {
                        binary: binary.clone(),
                        byte_size: binary.data.len(),
                        last_access: tick,
                        access_count: 1,
                    },
                );
                drop(mem);
                self.trim_memory();
                Some(binary)
            }
            Ok(None) => {
                self.stats.lock().unwrap().disk_misses += 1;
                None
            }
            Err(err) => {
                debug!("shader binary {} unreadable: {}", hash, err);
                let mut stats = self.stats.lock().unwrap();
                stats.disk_misses += 1;
                stats.binary_load_failures += 1;
                None
            }
        }
    }

    fn load_from_disk(&self, hash: &str) -> Result<Option<ProgramBinary>, CacheError> {
        let path = self.dir.join(entry_filename(hash));
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(_) => return Ok(None),
        };
        if bytes.len() < HEADER_LEN {
            return Err(CacheError::BadHeader);
        }
        let word = |i: usize| -> u32 {
            u32::from_le_bytes([bytes[i * 4], bytes[i * 4 + 1], bytes[i * 4 + 2], bytes[i * 4 + 3]])
        };
        if word(0) != MAGIC || word(1) != FORMAT_VERSION {
            return Err(CacheError::BadHeader);
        }
        if word(2) != self.gl_version_hash || word(3) != self.extension_hash {
            // built for a different context; treat as absent
            return Ok(None);
        }
        let format = word(4);
        let payload_length = word(5) as usize;
        let payload = &bytes[HEADER_LEN..];

        let data = if payload.len() == payload_length {
            payload.to_vec()
        } else {
            let mut decoded = Vec::with_capacity(payload_length);
            ZlibDecoder::new(payload).read_to_end(&mut decoded)?;
            if decoded.len() != payload_length {
                return Err(CacheError::BadHeader);
            }
            decoded
        };

        Ok(Some(ProgramBinary { format, data }))
    }

    // -- maintenance ---------------------------------------------------------

    pub fn trim_memory(&self) {
        let mut mem = self.mem.lock().unwrap();
        while mem.map.len() > self.max_memory_entries || mem.total_bytes > self.max_memory_bytes {
            let oldest = mem
                .map
                .iter()
                .min_by_key(|(_, e)| e.last_access)
                .map(|(k, _)| k.clone());
            match oldest {
                Some(key) => {
                    if let Some(entry) = mem.map.remove(&key) {
                        mem.total_bytes -= entry.byte_size;
                    }
                }
                None => break,
            }
        }
    }

    /// Drop disk entries past the TTL, then oldest-first until the size
    /// limit holds.
    pub fn trim_disk(&self) {
        if !self.enabled {
            return;
        }
        let now = unix_now();
        let ttl_secs = self.ttl.as_secs();
        let mut doomed: Vec<String> = Vec::new();
        {
            let index = self.index.lock().unwrap();
            let mut total: u64 = 0;
            let mut by_age: VecDeque<(&String, &IndexEntry)> = {
                let mut entries: Vec<_> = index.iter().collect();
                entries.sort_by_key(|(_, e)| e.last_access_time);
                entries.into()
            };
            for (key, entry) in by_age.iter() {
                if now.saturating_sub(entry.creation_time) > ttl_secs {
                    doomed.push((*key).clone());
                } else {
                    total += entry.size as u64;
                }
            }
            while total > self.max_disk_bytes {
                match by_age.pop_front() {
                    Some((key, entry)) => {
                        if !doomed.contains(key) {
                            doomed.push(key.clone());
                            total -= entry.size as u64;
                        }
                    }
                    None => break,
                }
            }
        }
        if doomed.is_empty() {
            return;
        }
        let mut index = self.index.lock().unwrap();
        for key in doomed {
            if let Some(entry) = index.remove(&key) {
                let _ = fs::remove_file(self.dir.join(&entry.filename));
            }
        }
        drop(index);
        self.save_index();
    }

    pub fn clear_memory(&self) {
        let mut mem = self.mem.lock().unwrap();
        mem.map.clear();
        mem.total_bytes = 0;
    }

    pub fn clear_disk(&self) {
        let mut index = self.index.lock().unwrap();
        for entry in index.values() {
            let _ = fs::remove_file(self.dir.join(&entry.filename));
        }
        index.clear();
        drop(index);
        self.save_index();
    }

    pub fn clear_all(&self) {
        self.clear_memory();
        self.clear_disk();
    }

    pub fn statistics(&self) -> CacheStatistics {
        let mut stats = self.stats.lock().unwrap().clone();
        let mem = self.mem.lock().unwrap();
        stats.memory_entries = mem.map.len();
        stats.memory_bytes = mem.total_bytes;
        stats.disk_entries = self.index.lock().unwrap().len();
        stats
    }

    // -- index ---------------------------------------------------------------

    /// `{entries:u32}` then fixed records `{hash:64, filename_offset:u32,
    /// filename_length:u32, size:u32, creation:u64, last_access:u64}`
    /// followed by the filename blob.
    pub fn save_index(&self) {
        if !self.enabled {
            return;
        }
        let index = self.index.lock().unwrap();
        let mut records = Vec::new();
        let mut names = Vec::new();
        for (hash, entry) in index.iter() {
            let mut hash_field = [0u8; INDEX_HASH_FIELD];
            let bytes = hash.as_bytes();
            hash_field[..bytes.len().min(INDEX_HASH_FIELD)]
                .copy_from_slice(&bytes[..bytes.len().min(INDEX_HASH_FIELD)]);
            records.extend_from_slice(&hash_field);
            records.extend_from_slice(&(names.len() as u32).to_le_bytes());
            records.extend_from_slice(&(entry.filename.len() as u32).to_le_bytes());
            records.extend_from_slice(&entry.size.to_le_bytes());
            records.extend_from_slice(&entry.creation_time.to_le_bytes());
            records.extend_from_slice(&entry.last_access_time.to_le_bytes());
            names.extend_from_slice(entry.filename.as_bytes());
        }
        let mut bytes = Vec::with_capacity(4 + records.len() + names.len());
        bytes.extend_from_slice(&(index.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&records);
        bytes.extend_from_slice(&names);
        if let Err(err) = fs::write(self.dir.join(INDEX_FILE), bytes) {
            warn!("failed to write shader cache index: {}", err);
        }
    }

    fn load_index(&self) -> Result<usize, CacheError> {
        const RECORD_LEN: usize = INDEX_HASH_FIELD + 4 + 4 + 4 + 8 + 8;
        let bytes = fs::read(self.dir.join(INDEX_FILE))?;
        if bytes.len() < 4 {
            return Err(CacheError::BadHeader);
        }
        let count = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
        let records_end = 4 + count * RECORD_LEN;
        if bytes.len() < records_end {
            return Err(CacheError::BadHeader);
        }
        let names = &bytes[records_end..];
        let mut index = self.index.lock().unwrap();
        index.clear();
        for i in 0..count {
            let rec = &bytes[4 + i * RECORD_LEN..4 + (i + 1) * RECORD_LEN];
            let hash_end = rec[..INDEX_HASH_FIELD]
                .iter()
                .position(|b| *b == 0)
                .unwrap_or(INDEX_HASH_FIELD);
            let hash = String::from_utf8_lossy(&rec[..hash_end]).into_owned();
            let u32_at = |off: usize| {
                u32::from_le_bytes([rec[off], rec[off + 1], rec[off + 2], rec[off + 3]])
            };
            let u64_at = |off: usize| {
                let mut buf = [0u8; 8];
                buf.copy_from_slice(&rec[off..off + 8]);
                u64::from_le_bytes(buf)
            };
            let name_off = u32_at(INDEX_HASH_FIELD) as usize;
            let name_len = u32_at(INDEX_HASH_FIELD + 4) as usize;
            if name_off + name_len > names.len() {
                return Err(CacheError::BadHeader);
            }
            let filename =
                String::from_utf8_lossy(&names[name_off..name_off + name_len]).into_owned();
            index.insert(
                hash,
                IndexEntry {
                    filename,
                    size: u32_at(INDEX_HASH_FIELD + 8),
                    creation_time: u64_at(INDEX_HASH_FIELD + 12),
                    last_access_time: u64_at(INDEX_HASH_FIELD + 20),
                },
            );
        }
        Ok(index.len())
    }

    /// Flush the index; called on device destruction.
    pub fn shutdown(&self) {
        self.save_index();
    }
}

fn entry_filename(hash: &str) -> String {
    format!("{}.bin", hash)
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Canonical text form of a program key for filenames and index records.
pub fn hash_string(vs_hash: u64, ps_hash: u64) -> String {
    format!("{:016x}{:016x}", vs_hash, ps_hash)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_cache(dir: &Path) -> ShaderBinaryCache {
        let mut config = Config::default();
        config.shader_cache_dir = dir.to_path_buf();
        let cache = ShaderBinaryCache::new(&config, 0x1111, 0x2222);
        assert!(cache.initialize());
        cache
    }

    fn binary(len: usize, fill: u8) -> ProgramBinary {
        ProgramBinary {
            format: 0xD00D,
            data: vec![fill; len],
        }
    }

    #[test]
    fn store_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let cache = test_cache(dir.path());
        let bin = binary(100, 7);
        cache.store("cafe", &bin).unwrap();
        assert_eq!(cache.load("cafe"), Some(bin));
        let stats = cache.statistics();
        assert_eq!(stats.memory_hits, 1);
    }

    #[test]
    fn disk_survives_memory_clear() {
        let dir = tempfile::tempdir().unwrap();
        let cache = test_cache(dir.path());
        let bin = binary(64, 3);
        cache.store("beef", &bin).unwrap();
        cache.clear_memory();
        assert_eq!(cache.load("beef"), Some(bin));
        assert_eq!(cache.statistics().disk_hits, 1);
    }

    #[test]
    fn second_instance_reads_the_index() {
        let dir = tempfile::tempdir().unwrap();
        {
            let cache = test_cache(dir.path());
            cache.store("f00d", &binary(32, 9)).unwrap();
            cache.shutdown();
        }
        let cache = test_cache(dir.path());
        assert_eq!(cache.statistics().disk_entries, 1);
        assert_eq!(cache.load("f00d"), Some(binary(32, 9)));
    }

    #[test]
    fn size_change_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let cache = test_cache(dir.path());
        cache.store("aaaa", &binary(100, 1)).unwrap();
        let err = cache.store("aaaa", &binary(101, 1)).unwrap_err();
        assert!(matches!(err, CacheError::SizeMismatch { .. }));
        // original bytes intact
        assert_eq!(cache.load("aaaa"), Some(binary(100, 1)));
    }

    #[test]
    fn same_size_store_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let cache = test_cache(dir.path());
        cache.store("bbbb", &binary(100, 1)).unwrap();
        cache.store("bbbb", &binary(100, 2)).unwrap();
        // first write wins
        assert_eq!(cache.load("bbbb"), Some(binary(100, 1)));
    }

    #[test]
    fn context_mismatch_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        {
            let cache = test_cache(dir.path());
            cache.store("cccc", &binary(48, 5)).unwrap();
            cache.shutdown();
        }
        let mut config = Config::default();
        config.shader_cache_dir = dir.path().to_path_buf();
        let other_context = ShaderBinaryCache::new(&config, 0x9999, 0x2222);
        assert!(other_context.initialize());
        assert_eq!(other_context.load("cccc"), None);
        assert_eq!(other_context.statistics().binary_load_failures, 0);
    }

    #[test]
    fn memory_lru_evicts_oldest() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.shader_cache_dir = dir.path().to_path_buf();
        config.max_memory_cache_entries = 2;
        let cache = ShaderBinaryCache::new(&config, 1, 2);
        assert!(cache.initialize());

        cache.store("k1", &binary(10, 1)).unwrap();
        cache.store("k2", &binary(10, 2)).unwrap();
        let _ = cache.load("k1"); // refresh k1
        cache.store("k3", &binary(10, 3)).unwrap();

        let stats = cache.statistics();
        assert_eq!(stats.memory_entries, 2);
        // k2 went cold and was evicted from memory; disk still serves it
        let before = cache.statistics().disk_hits;
        assert!(cache.load("k2").is_some());
        assert_eq!(cache.statistics().disk_hits, before + 1);
    }

    #[test]
    fn disabled_cache_stores_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.shader_cache_dir = dir.path().to_path_buf();
        config.disable_shader_cache = true;
        let cache = ShaderBinaryCache::new(&config, 1, 2);
        assert!(!cache.initialize());
        cache.store("dddd", &binary(8, 1)).unwrap();
        assert_eq!(cache.load("dddd"), None);
    }

    #[test]
    fn compressed_payloads_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let cache = test_cache(dir.path());
        // highly compressible payload
        let bin = binary(4096, 0);
        cache.store("eeee", &bin).unwrap();
        cache.clear_memory();
        assert_eq!(cache.load("eeee"), Some(bin));
        // the stored file is smaller than the payload
        let file_len = fs::metadata(dir.path().join("eeee.bin")).unwrap().len();
        assert!(file_len < 4096);
    }

    #[test]
    fn hash_string_is_stable() {
        assert_eq!(
            hash_string(0x1234, 0),
            "00000000000012340000000000000000"
        );
    }
}
