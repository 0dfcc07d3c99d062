//! Shader source hot reload.
//!
//! When enabled, every linked program's generated sources are dumped to a
//! watch directory. `check_for_changes` polls the files; an edited source
//! is recompiled and the cache entry's program object swapped in place,
//! so the next draw picks it up without restarting the application.
//! Device-scoped: one manager per device, no globals.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use fxhash::FxHashMap;

use crate::backend::{RenderBackend, ShaderStage};

use super::program::{ProgramKey, ShaderProgramManager};

struct WatchedProgram {
    key: ProgramKey,
    vertex_path: PathBuf,
    fragment_path: PathBuf,
    vertex_hash: u64,
    fragment_hash: u64,
}

pub struct ShaderHotReloadManager {
    watch_dir: PathBuf,
    programs: Mutex<Vec<WatchedProgram>>,
    registered: Mutex<FxHashMap<ProgramKey, ()>>,
}

fn content_hash(text: &str) -> u64 {
    const OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01B3;
    let mut hash = OFFSET_BASIS;
    for byte in text.as_bytes() {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

fn file_stem(key: ProgramKey) -> String {
    if key.fixed_function {
        format!("ff_{:016x}", key.vs_hash)
    } else {
        format!("prog_{:016x}_{:016x}", key.vs_hash, key.ps_hash)
    }
}

impl ShaderHotReloadManager {
    pub fn new(watch_dir: &Path) -> ShaderHotReloadManager {
        ShaderHotReloadManager {
            watch_dir: watch_dir.to_path_buf(),
            programs: Mutex::new(Vec::new()),
            registered: Mutex::new(FxHashMap::default()),
        }
    }

    pub fn watch_dir(&self) -> &Path {
        &self.watch_dir
    }

    /// Dump a program's sources and start watching them. Registering the
    /// same key twice is a no-op.
    pub fn register_program(&self, key: ProgramKey, vertex_source: &str, fragment_source: &str) {
        {
            let mut registered = self.registered.lock().unwrap();
            if registered.contains_key(&key) {
                return;
            }
            registered.insert(key, ());
        }
        if let Err(err) = fs::create_dir_all(&self.watch_dir) {
            warn!("hot reload directory {:?} unusable: {}", self.watch_dir, err);
            return;
        }
        let stem = file_stem(key);
        let vertex_path = self.watch_dir.join(format!("{}.vert", stem));
        let fragment_path = self.watch_dir.join(format!("{}.frag", stem));
        if fs::write(&vertex_path, vertex_source).is_err()
            || fs::write(&fragment_path, fragment_source).is_err()
        {
            warn!("failed to dump shader sources for {:?}", key);
            return;
        }
        self.programs.lock().unwrap().push(WatchedProgram {
            key,
            vertex_path,
            fragment_path,
            vertex_hash: content_hash(vertex_source),
            fragment_hash: content_hash(fragment_source),
        });
        debug!("hot reload watching {}", stem);
    }

    pub fn watched_count(&self) -> usize {
        self.programs.lock().unwrap().len()
    }

    /// Poll every watched file; recompile and swap changed programs.
    /// Returns the number of programs swapped. Runs on the render thread.
    pub fn check_for_changes(
        &self,
        backend: &mut dyn RenderBackend,
        program_manager: &mut ShaderProgramManager,
    ) -> usize {
        let mut swapped = 0;
        let mut programs = self.programs.lock().unwrap();
        for watched in programs.iter_mut() {
            let Ok(vertex_source) = fs::read_to_string(&watched.vertex_path) else {
                continue;
            };
            let Ok(fragment_source) = fs::read_to_string(&watched.fragment_path) else {
                continue;
            };
            let vertex_hash = content_hash(&vertex_source);
            let fragment_hash = content_hash(&fragment_source);
            if vertex_hash == watched.vertex_hash && fragment_hash == watched.fragment_hash {
                continue;
            }

            let relink = (|| {
                let vs = backend.compile_shader(ShaderStage::Vertex, &vertex_source)?;
                let fs = backend.compile_shader(ShaderStage::Fragment, &fragment_source)?;
                backend.link_program(
                    vs,
                    fs,
                    &[
                        ("a_position", 0),
                        ("a_normal", 1),
                        ("a_color", 2),
                        ("a_texcoord0", 3),
                        ("a_texcoord1", 4),
                        ("a_texcoord2", 5),
                        ("a_texcoord3", 6),
                    ],
                )
            })();

            match relink {
                Ok(program) => {
                    info!("hot reload: swapped program {}", file_stem(watched.key));
                    program_manager.replace_program(backend, watched.key, program);
                    watched.vertex_hash = vertex_hash;
                    watched.fragment_hash = fragment_hash;
                    swapped += 1;
                }
                Err(err) => {
                    // keep the old program and the old hashes so the next
                    // edit retries
                    warn!("hot reload recompile failed: {}", err);
                }
            }
        }
        swapped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HeadlessBackend;
    use crate::shader::translator::ShaderDialect;

    fn linked_program(
        backend: &mut HeadlessBackend,
        programs: &mut ShaderProgramManager,
        hash: u64,
    ) -> ProgramKey {
        let entry = programs.get_fixed_function_program(
            backend,
            hash,
            "// vs original\nvoid main() {}\n",
            "// fs original\nvoid main() {}\n",
            None,
        );
        entry.key
    }

    #[test]
    fn unchanged_files_swap_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ShaderHotReloadManager::new(dir.path());
        let mut backend = HeadlessBackend::new();
        let mut programs = ShaderProgramManager::new(ShaderDialect::default());
        let key = linked_program(&mut backend, &mut programs, 1);
        manager.register_program(key, "// vs original\n", "// fs original\n");
        assert_eq!(manager.watched_count(), 1);
        assert_eq!(manager.check_for_changes(&mut backend, &mut programs), 0);
    }

    #[test]
    fn edited_source_swaps_the_program() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ShaderHotReloadManager::new(dir.path());
        let mut backend = HeadlessBackend::new();
        let mut programs = ShaderProgramManager::new(ShaderDialect::default());
        let key = linked_program(&mut backend, &mut programs, 2);
        let before = programs.current_program().unwrap();
        manager.register_program(key, "// vs original\n", "// fs original\n");

        let edited = dir.path().join(format!("ff_{:016x}.frag", 2u64));
        fs::write(&edited, "// fs edited\nvoid main() {}\n").unwrap();

        assert_eq!(manager.check_for_changes(&mut backend, &mut programs), 1);
        // the cache now holds a different program object under the same key
        let entry = programs.get_fixed_function_program(&mut backend, 2, "", "", None);
        assert_ne!(entry.program, before);

        // second poll with no further edits is quiet
        assert_eq!(manager.check_for_changes(&mut backend, &mut programs), 0);
    }

    #[test]
    fn duplicate_registration_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ShaderHotReloadManager::new(dir.path());
        let key = ProgramKey::fixed_function(3);
        manager.register_program(key, "a", "b");
        manager.register_program(key, "a", "b");
        assert_eq!(manager.watched_count(), 1);
    }

    #[test]
    fn failed_recompile_keeps_the_old_program() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ShaderHotReloadManager::new(dir.path());
        let mut backend = HeadlessBackend::new();
        let mut programs = ShaderProgramManager::new(ShaderDialect::default());
        let key = linked_program(&mut backend, &mut programs, 4);
        let before = programs.current_program().unwrap();
        manager.register_program(key, "// vs original\n", "// fs original\n");

        fs::write(
            dir.path().join(format!("ff_{:016x}.vert", 4u64)),
            "// broken edit\n",
        )
        .unwrap();
        backend.fail_compiles = true;
        assert_eq!(manager.check_for_changes(&mut backend, &mut programs), 0);

        let entry = programs.get_fixed_function_program(&mut backend, 4, "", "", None);
        assert_eq!(entry.program, before);
    }
}
