//! Process-wide image cache.
//!
//! Four tables, partitioned by `ref_only`, guarded by a single
//! [`parking_lot::Mutex`], not a per-key sharded map like `dashmap`, since
//! close removes and rebuilds across all four tables as one atomic step,
//! which a sharded map cannot express without its own coordination on top.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::Mutex;

use crate::error::Result;
use crate::image::Image;
use crate::modules::TableRowSource;

/// The process-wide registry, built from `Config::from_env` on first
/// access. Embedders that need isolated caches (tests, multiple independent
/// loader instances in one process) construct their own `Registry::new`
/// instead of going through this singleton.
static GLOBAL: Lazy<Registry> = Lazy::new(|| Registry::new(Config::from_env()));

const DEBUG_ASSEMBLY_UNLOAD_VAR: &str = "MONO_DEBUG_ASSEMBLY_UNLOAD";

/// Runtime configuration read once at [`Registry::new`].
#[derive(Debug, Clone, Default)]
pub struct Config {
  /// When set, `close` renames rather than drops the image record, so
  /// dangling references are easier to diagnose.
  pub debug_assembly_unload: bool,
}

impl Config {
  /// Reads `MONO_DEBUG_ASSEMBLY_UNLOAD` from the environment.
  pub fn from_env() -> Self {
    Self {
      debug_assembly_unload: std::env::var_os(DEBUG_ASSEMBLY_UNLOAD_VAR).is_some(),
    }
  }
}

#[derive(Default)]
struct Tables {
  by_path_normal: HashMap<String, Arc<Image>>,
  by_path_refonly: HashMap<String, Arc<Image>>,
  by_guid_normal: HashMap<String, Arc<Image>>,
  by_guid_refonly: HashMap<String, Arc<Image>>,
}

impl Tables {
  fn by_path(&mut self, ref_only: bool) -> &mut HashMap<String, Arc<Image>> {
    if ref_only {
      &mut self.by_path_refonly
    } else {
      &mut self.by_path_normal
    }
  }

  fn by_guid(&mut self, ref_only: bool) -> &mut HashMap<String, Arc<Image>> {
    if ref_only {
      &mut self.by_guid_refonly
    } else {
      &mut self.by_guid_normal
    }
  }
}

/// The process-wide (or, in tests, per-test) image cache.
pub struct Registry {
  tables: Mutex<Tables>,
  config: Config,
  /// Images retired under `debug_assembly_unload` instead of being
  /// dropped, kept reachable for diagnostics.
  debug_retired: Mutex<Vec<Arc<Image>>>,
}

impl Registry {
  /// The process-wide registry, lazily constructed on first access. Most
  /// embedders never construct their own `Registry`; this is the one a
  /// host process actually loads images through.
  pub fn global() -> &'static Registry {
    &GLOBAL
  }

  pub fn new(config: Config) -> Self {
    Self {
      tables: Mutex::new(Tables::default()),
      config,
      debug_retired: Mutex::new(Vec::new()),
    }
  }

  /// `open(path)`: equivalent to `open_full(path, ref_only = false)`.
  pub fn open(&self, path: &Path) -> Result<Arc<Image>> {
    self.open_full(path, false)
  }

  /// `open_full(path, ref_only)`.
  pub fn open_full(&self, path: &Path, ref_only: bool) -> Result<Arc<Image>> {
    let canonical = path.canonicalize()?;
    let key = canonical.to_string_lossy().into_owned();

    if let Some(existing) = self.lookup_path(&key, ref_only) {
      return Ok(existing);
    }

    // Parsing happens without holding the lock: it must never run across
    // file I/O or other blocking work.
    let built = Image::open_path(&canonical, ref_only)?;
    let candidate = Arc::new(built);

    Ok(self.publish(candidate, ref_only))
  }

  /// `open_from_data(bytes, copy)`. Buffer-backed images are not keyed by
  /// path in any meaningful way, but they still participate in GUID
  /// deduplication.
  pub fn open_from_data(&self, data: Arc<[u8]>, copy: bool, ref_only: bool) -> Result<Arc<Image>> {
    let built = Image::open_from_data(data, copy, ref_only)?;
    Ok(self.publish(Arc::new(built), ref_only))
  }

  /// Opens a dynamic (emit-API) image: no PE/CLI/metadata parsing, just a
  /// named, reference-counted handle over `data`. Still goes through
  /// `publish` so it addrefs on repeat lookups by its own synthetic
  /// `data-<addr>` name like other buffer-backed images.
  pub fn open_dynamic(&self, data: Arc<[u8]>) -> Arc<Image> {
    self.publish(Arc::new(Image::open_dynamic(data)), false)
  }

  /// `pe_file_open(path)`: parses PE headers only, skips CLI/metadata
  /// parsing and never touches the cache.
  pub fn pe_file_open(&self, path: &Path) -> Result<Image> {
    Image::open_pe_only(path)
  }

  fn lookup_path(&self, key: &str, ref_only: bool) -> Option<Arc<Image>> {
    let mut tables = self.tables.lock();
    let image = tables.by_path(ref_only).get(key)?.clone();
    image.addref();

    Some(image)
  }

  /// Re-acquires the lock and either publishes `candidate` or discards it in
  /// favor of a concurrently-inserted winner.
  fn publish(&self, candidate: Arc<Image>, ref_only: bool) -> Arc<Image> {
    let mut tables = self.tables.lock();
    let key = candidate.name().to_string();

    if let Some(winner) = tables.by_path(ref_only).get(&key) {
      winner.addref();
      return winner.clone();
    }

    tables.by_path(ref_only).insert(key, candidate.clone());

    // Aliasing under `assembly_name` when set is not implemented here:
    // `Image::assembly_name` is always `None` in this crate (see its doc
    // comment), since decoding it needs the row-column decoder this crate
    // doesn't own, so there is nothing to alias under at publish time.

    if let Some(guid) = candidate.guid() {
      tables.by_guid(ref_only).entry(guid.to_string()).or_insert_with(|| candidate.clone());
    }

    candidate
  }

  /// `loaded(name, ref_only)`: pure cache lookup, no loading.
  pub fn loaded(&self, name: &str, ref_only: bool) -> Option<Arc<Image>> {
    let mut tables = self.tables.lock();
    let image = tables.by_path(ref_only).get(name)?.clone();
    image.addref();

    Some(image)
  }

  /// `loaded_by_guid(guid, ref_only)`: pure cache lookup, no loading.
  pub fn loaded_by_guid(&self, guid: &str, ref_only: bool) -> Option<Arc<Image>> {
    let mut tables = self.tables.lock();
    let image = tables.by_guid(ref_only).get(guid)?.clone();
    image.addref();

    Some(image)
  }

  /// `close(image)`.
  pub fn close(&self, image: Arc<Image>) {
    if image.release() > 0 {
      return;
    }

    {
      let mut tables = self.tables.lock();

      for table in [&mut tables.by_path_normal, &mut tables.by_path_refonly] {
        table.retain(|_, stored| !Arc::ptr_eq(stored, &image));
      }
      for table in [&mut tables.by_guid_normal, &mut tables.by_guid_refonly] {
        table.retain(|_, stored| !Arc::ptr_eq(stored, &image));
      }

      // Rebuild the guid tables: another image may share this guid and
      // must remain reachable.
      if let Some(guid) = image.guid() {
        for (path_table, guid_table) in [
          (&tables.by_path_normal, &mut tables.by_guid_normal),
          (&tables.by_path_refonly, &mut tables.by_guid_refonly),
        ] {
          if !guid_table.contains_key(guid) {
            if let Some(replacement) = path_table.values().find(|img| img.guid() == Some(guid)) {
              guid_table.insert(guid.to_string(), replacement.clone());
            }
          }
        }
      }
    }

    self.teardown(image);
  }

  fn teardown(&self, image: Arc<Image>) {
    if self.config.debug_assembly_unload {
      image.mark_debug_unloaded();
      self.debug_retired.lock().push(image);
      return;
    }

    // Recursively close children that this image's own Arc strong count
    // was the last owner of; images still referenced elsewhere are left
    // alone by `Drop`.
    for slot in image.module_slots() {
      if let Some(child) = slot.get().and_then(|s| s.clone()) {
        self.close(child);
      }
    }
    for slot in image.file_slots() {
      if let Some(child) = slot.get().and_then(|s| s.clone()) {
        self.close(child);
      }
    }

    drop(image);
  }

  /// Images retired under `debug_assembly_unload` instead of being dropped.
  pub fn debug_retired(&self) -> Vec<Arc<Image>> {
    self.debug_retired.lock().clone()
  }

  pub fn load_module(&self, image: &Arc<Image>, rows: &dyn TableRowSource, idx: u32) -> Option<Arc<Image>> {
    crate::modules::load_module(self, image, rows, idx)
  }

  pub fn load_file_for_image(&self, image: &Arc<Image>, rows: &dyn TableRowSource, idx: u32) -> Option<Arc<Image>> {
    crate::modules::load_file_for_image(self, image, rows, idx)
  }
}
