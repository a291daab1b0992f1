//! Runtime symbol binding.
//!
//! Vendor libraries are opened with `libloading` and their entry points are
//! resolved one capability at a time. A capability lists its candidate
//! symbol names newest ABI revision first; the first candidate that resolves
//! is committed and a capability with no resolvable candidate is recorded as
//! absent instead of failing the whole load.

use std::collections::{BTreeMap, HashMap};
use std::ffi::c_void;
use std::mem;
use std::path::{Path, PathBuf};

use libloading::{Library, Symbol};

use crate::error::{GpuPerfError, Result};

/// Address of a resolved entry point.
pub type RawSymbol = *const c_void;

/// Anything that can hand out entry points by name.
pub trait SymbolSource {
    /// Look up `name`, returning `None` when the symbol is not exported.
    fn lookup(&self, name: &str) -> Option<RawSymbol>;
}

/// Symbol table built by hand, for statically linked entry points and tests
impl SymbolSource for HashMap<String, RawSymbol> {
    fn lookup(&self, name: &str) -> Option<RawSymbol> {
        self.get(name).copied().filter(|raw| !raw.is_null())
    }
}

/// A shared library opened at runtime
pub struct SharedLibrary {
    path: PathBuf,
    library: Library,
}

impl SharedLibrary {
    /// Open the library at `path`
    ///
    /// # Returns
    /// * `Err(GpuPerfError::LibraryLoad)` - If the dynamic loader cannot open the path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        // SAFETY: opening runs the library's initialisers. The vendor libraries
        // loaded through here have no initialiser preconditions on the caller.
        let library = unsafe { Library::new(&path) }.map_err(|source| GpuPerfError::LibraryLoad {
            path: path.clone(),
            source,
        })?;

        log::debug!("Loaded shared library {:?}", path);
        Ok(Self { path, library })
    }

    /// Open the first library in `candidates` that the loader accepts
    pub fn open_first<S: AsRef<str>>(candidates: &[S]) -> Result<Self> {
        let mut failures = Vec::with_capacity(candidates.len());

        for candidate in candidates {
            match Self::open(candidate.as_ref()) {
                Ok(library) => return Ok(library),
                Err(e) => {
                    log::debug!("{}", e);
                    failures.push(candidate.as_ref().to_string());
                }
            }
        }

        Err(GpuPerfError::LibraryNotFound(failures.join(", ")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SymbolSource for SharedLibrary {
    fn lookup(&self, name: &str) -> Option<RawSymbol> {
        // SAFETY: the symbol is only read as an address here. It gets a
        // function type in `Binder::resolve`, whose caller vouches for it.
        let symbol: Symbol<RawSymbol> = unsafe { self.library.get(name.as_bytes()) }.ok()?;
        let raw = *symbol;
        (!raw.is_null()).then_some(raw)
    }
}

/// Find the first candidate exported by `source`.
///
/// Returns the candidate's position in the list, its name and its address.
pub fn resolve_first<S: SymbolSource + ?Sized>(
    source: &S,
    candidates: &[&'static str],
) -> Option<(usize, &'static str, RawSymbol)> {
    candidates
        .iter()
        .enumerate()
        .find_map(|(revision, name)| source.lookup(name).map(|raw| (revision, *name, raw)))
}

#[derive(Debug, Clone, Copy)]
struct Bound<F> {
    symbol: &'static str,
    revision: usize,
    func: F,
}

/// One logical operation and the entry point bound for it, if any
#[derive(Debug, Clone, Copy)]
pub struct Capability<F> {
    operation: &'static str,
    bound: Option<Bound<F>>,
}

impl<F: Copy> Capability<F> {
    pub fn absent(operation: &'static str) -> Self {
        Self {
            operation,
            bound: None,
        }
    }

    pub fn operation(&self) -> &'static str {
        self.operation
    }

    /// The bound function, or `None` when no candidate resolved
    pub fn get(&self) -> Option<F> {
        self.bound.map(|b| b.func)
    }

    /// Name of the symbol that was committed
    pub fn symbol(&self) -> Option<&'static str> {
        self.bound.map(|b| b.symbol)
    }

    /// Position of the committed symbol in the candidate list (0 = newest)
    pub fn revision(&self) -> Option<usize> {
        self.bound.map(|b| b.revision)
    }

    pub fn is_present(&self) -> bool {
        self.bound.is_some()
    }
}

/// Operation name → committed symbol (`None` when absent)
#[derive(Debug, Clone, Default)]
pub struct CapabilityTable {
    entries: BTreeMap<&'static str, Option<&'static str>>,
}

impl CapabilityTable {
    pub fn is_present(&self, operation: &str) -> bool {
        matches!(self.entries.get(operation), Some(Some(_)))
    }

    pub fn symbol(&self, operation: &str) -> Option<&'static str> {
        self.entries.get(operation).copied().flatten()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, Option<&'static str>)> + '_ {
        self.entries.iter().map(|(op, symbol)| (*op, *symbol))
    }

    /// Operations that ended up without an entry point
    pub fn missing(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries
            .iter()
            .filter(|(_, symbol)| symbol.is_none())
            .map(|(op, _)| *op)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Combine the tables of several libraries into one
    pub fn merge<I: IntoIterator<Item = CapabilityTable>>(tables: I) -> Self {
        let mut merged = Self::default();
        for table in tables {
            merged.entries.extend(table.entries);
        }
        merged
    }

    fn record(&mut self, operation: &'static str, symbol: Option<&'static str>) {
        self.entries.insert(operation, symbol);
    }
}

/// Resolves capabilities against one symbol source and records the outcome
pub struct Binder<'s, S: SymbolSource + ?Sized> {
    source: &'s S,
    table: CapabilityTable,
}

impl<'s, S: SymbolSource + ?Sized> Binder<'s, S> {
    pub fn new(source: &'s S) -> Self {
        Self {
            source,
            table: CapabilityTable::default(),
        }
    }

    /// Bind `operation` to the first of `candidates` that resolves.
    ///
    /// # Safety
    /// `F` must be an `extern "C"` function pointer type whose signature
    /// matches every symbol named in `candidates`.
    pub unsafe fn resolve<F: Copy>(
        &mut self,
        operation: &'static str,
        candidates: &[&'static str],
    ) -> Capability<F> {
        assert_eq!(
            mem::size_of::<F>(),
            mem::size_of::<RawSymbol>(),
            "capability type for {} must be a function pointer",
            operation
        );

        match resolve_first(self.source, candidates) {
            Some((revision, symbol, raw)) => {
                if revision > 0 {
                    log::debug!("{}: falling back to {}", operation, symbol);
                }
                self.table.record(operation, Some(symbol));

                // SAFETY: size checked above, signature guaranteed by the caller.
                let func = unsafe { mem::transmute_copy::<RawSymbol, F>(&raw) };
                Capability {
                    operation,
                    bound: Some(Bound {
                        symbol,
                        revision,
                        func,
                    }),
                }
            }
            None => {
                log::warn!(
                    "Failed to get {} from library (tried {})",
                    operation,
                    candidates.join(", ")
                );
                self.table.record(operation, None);
                Capability::absent(operation)
            }
        }
    }

    pub fn table(&self) -> &CapabilityTable {
        &self.table
    }

    pub fn finish(self) -> CapabilityTable {
        self.table
    }
}
