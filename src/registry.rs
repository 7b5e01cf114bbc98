//! Cache of parsed protocol files.
//!
//! A [`Registry`] finds protocol files along the configured search path,
//! parses each file once and hands out independent protocol instances.
//! Files that failed to parse stay in the cache as invalid, so later
//! requests fail at once. Cached files are never re-read; [`Registry::free`]
//! drops everything.

use crate::ast::{name_matches, Protocol, ProtocolFile, ProtocolRequest};
use crate::command::Backend;
use crate::config::CompilerConfig;
use crate::diag::{Diagnostics, LogDiagnostics};
use crate::error::{Location, ProtocolError};
use crate::instance::CompiledProtocol;
use crate::parser::parse_bytes;
use std::path::{Path, PathBuf};

struct Entry {
    name: String,
    /// `None` once the file failed to parse.
    file: Option<ProtocolFile>,
}

pub struct Registry {
    config: CompilerConfig,
    entries: Vec<Entry>,
    diagnostics: Box<dyn Diagnostics>,
}

impl Registry {
    pub fn new(config: CompilerConfig) -> Self {
        Self::with_diagnostics(config, Box::new(LogDiagnostics))
    }

    pub fn with_diagnostics(config: CompilerConfig, diagnostics: Box<dyn Diagnostics>) -> Self {
        Registry {
            config,
            entries: Vec::new(),
            diagnostics,
        }
    }

    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Is `filename` cached, valid or not?
    pub fn contains(&self, filename: &str) -> bool {
        self.position(filename).is_some()
    }

    /// Drop every cached file.
    pub fn free(&mut self) {
        log::debug!("freeing {} protocol file(s)", self.entries.len());
        self.entries.clear();
    }

    /// Parse `filename` (or take it from the cache).
    pub fn load(&mut self, filename: &str) -> Result<&ProtocolFile, ProtocolError> {
        match self.lookup(filename) {
            Ok(index) => self.file_at(index, filename),
            Err(e) => Err(self.reported(filename, e)),
        }
    }

    /// Parse `source` and cache it as `filename`, replacing an earlier entry.
    pub fn add_source(&mut self, filename: &str, source: &str) -> Result<&ProtocolFile, ProtocolError> {
        if let Some(i) = self.position(filename) {
            self.entries.remove(i);
        }
        match self.parse_and_cache(filename, source.as_bytes()) {
            Ok(index) => self.file_at(index, filename),
            Err(e) => Err(self.reported(filename, e)),
        }
    }

    /// Instance of the protocol `request` (`name` or `name(a,b,..)`) from `filename`.
    pub fn get_protocol(&mut self, filename: &str, request: &str) -> Result<Protocol, ProtocolError> {
        let result = self.instantiate(filename, request);
        result.map_err(|e| self.reported(filename, e))
    }

    /// Instantiate and compile a protocol; with `check_unused` configured,
    /// unused handlers fail the compilation.
    pub fn compile(
        &mut self,
        filename: &str,
        request: &str,
        backend: &Backend<'_>,
    ) -> Result<CompiledProtocol, ProtocolError> {
        let result = self.compile_instance(filename, request, backend);
        result.map_err(|e| self.reported(filename, e))
    }

    /// Text report of a cached or newly loaded file.
    pub fn report(&mut self, filename: &str) -> Result<String, ProtocolError> {
        self.load(filename).map(ProtocolFile::report)
    }

    fn position(&self, filename: &str) -> Option<usize> {
        self.entries.iter().position(|e| name_matches(&e.name, filename))
    }

    fn reported(&self, filename: &str, error: ProtocolError) -> ProtocolError {
        let line = error.line().unwrap_or(0);
        let file = error.location().map_or(filename, |at| at.file.as_str());
        self.diagnostics.error(line, file, &error.to_string());
        error
    }

    fn file_at(&self, index: usize, filename: &str) -> Result<&ProtocolFile, ProtocolError> {
        self.entries[index]
            .file
            .as_ref()
            .ok_or_else(|| ProtocolError::InvalidFile(filename.to_string()))
    }

    fn instantiate(&mut self, filename: &str, request: &str) -> Result<Protocol, ProtocolError> {
        let request = ProtocolRequest::parse(request)
            .map_err(|message| ProtocolError::syntax(Location::new(filename, 0), message))?;
        let index = self.lookup(filename)?;
        let mut instance = self.file_at(index, filename)?.instantiate(&request)?;
        instance.set_max_recursion_depth(self.config.max_recursion_depth);
        Ok(instance)
    }

    fn compile_instance(
        &mut self,
        filename: &str,
        request: &str,
        backend: &Backend<'_>,
    ) -> Result<CompiledProtocol, ProtocolError> {
        let mut instance = self.instantiate(filename, request)?;
        let compiled = instance.compile(backend)?;
        if self.config.check_unused {
            instance.check_unused(&*self.diagnostics)?;
        }
        Ok(compiled)
    }

    /// Index of the cache entry for `filename`, reading and parsing it first
    /// if needed. A file that failed before gives `InvalidFile`.
    fn lookup(&mut self, filename: &str) -> Result<usize, ProtocolError> {
        if let Some(index) = self.position(filename) {
            if self.entries[index].file.is_none() {
                return Err(ProtocolError::InvalidFile(filename.to_string()));
            }
            return Ok(index);
        }
        let path = self.find_file(filename)?;
        log::debug!("reading protocol file '{}' from {}", filename, path.display());
        let source = std::fs::read(&path)?;
        self.parse_and_cache(filename, &source)
    }

    fn parse_and_cache(&mut self, filename: &str, source: &[u8]) -> Result<usize, ProtocolError> {
        let (file, result) = match parse_bytes(source, filename) {
            Ok(file) => (Some(file), Ok(self.entries.len())),
            Err(e) => {
                log::warn!("protocol file '{}' is invalid", filename);
                (None, Err(e))
            }
        };
        self.entries.push(Entry {
            name: filename.to_string(),
            file,
        });
        result
    }

    fn find_file(&self, filename: &str) -> Result<PathBuf, ProtocolError> {
        let direct = Path::new(filename);
        if direct.is_absolute() || self.config.search_path.is_empty() {
            if direct.is_file() {
                return Ok(direct.to_path_buf());
            }
            return Err(ProtocolError::FileNotFound {
                name: filename.to_string(),
                path: ".".to_string(),
            });
        }
        for dir in &self.config.search_path {
            let candidate = dir.join(filename);
            log::trace!("trying {}", candidate.display());
            if candidate.is_file() {
                return Ok(candidate);
            }
        }
        let path = self
            .config
            .search_path
            .iter()
            .map(|d| d.display().to_string())
            .collect::<Vec<_>>()
            .join(":");
        Err(ProtocolError::FileNotFound {
            name: filename.to_string(),
            path,
        })
    }
}
