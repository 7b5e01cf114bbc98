//! # streamproto: compiler for instrument protocol files
//!
//! Protocol files describe how to talk to a serial or network instrument:
//! named protocols made of commands, variables that protocols inherit, and
//! handlers run on I/O conditions. This crate parses such files, binds
//! protocol arguments and compiles a protocol into an instruction stream
//! for a runtime engine.
//!
//! ## Protocol file syntax
//!
//! ```text
//! # comment
//! terminator = CR LF;          # variable, inherited by later protocols
//! @init { out "*RST"; }        # handler
//!
//! read {                       # protocol
//!     out "$1?";               # $1.. are request arguments, $0 the request
//!     in "%f";
//! }
//! set { out "$1 %d"; @mismatch { in "ERR %s"; } }
//! ```
//!
//! Values are sequences of quoted strings, numeric bytes (`0x0d`, `13`,
//! `015`), named codes (`CR`, `LF`, `ESC`, ...), variable references
//! (`$name`, `${name}`, `$0`..`$9`) and `%` conversions, optionally
//! redirected to a device field: `%(VOLT)f`.
//!
//! ## Pipeline
//!
//! - [`reader`] and [`token`]: characters and tokens with line numbers
//! - [`parser`]: protocol files into [`ProtocolFile`]s
//! - [`registry`]: file search and cache
//! - [`instance`]: instantiation and compilation of one protocol
//! - [`compile`] and [`command`]: strings, numbers and commands
//! - [`format`]: format converters, [`device`]: a reference command set
//! - [`instruction`]: compiled instructions and their wire encoding
//!
//! ## Usage
//!
//! ```no_run
//! use streamproto::{Backend, BasicDevice, CompilerConfig, Registry, StdFormats};
//!
//! let config = CompilerConfig::default().with_search_path("/opt/protocols");
//! let mut registry = Registry::new(config);
//! let device = BasicDevice::new().with_field("VOLT", vec![0x01]);
//! let backend = Backend::new(&device, &StdFormats).with_fields(&device);
//! let compiled = registry.compile("dmm.proto", "read(VOLT)", &backend)?;
//! println!("{}", streamproto::device::render_program(&compiled.body));
//! # Ok::<(), streamproto::ProtocolError>(())
//! ```

pub mod ast;
pub mod command;
pub mod compile;
pub mod config;
pub mod device;
pub mod diag;
pub mod dump;
pub mod error;
pub mod format;
pub mod instance;
pub mod instruction;
pub mod parser;
pub mod reader;
pub mod registry;
pub mod resolve;
pub mod token;

pub use ast::{Binding, Protocol, ProtocolFile, ProtocolRequest};
pub use command::{Arguments, Backend, CommandCompiler, FieldResolver, NoFields};
pub use config::CompilerConfig;
pub use device::BasicDevice;
pub use diag::{CollectingDiagnostics, Diagnostics, LogDiagnostics};
pub use error::{ErrorKind, Location, ProtocolError};
pub use format::{FormatConverter, FormatDescriptor, FormatKind, FormatMode, StdFormats};
pub use instance::CompiledProtocol;
pub use instruction::{Instruction, Sentinel};
pub use parser::parse;
pub use registry::Registry;
