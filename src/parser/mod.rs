pub mod capture;
pub mod container;
pub mod core;
pub mod error;
pub mod model;
pub mod module;
pub mod restore;
pub mod trace;
pub mod value;

pub use capture::{CaptureBuffer, CapturedValue, GuardState, crc64, restore_payload};
pub use error::DecodeError;
pub use model::*;
pub use module::{
    ModuleField, ModuleId, ModuleLoader, ModuleParser, ModuleParserRegistry, ModuleValue,
    OpcodeModuleParser,
};
pub use restore::{RDB_VERSION, RestorePayload, decode_restore_payload};
pub use value::{DecodedValue, Mode, ValueStats, decode_value};
