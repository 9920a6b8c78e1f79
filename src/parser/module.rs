//! Module values (RDB types 6 and 7) and the registry of module parsers.
//!
//! Module payloads carry no overall length, so a value can only be consumed
//! by a parser that knows its layout. Type 7 values additionally tag every
//! field with an opcode, which makes them walkable without one.

use std::{collections::HashMap, fmt, sync::Arc};

use anyhow::{Context, anyhow, ensure};
use bytes::Bytes;

use crate::{
    helper::AnyResult,
    parser::{core::reader::RdbReader, error::DecodeError, model::RDBModuleOpcode},
};

const CHARSET: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";
const NAME_LEN: usize = 9;
const VERSION_BITS: u32 = 10;

/// Module type id: a 9-character name and a 10-bit encoding version packed
/// into 64 bits.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModuleId {
    pub name: String,
    pub version: u16,
}

impl ModuleId {
    pub fn from_raw(raw: u64) -> Self {
        let name = (0..NAME_LEN)
            .map(|j| {
                let shift = VERSION_BITS as usize + (NAME_LEN - 1 - j) * 6;
                CHARSET[((raw >> shift) & 0x3F) as usize] as char
            })
            .collect();
        Self {
            name,
            version: (raw & ((1 << VERSION_BITS) - 1)) as u16,
        }
    }

    pub fn to_raw(&self) -> AnyResult<u64> {
        ensure!(
            self.name.len() == NAME_LEN,
            "module name must be {} characters: {}",
            NAME_LEN,
            self.name
        );
        ensure!(
            self.version < (1 << VERSION_BITS),
            "module version out of range: {}",
            self.version
        );
        let mut raw = 0u64;
        for b in self.name.bytes() {
            let idx = CHARSET
                .iter()
                .position(|c| *c == b)
                .ok_or_else(|| anyhow!("invalid module name character: {}", b as char))?;
            raw = (raw << 6) | idx as u64;
        }
        Ok((raw << VERSION_BITS) | self.version as u64)
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.name, self.version)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ModuleField {
    Signed(i64),
    Unsigned(u64),
    Float(f32),
    Double(f64),
    String(Bytes),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModuleValue {
    pub id: ModuleId,
    pub fields: Vec<ModuleField>,
}

/// The `RedisModule_Load*` API over the RDB stream.
///
/// For type 7 values (`opcoded`) every load first checks the field's opcode.
pub struct ModuleLoader<'r, 'a> {
    reader: &'r mut RdbReader<'a>,
    opcoded: bool,
    eof_seen: bool,
}

impl<'r, 'a> ModuleLoader<'r, 'a> {
    pub fn new(reader: &'r mut RdbReader<'a>, opcoded: bool) -> Self {
        Self {
            reader,
            opcoded,
            eof_seen: false,
        }
    }

    fn read_opcode(&mut self) -> AnyResult<RDBModuleOpcode> {
        let raw = self.reader.read_len().context("read module opcode")?;
        u8::try_from(raw)
            .ok()
            .and_then(|b| RDBModuleOpcode::try_from(b).ok())
            .ok_or_else(|| anyhow!("unknown module opcode: {}", raw))
    }

    fn expect(&mut self, expected: RDBModuleOpcode) -> AnyResult {
        if !self.opcoded {
            return Ok(());
        }
        let found = self.read_opcode()?;
        ensure!(
            found == expected,
            "module opcode mismatch: expected {:?}, found {:?}",
            expected,
            found
        );
        Ok(())
    }

    pub fn load_unsigned(&mut self) -> AnyResult<u64> {
        self.expect(RDBModuleOpcode::UInt)?;
        self.reader.read_len()
    }

    pub fn load_signed(&mut self) -> AnyResult<i64> {
        self.expect(RDBModuleOpcode::SInt)?;
        Ok(self.reader.read_len()? as i64)
    }

    pub fn load_string(&mut self) -> AnyResult<Bytes> {
        self.expect(RDBModuleOpcode::String)?;
        self.reader.read_blob()
    }

    pub fn load_double(&mut self) -> AnyResult<f64> {
        self.expect(RDBModuleOpcode::Double)?;
        self.reader.read_le_f64()
    }

    pub fn load_float(&mut self) -> AnyResult<f32> {
        self.expect(RDBModuleOpcode::Float)?;
        self.reader.read_le_f32()
    }

    /// Next self-describing field of an opcoded value, `None` at its EOF
    /// opcode.
    pub fn next_field(&mut self) -> AnyResult<Option<ModuleField>> {
        ensure!(self.opcoded, "module value has no field opcodes");
        if self.eof_seen {
            return Ok(None);
        }
        let field = match self.read_opcode()? {
            RDBModuleOpcode::Eof => {
                self.eof_seen = true;
                return Ok(None);
            }
            RDBModuleOpcode::SInt => ModuleField::Signed(self.reader.read_len()? as i64),
            RDBModuleOpcode::UInt => ModuleField::Unsigned(self.reader.read_len()?),
            RDBModuleOpcode::Float => ModuleField::Float(self.reader.read_le_f32()?),
            RDBModuleOpcode::Double => ModuleField::Double(self.reader.read_le_f64()?),
            RDBModuleOpcode::String => ModuleField::String(self.reader.read_blob()?),
        };
        Ok(Some(field))
    }

    /// Consume the trailing EOF opcode of an opcoded value.
    pub fn finish(&mut self) -> AnyResult {
        if !self.opcoded || self.eof_seen {
            return Ok(());
        }
        let found = self.read_opcode()?;
        ensure!(
            found == RDBModuleOpcode::Eof,
            "module value not terminated by EOF opcode, found {:?}",
            found
        );
        self.eof_seen = true;
        Ok(())
    }
}

pub trait ModuleParser: Send + Sync {
    /// Load one value written by the module's `rdb_save` callback.
    fn parse(
        &self,
        loader: &mut ModuleLoader<'_, '_>,
        encoding_version: u16,
    ) -> AnyResult<Vec<ModuleField>>;
}

/// Generic parser for opcoded (type 7) values: collects every field up to
/// the EOF opcode.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpcodeModuleParser;

impl ModuleParser for OpcodeModuleParser {
    fn parse(
        &self,
        loader: &mut ModuleLoader<'_, '_>,
        _encoding_version: u16,
    ) -> AnyResult<Vec<ModuleField>> {
        let mut fields = Vec::new();
        while let Some(field) = loader.next_field()? {
            fields.push(field);
        }
        Ok(fields)
    }
}

/// Parsers keyed by module name and encoding version. Built once, then
/// shared read-only by every pass.
#[derive(Clone, Default)]
pub struct ModuleParserRegistry {
    parsers: HashMap<(String, u16), Arc<dyn ModuleParser>>,
}

impl fmt::Debug for ModuleParserRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.parsers.keys()).finish()
    }
}

impl ModuleParserRegistry {
    pub fn builder() -> ModuleParserRegistryBuilder {
        ModuleParserRegistryBuilder::default()
    }

    pub fn get(&self, id: &ModuleId) -> Option<&dyn ModuleParser> {
        self.parsers
            .get(&(id.name.clone(), id.version))
            .map(|p| p.as_ref())
    }

    pub fn is_empty(&self) -> bool {
        self.parsers.is_empty()
    }

    /// Decode a module value whose type byte was already consumed.
    ///
    /// Returns `None` when an unregistered opcoded value was walked and
    /// discarded (`allow_walk`); an unregistered type 6 value is always an
    /// error since nothing bounds it.
    pub fn load(
        &self,
        reader: &mut RdbReader<'_>,
        opcoded: bool,
        allow_walk: bool,
    ) -> AnyResult<Option<ModuleValue>> {
        let id = ModuleId::from_raw(reader.read_len().context("read module id")?);
        let parser: &dyn ModuleParser = match self.get(&id) {
            Some(parser) => parser,
            None if opcoded && allow_walk => {
                crate::parser_trace!("module.walk");
                let mut loader = ModuleLoader::new(reader, true);
                OpcodeModuleParser.parse(&mut loader, id.version)?;
                loader.finish()?;
                return Ok(None);
            }
            None => {
                return Err(DecodeError::UnregisteredModule {
                    name: id.name,
                    version: id.version,
                }
                .into());
            }
        };
        let mut loader = ModuleLoader::new(reader, opcoded);
        let fields = parser
            .parse(&mut loader, id.version)
            .with_context(|| format!("parse module value {}", id))?;
        loader.finish()?;
        Ok(Some(ModuleValue { id, fields }))
    }
}

#[derive(Default)]
pub struct ModuleParserRegistryBuilder {
    parsers: HashMap<(String, u16), Arc<dyn ModuleParser>>,
}

impl ModuleParserRegistryBuilder {
    pub fn register(
        mut self,
        name: impl Into<String>,
        version: u16,
        parser: impl ModuleParser + 'static,
    ) -> Self {
        self.parsers.insert((name.into(), version), Arc::new(parser));
        self
    }

    pub fn build(self) -> ModuleParserRegistry {
        ModuleParserRegistry {
            parsers: self.parsers,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn len_bytes(value: u64) -> Vec<u8> {
        let mut out = vec![0x81];
        out.extend_from_slice(&value.to_be_bytes());
        out
    }

    #[test]
    fn module_id_packing() -> AnyResult<()> {
        let id = ModuleId {
            name: "ReJSON-RL".to_string(),
            version: 3,
        };
        let raw = id.to_raw()?;
        assert_eq!(raw & 0x3FF, 3);
        assert_eq!(ModuleId::from_raw(raw), id);
        assert_eq!(id.to_string(), "ReJSON-RL/3");
        Ok(())
    }

    #[test]
    fn unregistered_module_is_fatal() -> AnyResult<()> {
        let id = ModuleId {
            name: "unknown-m".to_string(),
            version: 1,
        };
        let mut data = len_bytes(id.to_raw()?);
        data.extend_from_slice(&[0x02, 0x05, 0x00]);
        let registry = ModuleParserRegistry::default();
        let mut reader = RdbReader::new(Cursor::new(data));
        let err = registry.load(&mut reader, false, true).unwrap_err();
        assert_eq!(
            err.downcast_ref::<DecodeError>(),
            Some(&DecodeError::UnregisteredModule {
                name: "unknown-m".to_string(),
                version: 1
            })
        );
        Ok(())
    }

    #[test]
    fn opcoded_value_can_be_walked() -> AnyResult<()> {
        let id = ModuleId {
            name: "walkable1".to_string(),
            version: 2,
        };
        let mut data = len_bytes(id.to_raw()?);
        // UINT 5, STRING "ab", DOUBLE 1.5, EOF
        data.extend_from_slice(&[0x02, 0x05, 0x05, 0x02, b'a', b'b', 0x04]);
        data.extend_from_slice(&1.5f64.to_le_bytes());
        data.push(0x00);
        let total = data.len() as u64;

        let registry = ModuleParserRegistry::default();
        let mut reader = RdbReader::new(Cursor::new(data.clone()));
        assert_eq!(registry.load(&mut reader, true, true)?, None);
        assert_eq!(reader.tell(), total);

        let mut reader = RdbReader::new(Cursor::new(data.clone()));
        assert!(registry.load(&mut reader, true, false).is_err());

        let registry = ModuleParserRegistry::builder()
            .register("walkable1", 2, OpcodeModuleParser)
            .build();
        let mut reader = RdbReader::new(Cursor::new(data));
        let value = registry
            .load(&mut reader, true, false)?
            .expect("registered parser yields a value");
        assert_eq!(value.fields, vec![
            ModuleField::Unsigned(5),
            ModuleField::String(Bytes::from("ab")),
            ModuleField::Double(1.5),
        ]);
        assert_eq!(reader.tell(), total);
        Ok(())
    }

    struct CounterParser;

    impl ModuleParser for CounterParser {
        fn parse(
            &self,
            loader: &mut ModuleLoader<'_, '_>,
            _encoding_version: u16,
        ) -> AnyResult<Vec<ModuleField>> {
            let count = loader.load_unsigned()?;
            let label = loader.load_string()?;
            Ok(vec![ModuleField::Unsigned(count), ModuleField::String(label)])
        }
    }

    #[test]
    fn registered_parser_must_end_at_eof_opcode() -> AnyResult<()> {
        let id = ModuleId {
            name: "counter01".to_string(),
            version: 0,
        };
        let registry = ModuleParserRegistry::builder()
            .register("counter01", 0, CounterParser)
            .build();

        let mut data = len_bytes(id.to_raw()?);
        data.extend_from_slice(&[0x02, 0x07, 0x05, 0x01, b'x', 0x00]);
        let mut reader = RdbReader::new(Cursor::new(data));
        let value = registry.load(&mut reader, true, false)?;
        assert_eq!(value.map(|v| v.fields.len()), Some(2));

        let mut data = len_bytes(id.to_raw()?);
        data.extend_from_slice(&[0x02, 0x07, 0x05, 0x01, b'x', 0x02, 0x01]);
        let mut reader = RdbReader::new(Cursor::new(data));
        assert!(registry.load(&mut reader, true, false).is_err());
        Ok(())
    }
}
