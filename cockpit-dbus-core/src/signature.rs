//! D-Bus type signatures.

use std::fmt;

const MAX_SIGNATURE_LEN: usize = 255;
const MAX_NESTING: usize = 32;

/// One complete D-Bus type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DbusType {
    Byte,
    Boolean,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Double,
    String,
    ObjectPath,
    Signature,
    UnixFd,
    Variant,
    Array(Box<DbusType>),
    Dict(Box<DbusType>, Box<DbusType>),
    Struct(Vec<DbusType>),
}

impl DbusType {
    fn basic(code: u8) -> Option<DbusType> {
        Some(match code {
            b'y' => DbusType::Byte,
            b'b' => DbusType::Boolean,
            b'n' => DbusType::Int16,
            b'q' => DbusType::UInt16,
            b'i' => DbusType::Int32,
            b'u' => DbusType::UInt32,
            b'x' => DbusType::Int64,
            b't' => DbusType::UInt64,
            b'd' => DbusType::Double,
            b's' => DbusType::String,
            b'o' => DbusType::ObjectPath,
            b'g' => DbusType::Signature,
            b'h' => DbusType::UnixFd,
            _ => return None,
        })
    }

    pub fn is_basic(&self) -> bool {
        !matches!(
            self,
            DbusType::Variant | DbusType::Array(_) | DbusType::Dict(..) | DbusType::Struct(_)
        )
    }

    fn write(&self, out: &mut String) {
        match self {
            DbusType::Byte => out.push('y'),
            DbusType::Boolean => out.push('b'),
            DbusType::Int16 => out.push('n'),
            DbusType::UInt16 => out.push('q'),
            DbusType::Int32 => out.push('i'),
            DbusType::UInt32 => out.push('u'),
            DbusType::Int64 => out.push('x'),
            DbusType::UInt64 => out.push('t'),
            DbusType::Double => out.push('d'),
            DbusType::String => out.push('s'),
            DbusType::ObjectPath => out.push('o'),
            DbusType::Signature => out.push('g'),
            DbusType::UnixFd => out.push('h'),
            DbusType::Variant => out.push('v'),
            DbusType::Array(inner) => {
                out.push('a');
                inner.write(out);
            }
            DbusType::Dict(key, value) => {
                out.push_str("a{");
                key.write(out);
                value.write(out);
                out.push('}');
            }
            DbusType::Struct(fields) => {
                out.push('(');
                for field in fields {
                    field.write(out);
                }
                out.push(')');
            }
        }
    }

    pub fn signature(&self) -> String {
        let mut out = String::new();
        self.write(&mut out);
        out
    }
}

impl fmt::Display for DbusType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.signature())
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SignatureError {
    #[error("signature is longer than 255 characters")]
    TooLong,
    #[error("unexpected end of signature")]
    UnexpectedEnd,
    #[error("unexpected character '{0}' in signature")]
    UnexpectedChar(char),
    #[error("containers nested too deeply")]
    TooDeep,
    #[error("empty structure")]
    EmptyStruct,
    #[error("dict entry key must be a basic type")]
    DictKeyNotBasic,
    #[error("dict entry outside of an array")]
    DictOutsideArray,
    #[error("expected a single complete type")]
    NotSingle,
}

/// A parsed, valid signature: zero or more complete types.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Signature {
    types: Vec<DbusType>,
}

impl Signature {
    pub fn parse(text: &str) -> Result<Self, SignatureError> {
        if text.len() > MAX_SIGNATURE_LEN {
            return Err(SignatureError::TooLong);
        }
        let mut parser = Parser {
            bytes: text.as_bytes(),
            pos: 0,
            arrays: 0,
            structs: 0,
        };
        let mut types = Vec::new();
        while parser.pos < parser.bytes.len() {
            types.push(parser.complete_type()?);
        }
        Ok(Signature { types })
    }

    pub fn empty() -> Self {
        Signature { types: Vec::new() }
    }

    pub fn from_types(types: Vec<DbusType>) -> Self {
        Signature { types }
    }

    pub fn is_valid(text: &str) -> bool {
        Self::parse(text).is_ok()
    }

    /// Parse text that must hold exactly one complete type.
    pub fn parse_single(text: &str) -> Result<DbusType, SignatureError> {
        let mut sig = Self::parse(text)?;
        if sig.types.len() != 1 {
            return Err(SignatureError::NotSingle);
        }
        sig.types.pop().ok_or(SignatureError::NotSingle)
    }

    pub fn types(&self) -> &[DbusType] {
        &self.types
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for t in &self.types {
            write!(f, "{}", t)?;
        }
        Ok(())
    }
}

impl std::str::FromStr for Signature {
    type Err = SignatureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Signature::parse(s)
    }
}

struct Parser<'a> {
    bytes: &'a [u8],
    pos: usize,
    arrays: usize,
    structs: usize,
}

impl Parser<'_> {
    fn next(&mut self) -> Result<u8, SignatureError> {
        let c = *self
            .bytes
            .get(self.pos)
            .ok_or(SignatureError::UnexpectedEnd)?;
        self.pos += 1;
        Ok(c)
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn complete_type(&mut self) -> Result<DbusType, SignatureError> {
        let c = self.next()?;
        if let Some(basic) = DbusType::basic(c) {
            return Ok(basic);
        }
        match c {
            b'v' => Ok(DbusType::Variant),
            b'a' => {
                self.arrays += 1;
                if self.arrays > MAX_NESTING {
                    return Err(SignatureError::TooDeep);
                }
                let result = if self.peek() == Some(b'{') {
                    self.pos += 1;
                    self.dict_entry()
                } else {
                    self.complete_type().map(|t| DbusType::Array(Box::new(t)))
                };
                self.arrays -= 1;
                result
            }
            b'(' => {
                self.structs += 1;
                if self.structs > MAX_NESTING {
                    return Err(SignatureError::TooDeep);
                }
                let mut fields = Vec::new();
                loop {
                    match self.peek() {
                        None => return Err(SignatureError::UnexpectedEnd),
                        Some(b')') => {
                            self.pos += 1;
                            break;
                        }
                        Some(_) => fields.push(self.complete_type()?),
                    }
                }
                self.structs -= 1;
                if fields.is_empty() {
                    return Err(SignatureError::EmptyStruct);
                }
                Ok(DbusType::Struct(fields))
            }
            b'{' => Err(SignatureError::DictOutsideArray),
            other => Err(SignatureError::UnexpectedChar(other as char)),
        }
    }

    fn dict_entry(&mut self) -> Result<DbusType, SignatureError> {
        let key = self.complete_type()?;
        if !key.is_basic() {
            return Err(SignatureError::DictKeyNotBasic);
        }
        let value = self.complete_type()?;
        match self.next()? {
            b'}' => Ok(DbusType::Dict(Box::new(key), Box::new(value))),
            other => Err(SignatureError::UnexpectedChar(other as char)),
        }
    }
}
