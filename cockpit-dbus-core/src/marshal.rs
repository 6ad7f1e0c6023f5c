//! Checking JSON encoded arguments against D-Bus signatures.
//!
//! The JSON mapping: integers and doubles are numbers, `b` is a bool,
//! strings, object paths and signatures are strings, `ay` is base64,
//! `a{..}` is an object, other arrays and structs are arrays, and `v` is
//! `{"t": signature, "v": value}`.

use crate::error::DbusError;
use crate::names::is_object_path;
use crate::signature::{DbusType, Signature};
use base64::Engine;
use serde_json::Value;

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn unexpected(value: &Value, ty: &DbusType) -> DbusError {
    DbusError::invalid_args(format!(
        "Unexpected {} in argument, expected type '{}'",
        kind_of(value),
        ty
    ))
}

/// Validate a whole argument list against `signature`.
pub fn check_args(signature: &Signature, args: &[Value]) -> Result<(), DbusError> {
    if signature.len() != args.len() {
        return Err(DbusError::invalid_args(format!(
            "Wrong number of arguments: expected {} for signature '{}', got {}",
            signature.len(),
            signature,
            args.len()
        )));
    }
    for (ty, arg) in signature.types().iter().zip(args) {
        check_value(ty, arg)?;
    }
    Ok(())
}

fn check_integer(ty: &DbusType, value: &Value, min: i128, max: i128) -> Result<(), DbusError> {
    let Value::Number(n) = value else {
        return Err(unexpected(value, ty));
    };
    let parsed = n
        .as_i64()
        .map(i128::from)
        .or_else(|| n.as_u64().map(i128::from));
    match parsed {
        Some(v) if v >= min && v <= max => Ok(()),
        _ => Err(DbusError::invalid_args(format!(
            "Number {} out of range for type '{}'",
            n, ty
        ))),
    }
}

/// Validate one value against one complete type.
pub fn check_value(ty: &DbusType, value: &Value) -> Result<(), DbusError> {
    match ty {
        DbusType::Byte => check_integer(ty, value, 0, u8::MAX as i128),
        DbusType::Int16 => check_integer(ty, value, i16::MIN as i128, i16::MAX as i128),
        DbusType::UInt16 => check_integer(ty, value, 0, u16::MAX as i128),
        DbusType::Int32 => check_integer(ty, value, i32::MIN as i128, i32::MAX as i128),
        DbusType::UInt32 => check_integer(ty, value, 0, u32::MAX as i128),
        DbusType::Int64 => check_integer(ty, value, i64::MIN as i128, i64::MAX as i128),
        DbusType::UInt64 => check_integer(ty, value, 0, u64::MAX as i128),
        DbusType::Double => match value {
            Value::Number(_) => Ok(()),
            _ => Err(unexpected(value, ty)),
        },
        DbusType::Boolean => match value {
            Value::Bool(_) => Ok(()),
            _ => Err(unexpected(value, ty)),
        },
        DbusType::String => match value {
            Value::String(_) => Ok(()),
            _ => Err(unexpected(value, ty)),
        },
        DbusType::ObjectPath => match value {
            Value::String(s) if is_object_path(s) => Ok(()),
            Value::String(s) => Err(DbusError::invalid_args(format!(
                "Invalid object path '{}'",
                s
            ))),
            _ => Err(unexpected(value, ty)),
        },
        DbusType::Signature => match value {
            Value::String(s) if Signature::is_valid(s) => Ok(()),
            Value::String(s) => Err(DbusError::invalid_args(format!(
                "Invalid signature '{}'",
                s
            ))),
            _ => Err(unexpected(value, ty)),
        },
        DbusType::UnixFd => Err(DbusError::invalid_args(
            "Unix file descriptors are not supported",
        )),
        DbusType::Variant => check_variant(value),
        DbusType::Array(inner) if **inner == DbusType::Byte => match value {
            Value::String(s) => base64::engine::general_purpose::STANDARD
                .decode(s)
                .map(|_| ())
                .map_err(|_| DbusError::invalid_args("Invalid base64 in argument")),
            _ => Err(unexpected(value, ty)),
        },
        DbusType::Array(inner) => match value {
            Value::Array(items) => items.iter().try_for_each(|item| check_value(inner, item)),
            _ => Err(unexpected(value, ty)),
        },
        DbusType::Dict(key, inner) => match value {
            Value::Object(entries) => entries.iter().try_for_each(|(k, v)| {
                check_dict_key(key, k)?;
                check_value(inner, v)
            }),
            _ => Err(unexpected(value, ty)),
        },
        DbusType::Struct(fields) => match value {
            Value::Array(items) if items.len() == fields.len() => fields
                .iter()
                .zip(items)
                .try_for_each(|(field, item)| check_value(field, item)),
            Value::Array(items) => Err(DbusError::invalid_args(format!(
                "Wrong number of fields in structure '{}': got {}",
                ty,
                items.len()
            ))),
            _ => Err(unexpected(value, ty)),
        },
    }
}

fn check_variant(value: &Value) -> Result<(), DbusError> {
    let invalid = || DbusError::invalid_args("Variant must be an object with 't' and 'v' fields");
    let Value::Object(fields) = value else {
        return Err(invalid());
    };
    let (Some(Value::String(sig)), Some(inner)) = (fields.get("t"), fields.get("v")) else {
        return Err(invalid());
    };
    let ty = Signature::parse_single(sig)
        .map_err(|_| DbusError::invalid_args(format!("Invalid variant signature '{}'", sig)))?;
    check_value(&ty, inner)
}

/// JSON object keys are strings, so dict keys are parsed back into their type.
fn check_dict_key(ty: &DbusType, key: &str) -> Result<(), DbusError> {
    let bad_key = || DbusError::invalid_args(format!("Unexpected key '{}' in dict entry", key));
    match ty {
        DbusType::String => Ok(()),
        DbusType::ObjectPath if is_object_path(key) => Ok(()),
        DbusType::Signature if Signature::is_valid(key) => Ok(()),
        DbusType::Boolean if key == "true" || key == "false" => Ok(()),
        DbusType::Double if key.parse::<f64>().is_ok() => Ok(()),
        DbusType::Byte
        | DbusType::Int16
        | DbusType::UInt16
        | DbusType::Int32
        | DbusType::UInt32
        | DbusType::Int64
        | DbusType::UInt64 => {
            let number = match key.parse::<i64>() {
                Ok(n) => Value::from(n),
                Err(_) => Value::from(key.parse::<u64>().map_err(|_| bad_key())?),
            };
            check_value(ty, &number).map_err(|_| bad_key())
        }
        _ => Err(bad_key()),
    }
}
