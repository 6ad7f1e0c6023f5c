//! `org.freedesktop.DBus.Properties`, answered by the bus for every object.

use crate::bus::{check_signature, Bus};
use cockpit_dbus_core::error::names as errors;
use cockpit_dbus_core::marshal::{check_args, check_value};
use cockpit_dbus_core::{DbusError, InterfaceInfo, Properties, Signature};
use serde_json::{json, Map, Value};

pub const PROPERTIES: &str = "org.freedesktop.DBus.Properties";

fn variant(signature: &str, value: Value) -> Value {
    json!({ "t": signature, "v": value })
}

fn string_arg(args: &[Value], index: usize) -> &str {
    args.get(index).and_then(Value::as_str).unwrap_or_default()
}

/// Interface description and current values of `iface` at `path`.
fn lookup(bus: &Bus, path: &str, iface: &str) -> Result<(InterfaceInfo, Properties), DbusError> {
    let no_such = || {
        DbusError::invalid_args(format!(
            "No such interface '{}' on object at path {}",
            iface, path
        ))
    };
    let props = bus.properties(path, iface).ok_or_else(no_such)?;
    let info = bus.interface_info(iface).ok_or_else(no_such)?;
    Ok((info, props))
}

pub(crate) fn call(
    bus: &Bus,
    path: &str,
    member: &str,
    args: Vec<Value>,
    signature: Option<&str>,
) -> Result<(Vec<Value>, String), DbusError> {
    let (in_sig, out_sig) = match member {
        "Get" => ("ss", "v"),
        "GetAll" => ("s", "a{sv}"),
        "Set" => ("ssv", ""),
        other => {
            return Err(DbusError::unknown_method(format!(
                "No such method '{}' in interface '{}' at object path '{}'",
                other, PROPERTIES, path
            )))
        }
    };
    let expected =
        Signature::parse(in_sig).map_err(|e| DbusError::remote(errors::FAILED, e.to_string()))?;
    check_signature(&expected, signature)?;
    check_args(&expected, &args)?;

    let iface = string_arg(&args, 0);
    let (info, props) = lookup(bus, path, iface)?;

    let reply = match member {
        "Get" => {
            let name = string_arg(&args, 1);
            let prop = info
                .properties
                .get(name)
                .filter(|p| p.readable())
                .ok_or_else(|| DbusError::invalid_args(format!("No such property '{}'", name)))?;
            let value = props.get(name).cloned().unwrap_or(Value::Null);
            vec![variant(&prop.signature, value)]
        }
        "GetAll" => {
            let all: Map<String, Value> = info
                .properties
                .iter()
                .filter(|(_, p)| p.readable())
                .filter_map(|(name, p)| {
                    props
                        .get(name)
                        .map(|value| (name.clone(), variant(&p.signature, value.clone())))
                })
                .collect();
            vec![Value::Object(all)]
        }
        _ => {
            let name = string_arg(&args, 1);
            let prop = info
                .properties
                .get(name)
                .ok_or_else(|| DbusError::invalid_args(format!("No such property '{}'", name)))?;
            if !prop.writable() {
                return Err(DbusError::remote(
                    errors::PROPERTY_READ_ONLY,
                    format!("Property '{}' is not writable", name),
                ));
            }
            let given = args
                .get(2)
                .and_then(|v| v.get("t"))
                .and_then(Value::as_str)
                .unwrap_or_default();
            if given != prop.signature {
                return Err(DbusError::invalid_args(format!(
                    "Error setting property '{}': Expected type '{}' but got '{}'",
                    name, prop.signature, given
                )));
            }
            let value = args.get(2).and_then(|v| v.get("v")).cloned().unwrap_or(Value::Null);
            let ty = Signature::parse_single(&prop.signature)
                .map_err(|e| DbusError::remote(errors::FAILED, e.to_string()))?;
            check_value(&ty, &value)?;
            bus.set_property(path, iface, name, value)?;
            Vec::new()
        }
    };
    Ok((reply, out_sig.to_string()))
}
