//! The `com.redhat.Cockpit.DBusTests` objects the client tests run against.

use crate::bus::Bus;
use crate::object::{DbusInterface, MethodContext};
use async_trait::async_trait;
use base64::Engine;
use cockpit_dbus_core::{
    DbusError, InterfaceInfo, MethodInfo, Properties, PropertyInfo,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::info;

pub const TEST_BUS_NAME: &str = "com.redhat.Cockpit.DBusTests.Test";
pub const FROBBER_IFACE: &str = "com.redhat.Cockpit.DBusTests.Frobber";
pub const ALPHA_IFACE: &str = "com.redhat.Cockpit.DBusTests.Alpha";
pub const CLIQUE_IFACE: &str = "com.redhat.Cockpit.DBusTests.Clique";
pub const FROBBER_PATH: &str = "/otree/frobber";
pub const ERROR_FAILED: &str = "com.redhat.Cockpit.Error.Failed";

fn failed(message: impl Into<String>) -> DbusError {
    DbusError::remote(ERROR_FAILED, message)
}

fn str_arg(args: &[Value], index: usize) -> &str {
    args.get(index).and_then(Value::as_str).unwrap_or_default()
}

fn int_arg(args: &[Value], index: usize) -> i64 {
    args.get(index).and_then(Value::as_i64).unwrap_or_default()
}

fn uint_arg(args: &[Value], index: usize) -> u64 {
    args.get(index).and_then(Value::as_u64).unwrap_or_default()
}

/// Property values of a freshly created Frobber.
pub fn frobber_properties() -> Properties {
    let mut props = Properties::new();
    props.insert("y".into(), json!(42));
    props.insert("b".into(), json!(false));
    props.insert("n".into(), json!(0));
    props.insert("q".into(), json!(0));
    props.insert("i".into(), json!(0));
    props.insert("u".into(), json!(0));
    props.insert("x".into(), json!(0));
    props.insert("t".into(), json!(0));
    props.insert("d".into(), json!(0.0));
    props.insert("s".into(), json!(""));
    props.insert("o".into(), json!("/"));
    props.insert("g".into(), json!(""));
    props.insert("ay".into(), json!("QUJDYWJjAA=="));
    props.insert("as".into(), json!([]));
    props.insert("ao".into(), json!([]));
    props.insert("ag".into(), json!([]));
    props.insert("aay".into(), json!([]));
    props.insert("FinallyNormalName".into(), json!("There aint no place like home"));
    props
}

/// State shared by every Frobber: the objects created through `CreateObject`.
#[derive(Default)]
struct Objects {
    created: Mutex<BTreeSet<String>>,
}

pub struct Frobber {
    objects: Arc<Objects>,
}

impl Frobber {
    fn primitive_types(args: &[Value]) -> Vec<Value> {
        let bytestring = base64::engine::general_purpose::STANDARD.encode(b"bytestring!\xff\0");
        vec![
            json!((uint_arg(args, 0) as u8).wrapping_add(10)),
            json!(!args.get(1).and_then(Value::as_bool).unwrap_or_default()),
            json!((int_arg(args, 2) as i16).wrapping_add(100)),
            json!((uint_arg(args, 3) as u16).wrapping_add(1000)),
            json!((int_arg(args, 4) as i32).wrapping_add(10000)),
            json!((uint_arg(args, 5) as u32).wrapping_add(100000)),
            json!(int_arg(args, 6).wrapping_add(10000000)),
            json!(uint_arg(args, 7).wrapping_add(100000000)),
            json!(args.get(8).and_then(Value::as_f64).unwrap_or_default() / std::f64::consts::PI),
            json!(format!("Word! You said `{}'. Rock'n'roll!", str_arg(args, 9))),
            json!(format!("/modified{}", str_arg(args, 10))),
            json!("assgit"),
            json!(bytestring),
        ]
    }

    fn new_frobber(&self) -> Arc<dyn DbusInterface> {
        Arc::new(Frobber {
            objects: self.objects.clone(),
        })
    }
}

#[async_trait]
impl DbusInterface for Frobber {
    fn name(&self) -> &str {
        FROBBER_IFACE
    }

    fn info(&self) -> InterfaceInfo {
        let mut info = InterfaceInfo::new()
            .method("HelloWorld", MethodInfo::new(["s"], ["s"]))
            .method(
                "TestPrimitiveTypes",
                MethodInfo::new(
                    ["y", "b", "n", "q", "i", "u", "x", "t", "d", "s", "o", "g", "ay"],
                    ["y", "b", "n", "q", "i", "u", "x", "t", "d", "s", "o", "g", "ay"],
                ),
            )
            .method("TestAsv", MethodInfo::new(["a{sv}"], ["a{sv}"]))
            .method("RequestSignalEmission", MethodInfo::new(["i"], Vec::<String>::new()))
            .method("RequestPropertyMods", MethodInfo::default())
            .method("CreateObject", MethodInfo::new(["o"], Vec::<String>::new()))
            .method("DeleteObject", MethodInfo::new(["o"], Vec::<String>::new()))
            .method("DeleteAllObjects", MethodInfo::default())
            .method("AddAlpha", MethodInfo::default())
            .method("RemoveAlpha", MethodInfo::default())
            .method("CreateClique", MethodInfo::new(["s"], ["o"]))
            .method("UnimplementedMethod", MethodInfo::default())
            .signal("TestSignal", ["i", "as", "ao", "a{s(ii)}"]);

        for (name, signature) in [
            ("y", "y"),
            ("b", "b"),
            ("n", "n"),
            ("q", "q"),
            ("i", "i"),
            ("u", "u"),
            ("x", "x"),
            ("t", "t"),
            ("d", "d"),
            ("s", "s"),
            ("o", "o"),
            ("g", "g"),
            ("ay", "ay"),
            ("as", "as"),
            ("ao", "ao"),
            ("ag", "ag"),
            ("aay", "aay"),
            ("FinallyNormalName", "s"),
        ] {
            info = info.property(name, PropertyInfo::read_write(signature));
        }
        info
    }

    async fn call(
        &self,
        ctx: &MethodContext,
        member: &str,
        args: Vec<Value>,
    ) -> Result<Vec<Value>, DbusError> {
        match member {
            "HelloWorld" => {
                let greeting = str_arg(&args, 0);
                if greeting == "Yo" {
                    return Err(failed("Yo is not a proper greeting"));
                }
                Ok(vec![json!(format!(
                    "Word! You said `{}'. I'm Skeleton, btw!",
                    greeting
                ))])
            }
            "TestPrimitiveTypes" => Ok(Self::primitive_types(&args)),
            "TestAsv" => Ok(args),
            "RequestSignalEmission" => {
                ctx.emit_signal(
                    "TestSignal",
                    vec![
                        json!(43),
                        json!(["foo", "frobber"]),
                        json!(["/foo", "/foo/bar"]),
                        json!({ "first": [42, 42], "second": [43, 43] }),
                    ],
                );
                Ok(Vec::new())
            }
            "RequestPropertyMods" => {
                let y = ctx.property("y").and_then(|v| v.as_u64()).unwrap_or_default();
                let i = ctx.property("i").and_then(|v| v.as_i64()).unwrap_or_default();
                ctx.set_property("y", json!((y + 1) % 256))?;
                ctx.set_property("i", json!((i as i32).wrapping_add(1)))?;
                Ok(Vec::new())
            }
            "CreateObject" => {
                let path = str_arg(&args, 0);
                if ctx.bus().has_object(path) {
                    return Err(failed(format!("Object already exists at {}", path)));
                }
                ctx.add_interface(path, self.new_frobber(), frobber_properties())?;
                self.objects.created.lock().insert(path.to_string());
                Ok(Vec::new())
            }
            "DeleteObject" => {
                let path = str_arg(&args, 0);
                if !self.objects.created.lock().remove(path) {
                    return Err(failed(format!("No object at {}", path)));
                }
                ctx.remove_object(path);
                Ok(Vec::new())
            }
            "DeleteAllObjects" => {
                let created = std::mem::take(&mut *self.objects.created.lock());
                for path in created {
                    ctx.remove_object(&path);
                }
                Ok(Vec::new())
            }
            "AddAlpha" => {
                ctx.add_interface(ctx.path(), Arc::new(Alpha), Properties::new())?;
                Ok(Vec::new())
            }
            "RemoveAlpha" => {
                ctx.remove_interface(ctx.path(), ALPHA_IFACE);
                Ok(Vec::new())
            }
            "CreateClique" => {
                let name = str_arg(&args, 0);
                let paths: Vec<String> =
                    (0..3).map(|n| format!("/cliques/{}/{}", name, n)).collect();
                for (n, path) in paths.iter().enumerate() {
                    let mut props = Properties::new();
                    props.insert("Friend".into(), json!(paths[(n + 1) % paths.len()]));
                    ctx.add_interface(path, Arc::new(Clique), props)?;
                }
                Ok(vec![json!(paths[0])])
            }
            other => Err(DbusError::unknown_method(format!(
                "Method {} is not implemented on interface {}",
                other, FROBBER_IFACE
            ))),
        }
    }
}

/// Marker interface added and removed by `AddAlpha`/`RemoveAlpha`.
pub struct Alpha;

#[async_trait]
impl DbusInterface for Alpha {
    fn name(&self) -> &str {
        ALPHA_IFACE
    }

    fn info(&self) -> InterfaceInfo {
        InterfaceInfo::new()
    }

    async fn call(
        &self,
        _: &MethodContext,
        member: &str,
        _: Vec<Value>,
    ) -> Result<Vec<Value>, DbusError> {
        Err(DbusError::unknown_method(format!("No method {} on {}", member, ALPHA_IFACE)))
    }
}

/// One member of a clique; `Friend` points at the next member.
pub struct Clique;

#[async_trait]
impl DbusInterface for Clique {
    fn name(&self) -> &str {
        CLIQUE_IFACE
    }

    fn info(&self) -> InterfaceInfo {
        InterfaceInfo::new().property("Friend", PropertyInfo::read_only("o"))
    }

    async fn call(
        &self,
        _: &MethodContext,
        member: &str,
        _: Vec<Value>,
    ) -> Result<Vec<Value>, DbusError> {
        Err(DbusError::unknown_method(format!("No method {} on {}", member, CLIQUE_IFACE)))
    }
}

/// Export `/otree/frobber` and claim the test bus name plus `extra_names`.
pub fn install(bus: &Bus, extra_names: &[String]) -> Result<(), DbusError> {
    let owner = bus.allocate_unique_name();
    let frobber = Frobber {
        objects: Arc::new(Objects::default()),
    };
    bus.export(FROBBER_PATH, Arc::new(frobber), frobber_properties())?;
    bus.request_name(TEST_BUS_NAME, &owner)?;
    for name in extra_names {
        bus.request_name(name, &owner)?;
    }
    info!(owner = %owner, "test service installed");
    Ok(())
}
