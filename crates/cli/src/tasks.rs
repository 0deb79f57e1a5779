//! Functions built into the binary that configuration can schedule.

use {
    qregistry_periodic::{
        Result,
        function::{FunctionCatalog, TaskFunction},
        types::Params,
    },
    serde_json::{Value, json},
    tracing::info,
};

const MODULE: &str = "qregistry.builtin";

fn heartbeat(args: &Params) -> Result<Value> {
    info!(?args, "heartbeat");
    Ok(json!({ "ok": true }))
}

fn echo(args: &Params) -> Result<Value> {
    Ok(Value::Object(args.clone()))
}

/// Catalog that static `func = "qregistry.builtin.*"` entries resolve against.
pub fn builtin_catalog() -> FunctionCatalog {
    FunctionCatalog::new()
        .with(TaskFunction::new(MODULE, "heartbeat", heartbeat))
        .with(TaskFunction::new(MODULE, "echo", echo))
}
