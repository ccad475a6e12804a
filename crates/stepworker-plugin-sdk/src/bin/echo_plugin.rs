//! Reference plugin that echoes text back to the worker.
//!
//! Exposes `echo`, which returns its parameters unchanged, and `upper`, which
//! upper-cases a `text` parameter. The binary serves until it receives a
//! termination signal.

use std::io::{self, Write};
use std::process::ExitCode;

use serde_json::Value;
use stepworker_plugin_sdk::{
    JobContext, PluginInfo, PluginParameter, PluginService, RpcError, ServiceDescriptor,
    cancel_on_termination, serve,
};

const DOCUMENTATION_BASE: &str = "https://github.com/stepworker/plugins/tree/main";

struct EchoService;

impl EchoService {
    fn text(params: &Value) -> Result<&str, RpcError> {
        params
            .get("text")
            .and_then(Value::as_str)
            .ok_or_else(|| RpcError::invalid_params("expected a string 'text' parameter"))
    }
}

impl PluginService for EchoService {
    fn descriptor(&self) -> ServiceDescriptor {
        ServiceDescriptor::new("echo", ["echo", "upper"]).with_info(
            PluginInfo::new("plugin-echo", "Echoes text back to the caller.")
                .with_parameter(PluginParameter::new("text", "Text to upper-case."))
                .with_documentation_base(DOCUMENTATION_BASE),
        )
    }

    fn call(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        match method {
            "upper" => Ok(Value::String(Self::text(&params)?.to_uppercase())),
            _ => Ok(params),
        }
    }
}

fn main() -> ExitCode {
    let ctx = JobContext::new();
    if let Err(error) = cancel_on_termination(&ctx) {
        report(&format!("failed to install signal handlers: {error}"));
        return ExitCode::FAILURE;
    }
    match serve(EchoService, &ctx) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            report(&error.to_string());
            ExitCode::FAILURE
        }
    }
}

fn report(message: &str) {
    let mut stderr = io::stderr().lock();
    writeln!(stderr, "stepworker-echo-plugin: {message}").ok();
}
