mod async_order;
mod errors;
mod render;

use crate::{Config, Environment, RenderResult, StringLoader, Value};
use std::time::Duration;

pub(crate) fn env_with(templates: &[(&str, &str)]) -> Environment {
    env_with_config(Config::default(), templates)
}

pub(crate) fn env_with_config(config: Config, templates: &[(&str, &str)]) -> Environment {
    let loader = StringLoader::new();
    for (name, source) in templates {
        loader.add_template(*name, *source);
    }
    Environment::with_loader(config, loader)
}

pub(crate) fn sync_config() -> Config {
    Config {
        async_mode: false,
        ..Config::default()
    }
}

pub(crate) fn no_vars() -> Vec<(String, Value)> {
    Vec::new()
}

/// Async function that waits `millis` and returns `value`.
pub(crate) fn delayed(name: &str, millis: u64, value: &str) -> Value {
    let value = value.to_string();
    Value::async_function(name, move |_| {
        let value = value.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(millis)).await;
            RenderResult::Ok(Value::from(value))
        }
    })
}
