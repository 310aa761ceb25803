use std::sync::Arc;

use anyhow::{Result, anyhow};
use serde_json::{Map, Value};

use super::{INSERT_LOG, Tool, required_str};
use crate::io::log_sink::LogSink;

pub struct InsertLog {
    sink: Arc<dyn LogSink>,
}

impl InsertLog {
    pub fn new(sink: Arc<dyn LogSink>) -> Self {
        Self { sink }
    }
}

impl Tool for InsertLog {
    fn name(&self) -> &str {
        INSERT_LOG
    }

    fn describe(&self) -> &str {
        "Inserts a record into a log collection. Input: collection_name, log_entry (dict)."
    }

    fn invoke(&self, params: &Map<String, Value>) -> Result<Value> {
        let collection = required_str(params, "collection_name")?;
        let entry = params
            .get("log_entry")
            .filter(|v| v.is_object())
            .ok_or_else(|| anyhow!("parameter 'log_entry' must be an object"))?;
        self.sink.insert(collection, entry)?;
        Ok(Value::String(format!("Log inserted into {collection}")))
    }
}
