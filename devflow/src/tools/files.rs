use std::sync::Arc;

use anyhow::Result;
use serde_json::{Map, Value};

use super::{LOCAL_FILE_WRITE, Tool, required_str};
use crate::io::workspace::LocalFiles;

pub struct LocalFileWrite {
    files: Arc<dyn LocalFiles>,
}

impl LocalFileWrite {
    pub fn new(files: Arc<dyn LocalFiles>) -> Self {
        Self { files }
    }
}

impl Tool for LocalFileWrite {
    fn name(&self) -> &str {
        LOCAL_FILE_WRITE
    }

    fn describe(&self) -> &str {
        "Writes content to a file in the local clone, creating directories as needed. Input: file_path (relative to the repository root), content."
    }

    fn invoke(&self, params: &Map<String, Value>) -> Result<Value> {
        let path = required_str(params, "file_path")?;
        let content = required_str(params, "content")?;
        Ok(Value::String(self.files.write(path, content)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::object;
    use crate::io::workspace::Workspace;
    use serde_json::json;

    #[test]
    fn writes_into_workspace() {
        let temp = tempfile::tempdir().expect("tempdir");
        let tool = LocalFileWrite::new(Arc::new(Workspace::new(temp.path())));
        tool.invoke(&object([
            ("file_path", json!("tests/test_toggle.py")),
            ("content", json!("def test_toggle(): pass\n")),
        ]))
        .expect("write");
        assert!(temp.path().join("tests/test_toggle.py").is_file());
    }

    #[test]
    fn missing_content_is_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let tool = LocalFileWrite::new(Arc::new(Workspace::new(temp.path())));
        let err = tool
            .invoke(&object([("file_path", json!("a.txt"))]))
            .unwrap_err();
        assert!(err.to_string().contains("content"));
    }
}
