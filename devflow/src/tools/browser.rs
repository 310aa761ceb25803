use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use serde_json::{Map, Value};

use super::{DEPLOY_AND_TEST_UI, RUN_TESTS, Tool, required_str};
use crate::io::browser::{BrowserTester, UiAction};

pub struct RunTests {
    browser: Arc<dyn BrowserTester>,
}

impl RunTests {
    pub fn new(browser: Arc<dyn BrowserTester>) -> Self {
        Self { browser }
    }
}

impl Tool for RunTests {
    fn name(&self) -> &str {
        RUN_TESTS
    }

    fn describe(&self) -> &str {
        "Runs a browser test file locally and reports success and output. Input: test_file_path."
    }

    fn invoke(&self, params: &Map<String, Value>) -> Result<Value> {
        let path = required_str(params, "test_file_path")?;
        Ok(serde_json::to_value(self.browser.run_tests(path)?)?)
    }
}

pub struct DeployAndTestUi {
    browser: Arc<dyn BrowserTester>,
}

impl DeployAndTestUi {
    pub fn new(browser: Arc<dyn BrowserTester>) -> Self {
        Self { browser }
    }
}

impl Tool for DeployAndTestUi {
    fn name(&self) -> &str {
        DEPLOY_AND_TEST_UI
    }

    fn describe(&self) -> &str {
        "Opens a deployed preview and runs UI interactions, returning screenshots and browser logs. Input: deploy_url (str), actions (list of objects, e.g. [{\"type\": \"click\", \"selector\": \"#button_id\"}])."
    }

    fn invoke(&self, params: &Map<String, Value>) -> Result<Value> {
        let url = required_str(params, "deploy_url")?;
        let actions = params
            .get("actions")
            .cloned()
            .ok_or_else(|| anyhow!("missing parameter 'actions'"))?;
        let actions: Vec<UiAction> =
            serde_json::from_value(actions).context("decode 'actions' parameter")?;
        Ok(serde_json::to_value(
            self.browser.deploy_and_interact(url, &actions)?,
        )?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::object;
    use crate::io::browser::UiActionKind;
    use crate::test_support::ScriptedBrowser;
    use serde_json::json;

    #[test]
    fn decodes_actions_for_the_driver() {
        let browser = Arc::new(ScriptedBrowser::passing());
        let out = DeployAndTestUi::new(browser.clone())
            .invoke(&object([
                ("deploy_url", json!("http://localhost:3000")),
                (
                    "actions",
                    json!([{"type": "type", "selector": "#q", "text": "hello"}]),
                ),
            ]))
            .expect("invoke");
        assert_eq!(out["success"], true);
        let seen = browser.ui_calls();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].1[0].kind, UiActionKind::Type);
        assert_eq!(seen[0].1[0].text.as_deref(), Some("hello"));
    }

    #[test]
    fn malformed_actions_are_rejected() {
        let browser = Arc::new(ScriptedBrowser::passing());
        let err = DeployAndTestUi::new(browser)
            .invoke(&object([
                ("deploy_url", json!("http://localhost:3000")),
                ("actions", json!("click the button")),
            ]))
            .unwrap_err();
        assert!(err.to_string().contains("actions"));
    }
}
