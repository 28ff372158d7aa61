use chrono::Utc;
use terminator_flow::{
    Action, ActionKind, AssertionKind, AutomationError, EngineConfig, ExecutionReport, Flow,
    FlowVerdict, NotExistsMode, StepReport, StepStatus,
};

const CALCULATOR_FLOW: &str = r#"{
    "testName": "Calculator addition",
    "targetApp": "CalculatorApp",
    "timeoutSeconds": 60,
    "steps": [
        { "order": 1, "action": "launch", "processPath": "calc.exe", "required": true },
        { "order": 2, "action": "click", "selector": "Button#num4Button" },
        { "order": 3, "action": "click", "selector": "Button#plusButton" },
        { "order": 4, "action": "click", "selector": "Button#num4Button" },
        {
            "order": 5,
            "action": "click",
            "selector": "Button#equalButton",
            "assertions": [
                { "kind": "text_contains", "selector": "Text#CalculatorResults", "expected": "8" }
            ]
        },
        { "order": 6, "action": "screenshot", "text": "artifacts/calc.png", "delayAfterMs": 200 }
    ]
}"#;

#[test]
fn test_parse_calculator_flow() -> Result<(), AutomationError> {
    let flow = Flow::from_json(CALCULATOR_FLOW)?;
    assert_eq!(flow.test_name, "Calculator addition");
    assert_eq!(flow.target_app.as_deref(), Some("CalculatorApp"));
    assert_eq!(flow.timeout().as_secs(), 60);
    assert_eq!(flow.steps.len(), 6);

    let launch = flow.steps[0].to_action()?;
    assert_eq!(
        launch,
        Action::Launch {
            path: "calc.exe".to_string(),
            args: Vec::new(),
            window_title: None,
        }
    );
    assert!(flow.steps[0].required);

    let equals = &flow.steps[4];
    assert_eq!(equals.assertions.len(), 1);
    assert_eq!(equals.assertions[0].kind, AssertionKind::TextContains);

    let shot = flow.steps[5].to_action()?;
    assert_eq!(
        shot,
        Action::Screenshot {
            path: Some("artifacts/calc.png".to_string())
        }
    );
    assert_eq!(flow.steps[5].delay_after_ms, 200);
    Ok(())
}

#[test]
fn test_parse_yaml_flow_with_browser_alias() -> Result<(), AutomationError> {
    let flow = Flow::from_yaml(
        r#"
testName: Example search
steps:
  - order: 1
    action: navigate
    url: https://example.com
    browser: chrome
  - order: 2
    action: assert-window
    windowTitle: Example Domain
  - order: 3
    action: scroll
    direction: up
    scrollAmount: 2
"#,
    )?;
    assert_eq!(flow.timeout_seconds, 300);
    assert_eq!(
        flow.steps[0].to_action()?,
        Action::Navigate {
            url: "https://example.com".to_string(),
            browser: Some("chrome".to_string()),
        }
    );
    assert_eq!(flow.steps[1].kind()?, ActionKind::AssertWindow);
    assert!(matches!(
        flow.steps[2].to_action()?,
        Action::Scroll { amount, .. } if amount == 2.0
    ));
    Ok(())
}

#[test]
fn test_flow_from_file_dispatches_on_extension() -> Result<(), AutomationError> {
    let dir = tempfile::tempdir()?;
    let json = dir.path().join("calc.json");
    std::fs::write(&json, CALCULATOR_FLOW)?;
    assert_eq!(Flow::from_file(&json)?.steps.len(), 6);

    let txt = dir.path().join("calc.txt");
    std::fs::write(&txt, CALCULATOR_FLOW)?;
    assert!(matches!(
        Flow::from_file(&txt),
        Err(AutomationError::InvalidArgument(_))
    ));
    Ok(())
}

#[test]
fn test_malformed_flow_is_serialization_error() {
    let err = Flow::from_json(r#"{ "steps": [] }"#).unwrap_err();
    assert!(matches!(err, AutomationError::Serialization(_)));
}

#[test]
fn test_engine_config_from_yaml_file() -> Result<(), AutomationError> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("engine.yaml");
    std::fs::write(
        &path,
        r#"
resolver:
  cache_ttl_ms: 0
  ambiguity: strict
assertions:
  not_exists: until_gone
default_step_timeout_ms: 2500
"#,
    )?;
    let config = EngineConfig::from_file(&path)?;
    assert_eq!(config.resolver.cache_ttl_ms, 0);
    assert_eq!(config.resolver.poll_interval_ms, 100);
    assert_eq!(config.assertions.not_exists, NotExistsMode::UntilGone);
    assert_eq!(config.default_step_timeout().as_millis(), 2500);
    assert_eq!(config.window_wait_ms, 5000);
    Ok(())
}

#[test]
fn test_report_json_shape() -> anyhow::Result<()> {
    let mut ok = StepReport::new(1, "launch", None);
    ok.elapsed_ms = 812;
    let mut failed = StepReport::new(2, "click", Some("Button#num4Button".to_string()));
    failed.status = StepStatus::Failed;
    failed.error = Some("Element not found: 'Button#num4Button' within 10000ms".to_string());
    failed.retry_count = 99;

    let report = ExecutionReport {
        test_name: "calc".to_string(),
        result: FlowVerdict::Failed,
        steps: vec![ok, failed],
        total_time_ms: 10_900,
        degraded: false,
        started_at: Utc::now(),
    };

    let value: serde_json::Value = serde_json::from_str(&report.to_json_pretty()?)?;
    assert_eq!(value["testName"], "calc");
    assert_eq!(value["result"], "failed");
    assert_eq!(value["totalTimeMs"], 10_900);
    assert_eq!(value["steps"][0]["status"], "passed");
    assert_eq!(value["steps"][0]["elapsedMs"], 812);
    assert!(value["steps"][0].get("error").is_none());
    assert_eq!(value["steps"][1]["selector"], "Button#num4Button");
    assert_eq!(value["steps"][1]["retryCount"], 99);
    assert!(value["startedAt"].is_string());

    assert_eq!(
        report.summary().split(';').nth(1).map(str::trim),
        Some("first problem at step 2 (click): Element not found: 'Button#num4Button' within 10000ms")
    );
    Ok(())
}
