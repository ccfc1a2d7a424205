//! Test plan files.
//!
//! A plan file describes the request every virtual user performs, the ramp
//! stages, and executor settings. Durations use `humantime` syntax
//! (`"500ms"`, `"30s"`, `"1m"`).
//!
//! ```toml
//! name = "enroll"
//!
//! [request]
//! url = "https://example.com/enroll"
//!
//! [[stages]]
//! duration = "30s"
//! target = 50
//!
//! [[stages]]
//! duration = "1m"
//! target = 100
//!
//! [settings]
//! grace_timeout = "10s"
//! ```
//!
//! Files ending in `.json` are parsed as JSON with the same layout, anything
//! else as TOML.
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, path::Path, time::Duration};
use tokio_util::sync::CancellationToken;

use crate::{
    error::ConfigError,
    executor::{Plan, Stage, StageExecutor},
};

/// Top-level plan file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct LoadTestConfig {
    #[serde(default = "default_name")]
    pub name: String,
    pub request: RequestConfig,
    #[serde(default)]
    pub stages: Vec<StageConfig>,
    #[serde(default)]
    pub settings: Settings,
}

fn default_name() -> String {
    "load test".to_string()
}

/// The HTTP request each virtual user performs.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RequestConfig {
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: Option<String>,
}

fn default_method() -> String {
    "GET".to_string()
}

/// One `[[stages]]` entry. Kept loose (signed target, textual duration) so
/// bad input is reported as a [`ConfigError`] rather than a parse failure.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct StageConfig {
    pub duration: String,
    pub target: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    pub tick: String,
    pub grace_timeout: String,
    pub action_timeout: Option<String>,
    pub think_time: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            tick: "1s".to_string(),
            grace_timeout: "30s".to_string(),
            action_timeout: None,
            think_time: None,
        }
    }
}

fn parse_duration(field: impl Into<String>, value: &str) -> Result<Duration, ConfigError> {
    humantime::parse_duration(value).map_err(|source| ConfigError::InvalidDuration {
        field: field.into(),
        value: value.to_string(),
        source,
    })
}

impl Settings {
    pub fn tick(&self) -> Result<Duration, ConfigError> {
        let tick = parse_duration("settings.tick", &self.tick)?;
        if tick.is_zero() {
            return Err(ConfigError::ZeroTick);
        }
        Ok(tick)
    }

    pub fn grace_timeout(&self) -> Result<Duration, ConfigError> {
        parse_duration("settings.grace_timeout", &self.grace_timeout)
    }

    pub fn action_timeout(&self) -> Result<Option<Duration>, ConfigError> {
        self.action_timeout
            .as_deref()
            .map(|v| parse_duration("settings.action_timeout", v))
            .transpose()
    }

    pub fn think_time(&self) -> Result<Option<Duration>, ConfigError> {
        self.think_time
            .as_deref()
            .map(|v| parse_duration("settings.think_time", v))
            .transpose()
    }
}

impl LoadTestConfig {
    /// Parse and validate a TOML plan.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate a JSON plan.
    pub fn from_json_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a plan file, picking the format from its extension.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if is_json {
            Self::from_json_str(&content)
        } else {
            Self::from_toml_str(&content)
        }
    }

    /// Check everything that can be checked without running anything.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.plan()?;
        self.settings.tick()?;
        self.settings.grace_timeout()?;
        self.settings.action_timeout()?;
        self.settings.think_time()?;
        #[cfg(feature = "builtins")]
        self.http_action()?;
        Ok(())
    }

    pub fn plan(&self) -> Result<Plan, ConfigError> {
        let stages = self
            .stages
            .iter()
            .enumerate()
            .map(|(i, stage)| {
                let target = u64::try_from(stage.target).map_err(|_| ConfigError::NegativeTarget {
                    stage: i,
                    target: stage.target,
                })?;
                let duration = parse_duration(format!("stages[{i}].duration"), &stage.duration)?;
                Ok(Stage::new(duration, target))
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;
        Plan::new(stages)
    }

    /// Build a [`StageExecutor`] from the plan and settings.
    pub fn executor(&self, interrupt: CancellationToken) -> Result<StageExecutor, ConfigError> {
        Ok(StageExecutor::builder()
            .plan(self.plan()?)
            .tick(self.settings.tick()?)
            .grace_timeout(self.settings.grace_timeout()?)
            .action_timeout(self.settings.action_timeout()?)
            .think_time(self.settings.think_time()?)
            .interrupt(interrupt)
            .build())
    }
}

#[cfg(feature = "builtins")]
mod builtins {
    use super::*;
    use crate::action::HttpAction;
    use reqwest::{
        Method,
        header::{HeaderMap, HeaderName, HeaderValue},
    };

    impl LoadTestConfig {
        /// Build the [`HttpAction`] described by the `[request]` table.
        pub fn http_action(&self) -> Result<HttpAction, ConfigError> {
            let request = &self.request;
            let method = Method::from_bytes(request.method.to_ascii_uppercase().as_bytes())
                .map_err(|_| ConfigError::InvalidMethod(request.method.clone()))?;

            let mut headers = HeaderMap::new();
            for (name, value) in &request.headers {
                let invalid = |message: String| ConfigError::InvalidHeader {
                    name: name.clone(),
                    message,
                };
                let key = HeaderName::from_bytes(name.as_bytes()).map_err(|e| invalid(e.to_string()))?;
                let val = HeaderValue::from_str(value).map_err(|e| invalid(e.to_string()))?;
                headers.insert(key, val);
            }

            let mut action = HttpAction::builder()
                .url(request.url.clone())
                .method(method)
                .headers(headers)
                .build();
            action.body = request.body.clone();
            Ok(action)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ENROLL: &str = r#"
        name = "enroll"

        [request]
        url = "https://t2s-courses.com/enroll"

        [[stages]]
        duration = "30s"
        target = 50

        [[stages]]
        duration = "1m"
        target = 100
    "#;

    fn with_stages(stages: &str) -> String {
        format!("[request]\nurl = \"http://localhost\"\n{stages}")
    }

    #[test]
    fn parses_a_ramp_plan() {
        let config = LoadTestConfig::from_toml_str(ENROLL).unwrap();
        assert_eq!(config.name, "enroll");
        assert_eq!(config.request.method, "GET");
        let plan = config.plan().unwrap();
        assert_eq!(
            plan.stages(),
            [
                Stage::new(Duration::from_secs(30), 50),
                Stage::new(Duration::from_secs(60), 100),
            ]
        );
        assert_eq!(plan.total_duration(), Duration::from_secs(90));
    }

    #[test]
    fn settings_default_when_absent() {
        let config = LoadTestConfig::from_toml_str(ENROLL).unwrap();
        let settings = &config.settings;
        assert_eq!(settings.tick().unwrap(), Duration::from_secs(1));
        assert_eq!(settings.grace_timeout().unwrap(), Duration::from_secs(30));
        assert_eq!(settings.action_timeout().unwrap(), None);
        assert_eq!(settings.think_time().unwrap(), None);

        let executor = config.executor(CancellationToken::new()).unwrap();
        assert_eq!(executor.tick, Duration::from_secs(1));
        assert_eq!(executor.plan.max_target(), 100);
    }

    #[test]
    fn parses_settings_and_request_details() {
        let config = LoadTestConfig::from_toml_str(
            r#"
            [request]
            url = "http://localhost:3000/login"
            method = "post"
            body = '{"user":"a"}'
            [request.headers]
            content-type = "application/json"

            [[stages]]
            duration = "0s"
            target = 20

            [settings]
            tick = "250ms"
            grace_timeout = "5s"
            action_timeout = "2s"
            think_time = "100ms"
            "#,
        )
        .unwrap();
        assert_eq!(config.name, "load test");
        assert_eq!(config.settings.tick().unwrap(), Duration::from_millis(250));
        assert_eq!(
            config.settings.action_timeout().unwrap(),
            Some(Duration::from_secs(2))
        );
        assert_eq!(
            config.settings.think_time().unwrap(),
            Some(Duration::from_millis(100))
        );
        assert_eq!(config.plan().unwrap().stages()[0].duration, Duration::ZERO);
    }

    #[test]
    fn parses_json() {
        let config = LoadTestConfig::from_json_str(
            r#"{
                "name": "json",
                "request": { "url": "http://localhost" },
                "stages": [{ "duration": "10s", "target": 10 }],
                "settings": { "grace_timeout": "1s" }
            }"#,
        )
        .unwrap();
        assert_eq!(config.name, "json");
        assert_eq!(config.settings.tick, "1s");
        assert_eq!(
            config.settings.grace_timeout().unwrap(),
            Duration::from_secs(1)
        );
    }

    #[test]
    fn missing_stages_is_an_empty_plan() {
        let err = LoadTestConfig::from_toml_str(&with_stages("")).unwrap_err();
        assert!(matches!(err, ConfigError::EmptyPlan), "got {err:?}");
    }

    #[test]
    fn negative_target_is_rejected() {
        let err = LoadTestConfig::from_toml_str(&with_stages(
            "[[stages]]\nduration = \"1s\"\ntarget = 1\n[[stages]]\nduration = \"1s\"\ntarget = -5\n",
        ))
        .unwrap_err();
        assert!(
            matches!(err, ConfigError::NegativeTarget { stage: 1, target: -5 }),
            "got {err:?}"
        );
    }

    #[test]
    fn bad_duration_names_the_field() {
        let err = LoadTestConfig::from_toml_str(&with_stages(
            "[[stages]]\nduration = \"-3s\"\ntarget = 1\n",
        ))
        .unwrap_err();
        match err {
            ConfigError::InvalidDuration { field, value, .. } => {
                assert_eq!(field, "stages[0].duration");
                assert_eq!(value, "-3s");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn overflowing_stage_durations_are_rejected() {
        let stage = "[[stages]]\nduration = \"300000000000years\"\ntarget = 1\n";
        let err = LoadTestConfig::from_toml_str(&with_stages(&stage.repeat(2))).unwrap_err();
        assert!(matches!(err, ConfigError::PlanTooLong), "got {err:?}");
    }

    #[test]
    fn zero_tick_is_rejected() {
        let err = LoadTestConfig::from_toml_str(&with_stages(
            "[[stages]]\nduration = \"1s\"\ntarget = 1\n[settings]\ntick = \"0s\"\n",
        ))
        .unwrap_err();
        assert!(matches!(err, ConfigError::ZeroTick), "got {err:?}");
    }

    #[test]
    fn malformed_files_are_parse_errors() {
        assert!(matches!(
            LoadTestConfig::from_toml_str("stages = 3"),
            Err(ConfigError::Toml(_))
        ));
        assert!(matches!(
            LoadTestConfig::from_json_str("{"),
            Err(ConfigError::Json(_))
        ));
    }

    #[test]
    fn from_path_picks_format_by_extension() {
        let dir = std::env::temp_dir();
        let json = dir.join(format!("surge-config-test-{}.json", std::process::id()));
        std::fs::write(
            &json,
            r#"{"request":{"url":"http://localhost"},"stages":[{"duration":"1s","target":1}]}"#,
        )
        .unwrap();
        let config = LoadTestConfig::from_path(&json).unwrap();
        std::fs::remove_file(&json).unwrap();
        assert_eq!(config.plan().unwrap().max_target(), 1);

        let missing = dir.join("surge-config-test-does-not-exist.toml");
        assert!(matches!(
            LoadTestConfig::from_path(&missing),
            Err(ConfigError::Io { .. })
        ));
    }

    #[cfg(feature = "builtins")]
    mod http {
        use super::*;
        use reqwest::Method;

        #[test]
        fn builds_the_http_action() {
            let config = LoadTestConfig::from_toml_str(
                r#"
                [request]
                url = "http://localhost:3000/login"
                method = "post"
                body = "hello"
                [request.headers]
                accept = "text/html"

                [[stages]]
                duration = "1s"
                target = 1
                "#,
            )
            .unwrap();
            let action = config.http_action().unwrap();
            assert_eq!(action.method, Method::POST);
            assert_eq!(action.url, "http://localhost:3000/login");
            assert_eq!(action.body.as_deref(), Some("hello"));
            assert_eq!(action.headers["accept"], "text/html");
        }

        #[test]
        fn invalid_method_is_rejected() {
            let err = LoadTestConfig::from_toml_str(&format!(
                "[request]\nurl = \"http://localhost\"\nmethod = \"GE T\"\n\
                 [[stages]]\nduration = \"1s\"\ntarget = 1\n"
            ))
            .unwrap_err();
            assert!(matches!(err, ConfigError::InvalidMethod(m) if m == "GE T"));
        }

        #[test]
        fn invalid_header_is_rejected() {
            let err = LoadTestConfig::from_toml_str(
                "[request]\nurl = \"http://localhost\"\n[request.headers]\n\"bad header\" = \"x\"\n\
                 [[stages]]\nduration = \"1s\"\ntarget = 1\n",
            )
            .unwrap_err();
            assert!(
                matches!(&err, ConfigError::InvalidHeader { name, .. } if name == "bad header"),
                "got {err:?}"
            );
        }
    }
}
