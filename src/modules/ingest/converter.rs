// Copyright © 2025 rustmailer.com
// Licensed under RustMailer License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use regex::Regex;
use serde::Deserialize;
use std::{collections::BTreeMap, sync::LazyLock};

use crate::modules::ingest::{
    config::{ReverseProxyConfig, SiteConfig},
    VisitInput,
};

static ZIM_PATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^/content/(?P<zim>[^/?#]+)(?P<rest>/[^?#]*)?").unwrap());

const HANDLED_REQUEST: &str = "handled request";

#[derive(Debug, Deserialize)]
struct AccessLogLine {
    msg: Option<String>,
    ts: Option<f64>,
    request: Option<AccessLogRequest>,
    #[serde(default)]
    resp_headers: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct AccessLogRequest {
    host: String,
    uri: String,
}

/// A classified access-log line.
#[derive(Clone, Debug, PartialEq)]
pub struct Converted {
    pub ts: Option<i64>,
    pub inputs: Vec<VisitInput>,
}

/// Turns reverse-proxy JSON access-log lines into visit inputs.
///
/// Stateless: unrecognised or malformed lines produce no input.
pub struct LogConverter {
    config: ReverseProxyConfig,
}

impl LogConverter {
    pub fn new(config: ReverseProxyConfig) -> Self {
        Self { config }
    }

    pub fn process(&self, line: &str) -> Vec<VisitInput> {
        self.convert(line).inputs
    }

    pub fn convert(&self, line: &str) -> Converted {
        let Ok(parsed) = serde_json::from_str::<AccessLogLine>(line.trim()) else {
            return Converted {
                ts: None,
                inputs: Vec::new(),
            };
        };
        let ts = parsed.ts.map(|ts| ts.floor() as i64);
        let inputs = self.classify(&parsed).into_iter().collect();
        Converted { ts, inputs }
    }

    fn classify(&self, line: &AccessLogLine) -> Option<VisitInput> {
        if line.msg.as_deref() != Some(HANDLED_REQUEST) {
            return None;
        }
        let request = line.request.as_ref()?;
        match self.config.site_for_host(&request.host)? {
            SiteConfig::Files { title, .. } => {
                let path = request.uri.split(['?', '#']).next().unwrap_or_default();
                (path == "/").then(|| VisitInput::ContentHomeVisit {
                    content: title.clone(),
                })
            }
            SiteConfig::Zim { zims, .. } => {
                let captures = ZIM_PATH.captures(&request.uri)?;
                let content = zims.get(captures.name("zim")?.as_str())?.clone();
                match captures.name("rest").map(|rest| rest.as_str()) {
                    None | Some("/") => Some(VisitInput::ContentHomeVisit { content }),
                    Some(item) if is_html(&line.resp_headers) => {
                        Some(VisitInput::ContentItemVisit {
                            content,
                            item: item.to_string(),
                        })
                    }
                    Some(_) => None,
                }
            }
        }
    }
}

fn is_html(headers: &BTreeMap<String, Vec<String>>) -> bool {
    headers
        .iter()
        .filter(|(name, _)| name.eq_ignore_ascii_case("content-type"))
        .flat_map(|(_, values)| values)
        .any(|value| value.trim_start().to_ascii_lowercase().starts_with("text/html"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::ingest::config::sample_config;

    fn converter() -> LogConverter {
        LogConverter::new(sample_config())
    }

    #[test]
    fn test_files_home_visit() {
        let line = r#"{"level":"info","msg":"handled request","request":{"host":"nomad.renaud.test","uri":"/"}}"#;
        assert_eq!(
            converter().process(line),
            vec![VisitInput::ContentHomeVisit {
                content: "Nomad exercices du CP à la 3è".into()
            }]
        );
    }

    #[test]
    fn test_zim_item_visit() {
        let line = r#"{"level":"info","msg":"handled request","request":{"host":"kiwix.renaud.test","uri":"/content/wikipedia_en_all/questions/149/1-5-million-lines-of-code-0-tests-where"},"resp_headers":{"Content-Type":["text/html; charset=utf"]}}"#;
        assert_eq!(
            converter().process(line),
            vec![VisitInput::ContentItemVisit {
                content: "Wikipedia".into(),
                item: "/questions/149/1-5-million-lines-of-code-0-tests-where".into()
            }]
        );
    }

    #[test]
    fn test_zim_home_visit() {
        for uri in ["/content/wikipedia_en_all/", "/content/wikipedia_en_all"] {
            let line = format!(
                r#"{{"level":"info","msg":"handled request","request":{{"host":"kiwix.renaud.test","uri":"{}"}}}}"#,
                uri
            );
            assert_eq!(
                converter().process(&line),
                vec![VisitInput::ContentHomeVisit {
                    content: "Wikipedia".into()
                }],
                "uri {}",
                uri
            );
        }
    }

    #[test]
    fn test_unrecognised_lines_produce_nothing() {
        let lines = [
            "not json at all",
            "",
            r#"{"level":"info","msg":"received request","request":{"host":"nomad.renaud.test","uri":"/"}}"#,
            r#"{"level":"info","msg":"handled request"}"#,
            r#"{"level":"info","msg":"handled request","request":{"host":"unknown.renaud.test","uri":"/"}}"#,
            r#"{"level":"info","msg":"handled request","request":{"host":"nomad.renaud.test","uri":"/style.css"}}"#,
            r#"{"level":"info","msg":"handled request","request":{"host":"kiwix.renaud.test","uri":"/content/unknown_zim/"}}"#,
            r#"{"level":"info","msg":"handled request","request":{"host":"kiwix.renaud.test","uri":"/content/wikipedia_en_all/-/style.css"},"resp_headers":{"Content-Type":["text/css"]}}"#,
            r#"{"level":"info","msg":"handled request","request":{"host":"kiwix.renaud.test","uri":"/search?q=rust"}}"#,
        ];
        let converter = converter();
        for line in lines {
            assert!(
                converter.process(line).is_empty(),
                "Problem with this message which returned an input instead of none: {}",
                line
            );
        }
    }

    #[test]
    fn test_log_timestamp_is_kept() {
        let line = r#"{"level":"info","ts":1710511200.123,"msg":"handled request","request":{"host":"nomad.renaud.test","uri":"/?lang=fr"}}"#;
        let converted = converter().convert(line);
        assert_eq!(converted.ts, Some(1710511200));
        assert_eq!(converted.inputs.len(), 1);
    }
}
