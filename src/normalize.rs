//! Engine output normalization
//!
//! Structured output goes through a fallback chain: parse the XML report
//! into a JSON document and summarize it, or, when the report is malformed
//! or truncated, hand back the raw text. A scan that ran but produced an
//! unreadable report is still reported as content, never as an error.

use roxmltree::{Document, Node, ParsingOptions};
use serde_json::{Map, Value};
use std::fmt::Write;
use tracing::{debug, warn};

use crate::{
    core::{ExecutionOutcome, OutputFormat},
    error::{GatewayError, Result},
};

/// Top-level element of a structured engine report
pub const REPORT_ROOT: &str = "nmaprun";

/// Deepest element nesting converted to JSON; real reports stay under 10
pub const MAX_ELEMENT_DEPTH: usize = 256;

const UNKNOWN: &str = "Unknown";
const UNKNOWN_SERVICE: &str = "unknown";
const TEXT_KEY: &str = "_";
const SUMMARY_UNAVAILABLE: &str =
    "Could not format scan results correctly. Please check the raw output.";

/// Which path produced the response text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportKind {
    /// Parsed XML with summary
    Structured,
    /// XML could not be parsed; raw text returned
    RawFallback,
    /// Plain or grepable text passed through
    Text,
    /// The engine did not succeed
    Failure,
}

impl ReportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Structured => "structured",
            Self::RawFallback => "raw_fallback",
            Self::Text => "text",
            Self::Failure => "failure",
        }
    }
}

/// Final response text plus how it was produced
#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    pub text: String,
    pub kind: ReportKind,
}

/// Shape the outcome of one engine run into response text
pub fn normalize(outcome: &ExecutionOutcome, target: &str, format: OutputFormat) -> Normalized {
    match outcome {
        ExecutionOutcome::TimedOut { limit } => Normalized {
            text: failure_text(
                target,
                &format!("Scan timed out after {} seconds", limit.as_secs()),
            ),
            kind: ReportKind::Failure,
        },
        ExecutionOutcome::Failed { message } => Normalized {
            text: failure_text(target, message),
            kind: ReportKind::Failure,
        },
        ExecutionOutcome::Success { stdout, .. } => match format {
            OutputFormat::Structured => structured_text(stdout, target),
            OutputFormat::Plain | OutputFormat::Grepable => Normalized {
                text: format!(
                    "Nmap Scan Results for {} ({} format)\n\n{}",
                    target,
                    format.wire_name(),
                    stdout
                ),
                kind: ReportKind::Text,
            },
        },
    }
}

/// Response text for any failed request
pub fn failure_text(target: &str, cause: &str) -> String {
    format!("Nmap scan failed for target: {}\n\nError: {}", target, cause)
}

fn structured_text(stdout: &str, target: &str) -> Normalized {
    let rendered = parse_report(stdout).and_then(|document| {
        let summary = summarize(&document);
        let pretty = serde_json::to_string_pretty(&document)
            .map_err(|e| GatewayError::parse("json", e.to_string()))?;
        Ok((summary, pretty))
    });

    match rendered {
        Ok((summary, pretty)) => Normalized {
            text: format!(
                "Nmap Scan Results for {} (XML Format)\n\n{}\n\nFull XML Output:\n{}",
                target, summary, pretty
            ),
            kind: ReportKind::Structured,
        },
        Err(error) => {
            warn!("XML parsing failed, returning raw XML output: {}", error);
            Normalized {
                text: format!("Nmap Scan Results for {} (Raw XML)\n\n{}", target, stdout),
                kind: ReportKind::RawFallback,
            }
        }
    }
}

/// Parse an engine XML report and check it has the expected root object
pub fn parse_report(xml: &str) -> Result<Value> {
    let document = xml_to_json(xml)?;
    match document.get(REPORT_ROOT) {
        Some(Value::Object(_)) => Ok(document),
        _ => Err(GatewayError::parse(
            "xml",
            format!("output did not contain a <{}> report", REPORT_ROOT),
        )),
    }
}

/// Convert XML into JSON
///
/// Attributes are merged into their element's object, repeated sibling
/// elements become arrays, and a text-only element becomes a string. Text
/// next to attributes or children is stored under `"_"`. Documents nested
/// deeper than [`MAX_ELEMENT_DEPTH`] are rejected.
pub fn xml_to_json(xml: &str) -> Result<Value> {
    let options = ParsingOptions {
        allow_dtd: true,
        ..ParsingOptions::default()
    };
    let document = Document::parse_with_options(xml, options)?;
    let root = document.root_element();

    let mut object = Map::new();
    object.insert(root.tag_name().name().to_string(), element_to_json(root, 1)?);
    Ok(Value::Object(object))
}

fn element_to_json(node: Node<'_, '_>, depth: usize) -> Result<Value> {
    if depth > MAX_ELEMENT_DEPTH {
        return Err(GatewayError::parse(
            "xml",
            format!("elements nested deeper than {} levels", MAX_ELEMENT_DEPTH),
        ));
    }

    let mut object = Map::new();

    for attribute in node.attributes() {
        insert_merged(
            &mut object,
            attribute.name(),
            Value::String(attribute.value().to_string()),
        );
    }

    let mut text = String::new();
    for child in node.children() {
        if child.is_element() {
            let value = element_to_json(child, depth + 1)?;
            insert_merged(&mut object, child.tag_name().name(), value);
        } else if child.is_text() {
            text.push_str(child.text().unwrap_or_default());
        }
    }

    let text = text.trim();
    if object.is_empty() {
        return Ok(Value::String(text.to_string()));
    }
    if !text.is_empty() {
        insert_merged(&mut object, TEXT_KEY, Value::String(text.to_string()));
    }
    Ok(Value::Object(object))
}

fn insert_merged(object: &mut Map<String, Value>, key: &str, value: Value) {
    match object.get_mut(key) {
        None => {
            object.insert(key.to_string(), value);
        }
        Some(Value::Array(items)) => items.push(value),
        Some(existing) => {
            let first = existing.take();
            *existing = Value::Array(vec![first, value]);
        }
    }
}

/// Human-readable digest of a parsed report
///
/// Never fails: missing fields render as "Unknown", and a document without
/// an `nmaprun` object yields a generic message instead.
pub fn summarize(document: &Value) -> String {
    write_summary(document).unwrap_or_else(|error| {
        debug!("Summary construction failed: {}", error);
        SUMMARY_UNAVAILABLE.to_string()
    })
}

fn write_summary(document: &Value) -> Result<String> {
    let run = match document.get(REPORT_ROOT) {
        Some(run @ Value::Object(_)) => run,
        _ => {
            return Err(GatewayError::parse(
                "json",
                format!("document has no <{}> object", REPORT_ROOT),
            ))
        }
    };
    let mut summary = String::new();

    writeln!(summary, "Scan started: {}", text_or(run, &["startstr"], UNKNOWN))?;

    for host in as_list(run.get("host")) {
        let address = text_or(host, &["address", "addr"], UNKNOWN);
        match text_at(host, &["hostnames", "hostname", "name"]) {
            Some(hostname) => writeln!(summary, "\nHost: {} ({})", address, hostname)?,
            None => writeln!(summary, "\nHost: {}", address)?,
        }
        writeln!(summary, "Status: {}", text_or(host, &["status", "state"], UNKNOWN))?;

        let ports = lookup(host, &["ports", "port"]);
        if ports.is_some() {
            writeln!(summary, "Open ports:")?;
            for port in as_list(ports).into_iter().filter(|port| is_open(port)) {
                writeln!(
                    summary,
                    "  {}/{} - {}",
                    text_or(port, &["portid"], UNKNOWN),
                    text_or(port, &["protocol"], UNKNOWN),
                    text_or(port, &["service", "name"], UNKNOWN_SERVICE)
                )?;
            }
        }
    }

    write!(
        summary,
        "\nScan completed: {}",
        text_or(run, &["runstats", "finished", "timestr"], UNKNOWN)
    )?;
    Ok(summary)
}

fn is_open(port: &Value) -> bool {
    text_at(port, &["state", "state"]).as_deref() == Some("open")
}

/// Follow `path` through nested objects, taking the first item of any array
fn lookup<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(value, |current, key| {
        let current = match current {
            Value::Array(items) => items.first()?,
            other => other,
        };
        current.get(*key)
    })
}

fn text_at(value: &Value, path: &[&str]) -> Option<String> {
    let found = match lookup(value, path)? {
        Value::Array(items) => items.first()?,
        other => other,
    };
    match found {
        Value::String(text) if !text.is_empty() => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

fn text_or(value: &Value, path: &[&str], default: &str) -> String {
    text_at(value, path).unwrap_or_else(|| default.to_string())
}

/// A single entry is treated as a one-element list
fn as_list(value: Option<&Value>) -> Vec<&Value> {
    match value {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items.iter().collect(),
        Some(single) => vec![single],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const REPORT: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE nmaprun>
<?xml-stylesheet href="file:///usr/share/nmap/nmap.xsl" type="text/xsl"?>
<nmaprun scanner="nmap" args="nmap -oX - -T4 -p 1-1000 scanme.example" start="1700000000" startstr="Tue Nov 14 22:13:20 2023" version="7.94">
  <host starttime="1700000000" endtime="1700000005">
    <status state="up" reason="syn-ack"/>
    <address addr="45.33.32.156" addrtype="ipv4"/>
    <hostnames>
      <hostname name="scanme.example" type="user"/>
      <hostname name="li982-156.members.linode.com" type="PTR"/>
    </hostnames>
    <ports>
      <extraports state="closed" count="995"/>
      <port protocol="tcp" portid="22"><state state="open" reason="syn-ack"/><service name="ssh" method="table" conf="3"/></port>
      <port protocol="tcp" portid="25"><state state="filtered" reason="no-response"/><service name="smtp"/></port>
      <port protocol="tcp" portid="80"><state state="open" reason="syn-ack"/><service name="http"/></port>
      <port protocol="tcp" portid="9929"><state state="open" reason="syn-ack"/></port>
      <port protocol="tcp" portid="31337"><state state="closed" reason="reset"/><service name="Elite"/></port>
    </ports>
  </host>
  <runstats>
    <finished time="1700000005" timestr="Tue Nov 14 22:13:25 2023" elapsed="5.12" exit="success"/>
    <hosts up="1" down="0" total="1"/>
  </runstats>
</nmaprun>
"#;

    fn success(stdout: &str) -> ExecutionOutcome {
        ExecutionOutcome::Success {
            stdout: stdout.to_string(),
            stderr: String::new(),
        }
    }

    #[test]
    fn test_attributes_merge_and_siblings_become_arrays() {
        let document = xml_to_json(REPORT).unwrap();
        let run = &document["nmaprun"];
        assert_eq!(run["scanner"], "nmap");
        assert_eq!(run["host"]["status"]["state"], "up");
        assert_eq!(run["host"]["ports"]["port"].as_array().unwrap().len(), 5);
        assert_eq!(run["host"]["ports"]["port"][0]["service"]["name"], "ssh");
        assert!(run["host"]["hostnames"]["hostname"].is_array());
        assert!(run["host"]["ports"]["extraports"].is_object());
    }

    #[test]
    fn test_deeply_nested_report_falls_back_to_raw() {
        let depth = 20_000;
        let xml = format!(
            "<nmaprun a=\"1\">{}{}</nmaprun>",
            "<x>".repeat(depth),
            "</x>".repeat(depth)
        );
        assert!(matches!(xml_to_json(&xml), Err(GatewayError::Parse { .. })));

        let normalized = normalize(&success(&xml), "10.0.0.1", OutputFormat::Structured);
        assert_eq!(normalized.kind, ReportKind::RawFallback);
        assert!(normalized.text.ends_with(&xml));
    }

    #[test]
    fn test_nesting_at_the_limit_still_converts() {
        let inner = MAX_ELEMENT_DEPTH - 1;
        let xml = format!("<nmaprun>{}{}</nmaprun>", "<x>".repeat(inner), "</x>".repeat(inner));
        assert!(xml_to_json(&xml).is_ok());
    }

    #[test]
    fn test_summary_without_report_object_is_generic() {
        for document in [
            serde_json::json!({ "scan": { "host": {} } }),
            serde_json::json!({ "nmaprun": "" }),
            Value::Null,
        ] {
            assert_eq!(summarize(&document), SUMMARY_UNAVAILABLE, "{}", document);
        }
    }

    #[test]
    fn test_text_content_handling() {
        let document = xml_to_json(r#"<a><b>hello</b><c id="1">world</c><d/></a>"#).unwrap();
        assert_eq!(document["a"]["b"], "hello");
        assert_eq!(document["a"]["c"]["id"], "1");
        assert_eq!(document["a"]["c"]["_"], "world");
        assert_eq!(document["a"]["d"], "");
    }

    #[test]
    fn test_summary_lists_exactly_the_open_ports() {
        let summary = summarize(&parse_report(REPORT).unwrap());
        assert_eq!(
            summary,
            "Scan started: Tue Nov 14 22:13:20 2023\n\
             \nHost: 45.33.32.156 (scanme.example)\n\
             Status: up\n\
             Open ports:\n\
             \x20 22/tcp - ssh\n\
             \x20 80/tcp - http\n\
             \x20 9929/tcp - unknown\n\
             \nScan completed: Tue Nov 14 22:13:25 2023"
        );
        assert!(!summary.contains("25/tcp"));
        assert!(!summary.contains("31337"));
    }

    #[test]
    fn test_missing_fields_render_unknown() {
        let xml = r#"<nmaprun><host><ports><port portid="443"><state state="open"/></port></ports></host></nmaprun>"#;
        let summary = summarize(&parse_report(xml).unwrap());
        assert!(summary.starts_with("Scan started: Unknown\n"));
        assert!(summary.contains("\nHost: Unknown\n"));
        assert!(summary.contains("Status: Unknown\n"));
        assert!(summary.contains("  443/Unknown - unknown\n"));
        assert!(summary.ends_with("Scan completed: Unknown"));
    }

    #[test]
    fn test_multiple_hosts_and_addresses() {
        let xml = r#"<nmaprun startstr="now">
            <host><status state="up"/><address addr="10.0.0.1" addrtype="ipv4"/><address addr="AA:BB:CC:DD:EE:FF" addrtype="mac"/></host>
            <host><status state="down"/><address addr="10.0.0.2" addrtype="ipv4"/></host>
        </nmaprun>"#;
        let summary = summarize(&parse_report(xml).unwrap());
        assert!(summary.contains("\nHost: 10.0.0.1\nStatus: up\n"));
        assert!(summary.contains("\nHost: 10.0.0.2\nStatus: down\n"));
        assert!(!summary.contains("Open ports"));
    }

    #[test]
    fn test_structured_success_text() {
        let normalized = normalize(&success(REPORT), "scanme.example", OutputFormat::Structured);
        assert_eq!(normalized.kind, ReportKind::Structured);
        assert!(normalized
            .text
            .starts_with("Nmap Scan Results for scanme.example (XML Format)\n\nScan started:"));
        assert!(normalized.text.contains("\n\nFull XML Output:\n{"));
        assert!(normalized.text.contains("\"portid\": \"9929\""));
    }

    #[test]
    fn test_malformed_xml_returns_raw_text() {
        let truncated = &REPORT[..REPORT.len() / 2];
        let normalized = normalize(&success(truncated), "scanme.example", OutputFormat::Structured);
        assert_eq!(normalized.kind, ReportKind::RawFallback);
        assert_eq!(
            normalized.text,
            format!("Nmap Scan Results for scanme.example (Raw XML)\n\n{}", truncated)
        );
    }

    #[test]
    fn test_wrong_root_returns_raw_text() {
        for stdout in ["<scan><host/></scan>", "<nmaprun/>", "", "Starting Nmap 7.94"] {
            let normalized = normalize(&success(stdout), "10.0.0.1", OutputFormat::Structured);
            assert_eq!(normalized.kind, ReportKind::RawFallback, "{:?}", stdout);
            assert!(normalized.text.ends_with(stdout));
        }
    }

    #[test]
    fn test_text_formats_pass_through() {
        let report = "Nmap scan report for scanme.example\n22/tcp open ssh\n";
        let plain = normalize(&success(report), "scanme.example", OutputFormat::Plain);
        assert_eq!(plain.kind, ReportKind::Text);
        assert_eq!(
            plain.text,
            format!("Nmap Scan Results for scanme.example (normal format)\n\n{}", report)
        );

        let grepable = normalize(&success(report), "scanme.example", OutputFormat::Grepable);
        assert!(grepable.text.starts_with("Nmap Scan Results for scanme.example (grepable format)"));
    }

    #[test]
    fn test_failures_name_target_and_cause() {
        let timed_out = ExecutionOutcome::TimedOut { limit: Duration::from_secs(300) };
        let normalized = normalize(&timed_out, "10.0.0.0/24", OutputFormat::Structured);
        assert_eq!(normalized.kind, ReportKind::Failure);
        assert_eq!(
            normalized.text,
            "Nmap scan failed for target: 10.0.0.0/24\n\nError: Scan timed out after 300 seconds"
        );

        let failed = ExecutionOutcome::Failed { message: "Command failed with exit code 1".into() };
        let normalized = normalize(&failed, "example.com", OutputFormat::Plain);
        assert!(normalized.text.contains("example.com"));
        assert!(normalized.text.ends_with("Error: Command failed with exit code 1"));
    }
}
