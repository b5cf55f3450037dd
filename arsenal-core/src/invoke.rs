//! Tool invocation adapter
//!
//! Turns (tool, target, parameters) into a validated argument vector, runs it
//! through the process runner, and normalizes the result into a bounded
//! [`Observation`]. Targets are validated before any process spawns, and
//! arguments are always passed as a discrete vector, so shell metacharacters
//! in a target can never execute.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tracing::debug;

use crate::config::ArsenalConfig;
use crate::process::ProcessRunner;
use crate::registry::{self, RunSpec, ToolDescriptor};
use crate::{Error, Result};

/// Reserved parameter key: per-invocation timeout override in seconds
pub const TIMEOUT_PARAM: &str = "timeout";

/// Cap on parsed findings per observation
const MAX_FINDINGS: usize = 200;

/// Bounded, structured result of one tool invocation
#[derive(Debug, Clone, Serialize)]
pub struct Observation {
    pub tool: String,
    /// The exact command line, rendered for display only (never shelled)
    pub command: String,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    /// Parsed finding strings; empty when no parser matched (not an error)
    pub findings: Vec<String>,
    /// True when stdout or stderr exceeded the capture bound
    pub truncated: bool,
    pub timed_out: bool,
    /// Set for validation failures, unknown tools, and spawn errors
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl Observation {
    /// Observation describing a failure that never reached a process
    pub fn synthetic(tool: &str, message: impl Into<String>) -> Self {
        Self {
            tool: tool.to_string(),
            command: String::new(),
            exit_code: -1,
            stdout: String::new(),
            stderr: String::new(),
            findings: Vec::new(),
            truncated: false,
            timed_out: false,
            error: Some(message.into()),
            timestamp: Utc::now(),
        }
    }

    /// Fatal means the tool never ran usefully: validation/spawn failure or
    /// timeout. An ordinary nonzero exit is regular observation content.
    pub fn is_fatal(&self) -> bool {
        self.error.is_some() || self.timed_out
    }
}

/// Builds and runs validated tool command lines
pub struct InvocationAdapter {
    tools_dir: PathBuf,
    capture_limit: usize,
}

impl InvocationAdapter {
    pub fn new(config: &ArsenalConfig) -> Self {
        Self {
            tools_dir: config.tools.dir.clone(),
            capture_limit: config.scan.capture_limit,
        }
    }

    pub(crate) fn tools_dir(&self) -> &std::path::Path {
        &self.tools_dir
    }

    /// Invoke a tool against a target. Never fails: every outcome, including
    /// bad input, is represented as an [`Observation`].
    pub async fn invoke(
        &self,
        id: &str,
        target: &str,
        params: &BTreeMap<String, String>,
    ) -> Observation {
        let desc = match registry::describe(id) {
            Ok(desc) => desc,
            Err(err) => return Observation::synthetic(id, err.to_string()),
        };
        if let Err(err) = validate_target(target) {
            return Observation::synthetic(id, err.to_string());
        }
        let (program, args) = match self.build_command(desc, target, params) {
            Ok(command) => command,
            Err(err) => return Observation::synthetic(id, err.to_string()),
        };
        let timeout = invocation_timeout(desc, params);

        debug!(tool = id, %target, "invoking: {program} {}", args.join(" "));
        let result = ProcessRunner::run(&program, &args, timeout, None).await;

        // Parse before truncating so findings deep in the output survive
        let findings = if result.exit_code == 0 {
            parse_findings(desc.id, &result.stdout)
        } else {
            Vec::new()
        };
        let (stdout, out_truncated) = truncate_to(&result.stdout, self.capture_limit);
        let (stderr, err_truncated) = truncate_to(&result.stderr, self.capture_limit);

        Observation {
            tool: desc.id.to_string(),
            command: format!("{program} {}", args.join(" ")),
            exit_code: result.exit_code,
            stdout,
            stderr,
            findings,
            truncated: out_truncated || err_truncated,
            timed_out: result.timed_out,
            error: result.spawn_error,
            timestamp: Utc::now(),
        }
    }

    /// Build (program, argv) from the descriptor's run spec plus allow-listed
    /// parameter flags. The target is always one opaque argument.
    fn build_command(
        &self,
        desc: &ToolDescriptor,
        target: &str,
        params: &BTreeMap<String, String>,
    ) -> Result<(String, Vec<String>)> {
        let mut args: Vec<String>;
        let program = match desc.run {
            RunSpec::Script {
                file,
                target_flag,
                extra,
            } => {
                let script = desc.install_dir(&self.tools_dir).join(file);
                args = vec![
                    script.display().to_string(),
                    target_flag.to_string(),
                    target.to_string(),
                ];
                args.extend(extra.iter().map(|s| s.to_string()));
                "python3".to_string()
            }
            RunSpec::Binary {
                program,
                target_flag,
                extra,
            } => {
                args = vec![target_flag.to_string(), target.to_string()];
                args.extend(extra.iter().map(|s| s.to_string()));
                desc.resolve_binary(&self.tools_dir)
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| program.to_string())
            }
            RunSpec::NseScript { script } => {
                let script_path = desc.install_dir(&self.tools_dir).join(script);
                args = vec![
                    "-sV".to_string(),
                    format!("--script={}", script_path.display()),
                    target.to_string(),
                ];
                "nmap".to_string()
            }
            RunSpec::NotRunnable => {
                return Err(Error::Validation(format!(
                    "{} is not directly invocable",
                    desc.id
                )));
            }
        };

        for (key, value) in params {
            if key == TIMEOUT_PARAM {
                continue;
            }
            if !desc.allowed_flags.contains(&key.as_str()) {
                return Err(Error::Validation(format!(
                    "flag {key} is not allowed for {}",
                    desc.id
                )));
            }
            args.push(key.clone());
            if !value.is_empty() {
                args.push(value.clone());
            }
        }

        Ok((program, args))
    }
}

fn invocation_timeout(desc: &ToolDescriptor, params: &BTreeMap<String, String>) -> Duration {
    params
        .get(TIMEOUT_PARAM)
        .and_then(|raw| raw.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(Duration::from_secs(desc.default_timeout_secs))
}

/// Reject anything that is not a plain URL, hostname, or IP address before a
/// command line is ever built.
pub fn validate_target(target: &str) -> Result<()> {
    let target = target.trim();
    if target.is_empty() {
        return Err(Error::Validation("target is empty".to_string()));
    }
    const FORBIDDEN: &[char] = &[
        ';', '|', '&', '$', '`', '<', '>', '(', ')', '{', '}', '\'', '"', '\\', '*', '!',
    ];
    if target
        .chars()
        .any(|c| c.is_whitespace() || c.is_control() || FORBIDDEN.contains(&c))
    {
        return Err(Error::Validation(format!(
            "target contains forbidden characters: {target}"
        )));
    }

    if target.starts_with("http://") || target.starts_with("https://") {
        let parsed = url::Url::parse(target)
            .map_err(|e| Error::Validation(format!("malformed URL {target}: {e}")))?;
        if parsed.host_str().is_none() {
            return Err(Error::Validation(format!("URL has no host: {target}")));
        }
        return Ok(());
    }

    // Bare IPv4/IPv6 address
    if target.parse::<IpAddr>().is_ok() {
        return Ok(());
    }

    // Bare host, optionally with a port
    let (host, port) = match target.rsplit_once(':') {
        Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) && !host.is_empty() => {
            (host, Some(port))
        }
        _ => (target, None),
    };
    if let Some(port) = port {
        port.parse::<u16>()
            .map_err(|_| Error::Validation(format!("invalid port in target: {target}")))?;
    }
    if host.parse::<IpAddr>().is_ok() {
        return Ok(());
    }
    if is_valid_hostname(host) {
        return Ok(());
    }
    Err(Error::Validation(format!("not a URL, host, or IP: {target}")))
}

fn is_valid_hostname(host: &str) -> bool {
    if host.is_empty() || host.len() > 253 {
        return false;
    }
    host.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    })
}

/// Truncate to at most `limit` bytes on a char boundary
fn truncate_to(text: &str, limit: usize) -> (String, bool) {
    if text.len() <= limit {
        return (text.to_string(), false);
    }
    let mut end = limit;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    (text[..end].to_string(), true)
}

static NUCLEI_FINDING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\[([^\]]+)\]\s*\[([^\]]+)\]\s*\[([^\]]+)\]").expect("nuclei pattern")
});

const XSS_INDICATORS: &[&str] = &[
    "vulnerable",
    "xss found",
    "possible xss",
    "confirmed xss",
    "payload was successful",
    "payloads were successful",
];

/// Lightweight per-tool stdout parsing into finding strings. Tools without a
/// parser yield no findings, which is not an error; the raw excerpt remains.
fn parse_findings(id: &str, stdout: &str) -> Vec<String> {
    let mut findings = Vec::new();
    match id {
        "nuclei" => {
            for captures in NUCLEI_FINDING.captures_iter(stdout) {
                let (template, protocol, severity) = (&captures[1], &captures[2], &captures[3]);
                findings.push(format!("[{severity}] {template} ({protocol})"));
            }
        }
        "sqlmap" => {
            let lowered = stdout.to_lowercase();
            if lowered.contains("is vulnerable") {
                findings.push("[high] sql injection: target is vulnerable".to_string());
            }
            if lowered.contains("parameter") && lowered.contains("injectable") {
                findings.push("[high] sql injection: injectable parameter found".to_string());
            }
        }
        "xsstrike" => {
            let lowered = stdout.to_lowercase();
            if XSS_INDICATORS.iter().any(|marker| lowered.contains(marker)) {
                findings.push("[medium] xss: vulnerability indicators in output".to_string());
            }
        }
        "subfinder" | "httpx" => {
            findings.extend(
                stdout
                    .lines()
                    .map(str::trim)
                    .filter(|line| !line.is_empty())
                    .map(str::to_string),
            );
        }
        _ => {}
    }
    findings.truncate(MAX_FINDINGS);
    findings
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter() -> InvocationAdapter {
        InvocationAdapter {
            tools_dir: PathBuf::from("/opt/arsenal"),
            capture_limit: 64,
        }
    }

    #[test]
    fn test_validate_accepts_urls_hosts_ips() {
        assert!(validate_target("https://example.com/login?id=1").is_ok());
        assert!(validate_target("http://example.com:8080").is_ok());
        assert!(validate_target("example.com").is_ok());
        assert!(validate_target("sub.example.com:443").is_ok());
        assert!(validate_target("10.0.0.5").is_ok());
        assert!(validate_target("::1").is_ok());
    }

    #[test]
    fn test_validate_rejects_shell_metacharacters() {
        assert!(validate_target("http://x.com; rm -rf /").is_err());
        assert!(validate_target("example.com && whoami").is_err());
        assert!(validate_target("$(curl evil)").is_err());
        assert!(validate_target("host`id`").is_err());
        assert!(validate_target("a b").is_err());
        assert!(validate_target("").is_err());
    }

    #[test]
    fn test_validate_rejects_garbage() {
        assert!(validate_target("-.bad-").is_err());
        assert!(validate_target("no_underscores.example").is_err());
        assert!(validate_target("example.com:notaport").is_err());
    }

    #[test]
    fn test_build_command_target_is_single_argument() {
        let desc = registry::describe("nuclei").unwrap();
        let params = BTreeMap::new();
        let (_, args) = adapter()
            .build_command(desc, "https://example.com", &params)
            .unwrap();
        assert!(args.contains(&"https://example.com".to_string()));
        assert_eq!(args[0], "-u");
    }

    #[test]
    fn test_build_command_allows_listed_flags_only() {
        let desc = registry::describe("nuclei").unwrap();
        let mut params = BTreeMap::new();
        params.insert("-severity".to_string(), "high,critical".to_string());
        let (_, args) = adapter()
            .build_command(desc, "https://example.com", &params)
            .unwrap();
        assert!(args.windows(2).any(|w| w == ["-severity", "high,critical"]));

        let mut bad = BTreeMap::new();
        bad.insert("-o".to_string(), "/tmp/out".to_string());
        let err = adapter()
            .build_command(desc, "https://example.com", &bad)
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_build_command_script_tool_uses_python() {
        let desc = registry::describe("sqlmap").unwrap();
        let (program, args) = adapter()
            .build_command(desc, "https://example.com/?id=1", &BTreeMap::new())
            .unwrap();
        assert_eq!(program, "python3");
        assert_eq!(args[0], "/opt/arsenal/sqlmap/sqlmap.py");
        assert!(args.contains(&"--batch".to_string()));
    }

    #[test]
    fn test_build_command_rejects_non_runnable() {
        let desc = registry::describe("nuclei-templates").unwrap();
        let err = adapter()
            .build_command(desc, "example.com", &BTreeMap::new())
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn test_invoke_malformed_target_never_spawns() {
        let obs = adapter()
            .invoke("nuclei", "http://x.com; rm -rf /", &BTreeMap::new())
            .await;
        assert!(obs.error.is_some());
        assert!(obs.command.is_empty());
        assert!(obs.is_fatal());
    }

    #[tokio::test]
    async fn test_invoke_unknown_tool() {
        let obs = adapter()
            .invoke("metasploit", "example.com", &BTreeMap::new())
            .await;
        assert!(obs.error.is_some());
        assert_eq!(obs.exit_code, -1);
    }

    #[test]
    fn test_timeout_parameter_override() {
        let desc = registry::describe("nuclei").unwrap();
        let mut params = BTreeMap::new();
        params.insert(TIMEOUT_PARAM.to_string(), "5".to_string());
        assert_eq!(invocation_timeout(desc, &params), Duration::from_secs(5));
        assert_eq!(
            invocation_timeout(desc, &BTreeMap::new()),
            Duration::from_secs(desc.default_timeout_secs)
        );
    }

    #[test]
    fn test_truncate_to_bound() {
        let long = "a".repeat(100);
        let (kept, truncated) = truncate_to(&long, 64);
        assert!(truncated);
        assert_eq!(kept.len(), 64);

        let (kept, truncated) = truncate_to("short", 64);
        assert!(!truncated);
        assert_eq!(kept, "short");
    }

    #[test]
    fn test_truncate_respects_char_boundary() {
        let text = "ααααα"; // two bytes per char
        let (kept, truncated) = truncate_to(text, 5);
        assert!(truncated);
        assert_eq!(kept.len(), 4);
    }

    #[test]
    fn test_parse_nuclei_findings() {
        let stdout = "[cve-2021-44228] [http] [critical] https://example.com\nnoise\n";
        let findings = parse_findings("nuclei", stdout);
        assert_eq!(findings, vec!["[critical] cve-2021-44228 (http)"]);
    }

    #[test]
    fn test_parse_sqlmap_findings() {
        let stdout = "GET parameter 'id' is injectable. the target is vulnerable";
        let findings = parse_findings("sqlmap", stdout);
        assert_eq!(findings.len(), 2);
    }

    #[test]
    fn test_no_parser_yields_empty_findings() {
        assert!(parse_findings("dirsearch", "200 /admin\n").is_empty());
    }
}
