//! Static tool registry
//!
//! Maps each tool identifier to the metadata needed to install it, keep it
//! current, probe its version, and invoke it. The registry is immutable
//! process-wide state: initialized once, read thereafter. New tools are added
//! by data (a new descriptor reusing an existing strategy), not by new code.

use std::fmt;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Coarse tool category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Recon,
    Scan,
    Exploit,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Recon => write!(f, "recon"),
            Self::Scan => write!(f, "scan"),
            Self::Exploit => write!(f, "exploit"),
        }
    }
}

/// How a tool is installed or updated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    /// Fetch the latest release binary for the host architecture
    ReleaseBinary,
    /// Clone the repository, update with fast-forward pulls only
    GitRepo,
    /// Install through a language ecosystem (go install, pip install)
    LanguagePackage,
    /// Refresh an external database via the tool's own updater subcommand
    ExternalDb,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReleaseBinary => write!(f, "release-binary"),
            Self::GitRepo => write!(f, "git-repo"),
            Self::LanguagePackage => write!(f, "language-package"),
            Self::ExternalDb => write!(f, "external-db"),
        }
    }
}

/// Language ecosystem package reference
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Package {
    /// Go module path passed to `go install <path>@latest`
    Go(&'static str),
    /// Pip requirement spec passed to `pip install`
    Pip(&'static str),
}

/// How the locally installed version is determined
#[derive(Debug, Clone, Copy)]
pub enum Probe {
    /// `git rev-parse --short HEAD` in the tool's clone directory
    GitHead,
    /// Run a command and extract a version string from its output
    Command {
        program: &'static str,
        args: &'static [&'static str],
    },
}

/// How the tool is invoked against a target
#[derive(Debug, Clone, Copy)]
pub enum RunSpec {
    /// `python3 <dir>/<file> <target_flag> <target> <extra...>`
    Script {
        file: &'static str,
        target_flag: &'static str,
        extra: &'static [&'static str],
    },
    /// `<program> <target_flag> <target> <extra...>` (program found on PATH)
    Binary {
        program: &'static str,
        target_flag: &'static str,
        extra: &'static [&'static str],
    },
    /// `nmap -sV --script=<dir>/<script> <target>`
    NseScript { script: &'static str },
    /// Not directly invocable (template/data packages)
    NotRunnable,
}

/// Static metadata describing one external security tool
#[derive(Debug, Clone, Copy)]
pub struct ToolDescriptor {
    /// Unique, immutable identifier (registry key)
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub category: Category,
    /// GitHub `owner/name`, used for upstream version lookups
    pub repo: &'static str,
    pub install: Strategy,
    pub update: Strategy,
    /// Present iff install or update strategy is LanguagePackage
    pub package: Option<Package>,
    /// Refresh argv for ExternalDb updates, empty otherwise
    pub refresh: &'static [&'static str],
    /// Command names that prove a PATH-based install exists
    pub aliases: &'static [&'static str],
    /// Files that must exist inside a clone for it to count as installed
    pub required_files: &'static [&'static str],
    pub probe: Probe,
    pub run: RunSpec,
    pub default_timeout_secs: u64,
    /// Strict allow-list of invocation flags accepted as parameters
    pub allowed_flags: &'static [&'static str],
}

impl ToolDescriptor {
    /// Directory owned by this tool under the configured tools dir
    pub fn install_dir(&self, tools_dir: &Path) -> PathBuf {
        tools_dir.join(self.id)
    }

    /// Locate the tool's command on PATH through its aliases
    pub fn on_path(&self) -> Option<PathBuf> {
        self.aliases
            .iter()
            .find_map(|alias| which::which(alias).ok())
    }

    /// Resolve the runnable binary: PATH first, then the arsenal-managed bin
    /// directory, then ~/go/bin (go install may not be on PATH)
    pub fn resolve_binary(&self, tools_dir: &Path) -> Option<PathBuf> {
        if let Some(path) = self.on_path() {
            return Some(path);
        }
        let managed = tools_dir.join("bin").join(self.id);
        if managed.is_file() {
            return Some(managed);
        }
        let go_bin = dirs::home_dir()?.join("go").join("bin");
        self.aliases
            .iter()
            .map(|alias| go_bin.join(alias))
            .find(|p| p.is_file())
    }

    pub fn is_runnable(&self) -> bool {
        !matches!(self.run, RunSpec::NotRunnable)
    }
}

static REGISTRY: Lazy<Vec<ToolDescriptor>> = Lazy::new(|| {
    vec![
        ToolDescriptor {
            id: "sqlmap",
            name: "SQLMap",
            description: "Automatic SQL injection detection and exploitation tool",
            category: Category::Exploit,
            repo: "sqlmapproject/sqlmap",
            install: Strategy::GitRepo,
            update: Strategy::GitRepo,
            package: None,
            refresh: &[],
            aliases: &[],
            required_files: &["sqlmap.py"],
            probe: Probe::GitHead,
            run: RunSpec::Script {
                file: "sqlmap.py",
                target_flag: "-u",
                extra: &["--batch"],
            },
            default_timeout_secs: 600,
            allowed_flags: &["--level", "--risk", "--dbs", "--threads", "--technique"],
        },
        ToolDescriptor {
            id: "xsstrike",
            name: "XSStrike",
            description: "Advanced XSS detection suite",
            category: Category::Exploit,
            repo: "s0md3v/XSStrike",
            install: Strategy::GitRepo,
            update: Strategy::GitRepo,
            package: None,
            refresh: &[],
            aliases: &[],
            required_files: &["xsstrike.py"],
            probe: Probe::GitHead,
            run: RunSpec::Script {
                file: "xsstrike.py",
                target_flag: "-u",
                extra: &[],
            },
            default_timeout_secs: 600,
            allowed_flags: &["--crawl", "--blind", "--skip-dom"],
        },
        ToolDescriptor {
            id: "dirsearch",
            name: "Dirsearch",
            description: "Web path brute-force scanner",
            category: Category::Recon,
            repo: "maurosoria/dirsearch",
            install: Strategy::GitRepo,
            update: Strategy::GitRepo,
            package: None,
            refresh: &[],
            aliases: &["dirsearch"],
            required_files: &["dirsearch.py"],
            probe: Probe::GitHead,
            run: RunSpec::Script {
                file: "dirsearch.py",
                target_flag: "-u",
                extra: &[],
            },
            default_timeout_secs: 600,
            allowed_flags: &["-e", "-x", "-t", "--exclude-status"],
        },
        ToolDescriptor {
            id: "paramspider",
            name: "ParamSpider",
            description: "Mines URLs from web archives for parameter discovery",
            category: Category::Recon,
            repo: "devanshbatham/ParamSpider",
            install: Strategy::LanguagePackage,
            update: Strategy::LanguagePackage,
            package: Some(Package::Pip(
                "git+https://github.com/devanshbatham/ParamSpider.git",
            )),
            refresh: &[],
            aliases: &["paramspider"],
            required_files: &[],
            probe: Probe::Command {
                program: "paramspider",
                args: &["--help"],
            },
            run: RunSpec::Binary {
                program: "paramspider",
                target_flag: "-d",
                extra: &[],
            },
            default_timeout_secs: 300,
            allowed_flags: &["--level", "--exclude"],
        },
        ToolDescriptor {
            id: "nuclei",
            name: "Nuclei",
            description: "Template-driven vulnerability scanner",
            category: Category::Scan,
            repo: "projectdiscovery/nuclei",
            install: Strategy::LanguagePackage,
            update: Strategy::LanguagePackage,
            package: Some(Package::Go(
                "github.com/projectdiscovery/nuclei/v3/cmd/nuclei",
            )),
            refresh: &[],
            aliases: &["nuclei"],
            required_files: &[],
            probe: Probe::Command {
                program: "nuclei",
                args: &["-version"],
            },
            run: RunSpec::Binary {
                program: "nuclei",
                target_flag: "-u",
                extra: &[],
            },
            default_timeout_secs: 900,
            allowed_flags: &["-severity", "-tags", "-rate-limit", "-templates"],
        },
        ToolDescriptor {
            id: "nuclei-templates",
            name: "Nuclei Templates",
            description: "Nuclei vulnerability template database (CVEs, misconfigs)",
            category: Category::Scan,
            repo: "projectdiscovery/nuclei-templates",
            install: Strategy::GitRepo,
            // Installed by clone, refreshed through nuclei's own template updater
            update: Strategy::ExternalDb,
            package: None,
            refresh: &["nuclei", "-update-templates"],
            aliases: &[],
            required_files: &[],
            probe: Probe::GitHead,
            run: RunSpec::NotRunnable,
            default_timeout_secs: 600,
            allowed_flags: &[],
        },
        ToolDescriptor {
            id: "httpx",
            name: "httpx",
            description: "Fast HTTP probe and technology detector",
            category: Category::Recon,
            repo: "projectdiscovery/httpx",
            install: Strategy::LanguagePackage,
            update: Strategy::LanguagePackage,
            package: Some(Package::Go("github.com/projectdiscovery/httpx/cmd/httpx")),
            refresh: &[],
            aliases: &["httpx"],
            required_files: &[],
            probe: Probe::Command {
                program: "httpx",
                args: &["-version"],
            },
            run: RunSpec::Binary {
                program: "httpx",
                target_flag: "-u",
                extra: &["-tech-detect", "-silent"],
            },
            default_timeout_secs: 300,
            allowed_flags: &["-status-code", "-title", "-ports"],
        },
        ToolDescriptor {
            id: "subfinder",
            name: "Subfinder",
            description: "Passive subdomain discovery tool",
            category: Category::Recon,
            repo: "projectdiscovery/subfinder",
            install: Strategy::LanguagePackage,
            update: Strategy::LanguagePackage,
            package: Some(Package::Go(
                "github.com/projectdiscovery/subfinder/v2/cmd/subfinder",
            )),
            refresh: &[],
            aliases: &["subfinder"],
            required_files: &[],
            probe: Probe::Command {
                program: "subfinder",
                args: &["-version"],
            },
            run: RunSpec::Binary {
                program: "subfinder",
                target_flag: "-d",
                extra: &["-silent"],
            },
            default_timeout_secs: 300,
            allowed_flags: &["-sources", "-recursive", "-all"],
        },
        ToolDescriptor {
            id: "nmap-vulners",
            name: "Nmap Vulners",
            description: "Nmap NSE scripts for CVE detection (requires nmap)",
            category: Category::Scan,
            repo: "vulnersCom/nmap-vulners",
            install: Strategy::GitRepo,
            update: Strategy::GitRepo,
            package: None,
            refresh: &[],
            aliases: &[],
            required_files: &["vulners.nse"],
            probe: Probe::GitHead,
            run: RunSpec::NseScript {
                script: "vulners.nse",
            },
            default_timeout_secs: 900,
            allowed_flags: &["-p"],
        },
        ToolDescriptor {
            id: "ffuf",
            name: "ffuf",
            description: "Fast web fuzzer distributed as a release binary",
            category: Category::Scan,
            repo: "ffuf/ffuf",
            install: Strategy::ReleaseBinary,
            update: Strategy::ReleaseBinary,
            package: None,
            refresh: &[],
            aliases: &["ffuf"],
            required_files: &[],
            probe: Probe::Command {
                program: "ffuf",
                args: &["-V"],
            },
            run: RunSpec::Binary {
                program: "ffuf",
                target_flag: "-u",
                extra: &[],
            },
            default_timeout_secs: 600,
            allowed_flags: &["-w", "-mc", "-t"],
        },
    ]
});

/// All registered tools in stable registration order
pub fn all() -> &'static [ToolDescriptor] {
    &REGISTRY
}

/// Look up a tool descriptor by identifier
pub fn describe(id: &str) -> Result<&'static ToolDescriptor> {
    REGISTRY
        .iter()
        .find(|tool| tool.id == id)
        .ok_or_else(|| Error::NotFound(id.to_string()))
}

/// Position of a tool in registration order, for stable report sorting
pub(crate) fn position(id: &str) -> usize {
    REGISTRY
        .iter()
        .position(|tool| tool.id == id)
        .unwrap_or(usize::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_identifiers_are_unique() {
        let ids: HashSet<_> = all().iter().map(|t| t.id).collect();
        assert_eq!(ids.len(), all().len());
    }

    #[test]
    fn test_registration_order_is_stable() {
        let first: Vec<_> = all().iter().map(|t| t.id).collect();
        let second: Vec<_> = all().iter().map(|t| t.id).collect();
        assert_eq!(first, second);
        assert_eq!(first[0], "sqlmap");
    }

    #[test]
    fn test_describe_known_tool() {
        let tool = describe("nuclei").unwrap();
        assert_eq!(tool.name, "Nuclei");
        assert_eq!(tool.install, Strategy::LanguagePackage);
    }

    #[test]
    fn test_describe_unknown_tool() {
        let err = describe("metasploit").unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn test_language_packages_carry_package_spec() {
        for tool in all() {
            if tool.install == Strategy::LanguagePackage {
                assert!(tool.package.is_some(), "{} missing package spec", tool.id);
            }
        }
    }

    #[test]
    fn test_external_db_tools_carry_refresh_command() {
        for tool in all() {
            if tool.update == Strategy::ExternalDb {
                assert!(!tool.refresh.is_empty(), "{} missing refresh argv", tool.id);
            }
        }
    }

    #[test]
    fn test_install_dir_is_scoped_by_id() {
        let tool = describe("sqlmap").unwrap();
        let dir = tool.install_dir(Path::new("/opt/arsenal"));
        assert_eq!(dir, PathBuf::from("/opt/arsenal/sqlmap"));
    }
}
