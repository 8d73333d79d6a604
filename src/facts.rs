//! Adapters over the two external collaborators the spec treats as
//! interfaces only: `HostFacts` (CPU/RAM/HDD/hostname/arch/release) and
//! `PackageInfo` (rpm lookups). Both are plain traits so the engine can be
//! exercised against fakes in tests.

use std::process::Command;

use regex::Regex;

use crate::types::{HostFactsSnapshot, PackageDetails, PackageLookup};

/// `Send` so a boxed provider can live in the daemon's process-wide engine
/// slot, visible to the signal handler.
pub trait HostFacts: Send {
    fn collect(&self) -> HostFactsSnapshot;
}

pub trait PackageInfo: Send {
    fn lookup(&self, name: &str) -> PackageLookup;
}

/// Reads `/proc/cpuinfo`, `/proc/meminfo`, shells out to `df`, and reads
/// `/etc/redhat-release`, matching the original's `__get_hw_cpu` /
/// `__get_hw_ram` / `__get_hw_hdd` helpers.
pub struct RealHostFacts;

impl HostFacts for RealHostFacts {
    fn collect(&self) -> HostFactsSnapshot {
        HostFactsSnapshot {
            hostname: hostname(),
            arch: std::env::consts::ARCH.to_string(),
            cpu: read_cpu(),
            ram: read_ram(),
            hdd: read_hdd(),
            release: read_release(),
        }
    }
}

fn hostname() -> String {
    nix::unistd::gethostname()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown".to_string())
}

fn read_cpu() -> String {
    let Ok(contents) = std::fs::read_to_string("/proc/cpuinfo") else {
        return "0 x unknown".to_string();
    };
    let re = Regex::new(r"^model name\s*:\s*(.+)$").expect("valid regex");
    let mut count = 0u32;
    let mut model = "unknown".to_string();
    for line in contents.lines() {
        if let Some(caps) = re.captures(line) {
            count += 1;
            model = caps[1].trim().to_string();
        }
    }
    format!("{count} x {model}")
}

fn read_ram() -> String {
    let Ok(contents) = std::fs::read_to_string("/proc/meminfo") else {
        return "unknown MB".to_string();
    };
    let re = Regex::new(r"^MemTotal:\s*(\d+)\s*kB$").expect("valid regex");
    for line in contents.lines() {
        if let Some(caps) = re.captures(line) {
            if let Ok(kb) = caps[1].parse::<u64>() {
                return format!("{} MB", kb / 1024);
            }
        }
    }
    "unknown MB".to_string()
}

fn read_hdd() -> String {
    let output = Command::new("df")
        .args(["-k", "-P", "--local", "--exclude-type=tmpfs"])
        .output();
    let Ok(output) = output else {
        return "unknown".to_string();
    };
    let text = String::from_utf8_lossy(&output.stdout);
    let re = Regex::new(r"^(/\S+)\s+(\d+)\s+\d+\s+\d+\s+\d+%\s+\S+$").expect("valid regex");
    let mut total_kb: f64 = 0.0;
    let mut any = false;
    for line in text.lines() {
        if let Some(caps) = re.captures(line) {
            if let Ok(kb) = caps[2].parse::<f64>() {
                total_kb += kb;
                any = true;
            }
        }
    }
    if !any || total_kb == 0.0 {
        "unknown".to_string()
    } else {
        format!("{:.1} GB", total_kb / 1024.0 / 1024.0)
    }
}

fn read_release() -> String {
    std::fs::read_to_string("/etc/redhat-release")
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|_| "unknown".to_string())
}

/// Queries the `rpm` CLI for package metadata rather than linking
/// `librpm` — the rpm database is specified only by interface.
pub struct RealPackageInfo;

const RPM_QUERY_FORMAT: &str =
    "%{NAME}\\n%{VERSION}\\n%{RELEASE}\\n%{ARCH}\\n%{SOURCERPM}\\n%{BUILDTIME}\\n";

impl PackageInfo for RealPackageInfo {
    fn lookup(&self, name: &str) -> PackageLookup {
        let output = Command::new("rpm")
            .args(["-q", "--qf", RPM_QUERY_FORMAT, name])
            .output();

        let Ok(output) = output else {
            return PackageLookup::NotInstalled;
        };
        if !output.status.success() {
            return PackageLookup::NotInstalled;
        }

        let text = String::from_utf8_lossy(&output.stdout);
        let mut lines = text.lines();
        let (Some(n), Some(version), Some(release), Some(arch), Some(sourcerpm)) = (
            lines.next(),
            lines.next(),
            lines.next(),
            lines.next(),
            lines.next(),
        ) else {
            return PackageLookup::NotInstalled;
        };
        let buildtime = lines.next().and_then(|s| s.parse::<i64>().ok());

        PackageLookup::Installed(PackageDetails {
            name: n.to_string(),
            version: version.to_string(),
            release: release.to_string(),
            arch: arch.to_string(),
            sourcerpm: sourcerpm.to_string(),
            buildtime,
        })
    }
}

/// Merge `seed ∪ env PKGNVR (comma) ∪ env PACKAGES (whitespace) ∪ env
/// __INTERNAL_RPM_ASSERTED_PACKAGES (whitespace)`, preserving first-seen
/// order and skipping duplicates, per §4.3.
pub fn collect_package_names(seed: Vec<String>) -> Vec<String> {
    let mut names = seed;

    if let Ok(val) = std::env::var("PKGNVR") {
        for p in val.split(',') {
            push_unique(&mut names, p);
        }
    }
    if let Ok(val) = std::env::var("PACKAGES") {
        for p in val.split_whitespace() {
            push_unique(&mut names, p);
        }
    }
    if let Ok(val) = std::env::var("__INTERNAL_RPM_ASSERTED_PACKAGES") {
        for p in val.split_whitespace() {
            push_unique(&mut names, p);
        }
    }

    names
}

fn push_unique(names: &mut Vec<String>, candidate: &str) {
    if candidate.is_empty() {
        return;
    }
    if !names.iter().any(|n| n == candidate) {
        names.push(candidate.to_string());
    }
}

/// Resolve every name in `names` to `pkgdetails`/`pkgnotinstalled` elements
/// via `provider`, skipping the literal package name `"unknown"` (matching
/// the original's `if package != 'unknown'` guard).
pub fn collect_package_details(
    provider: &dyn PackageInfo,
    names: &[String],
) -> Vec<crate::xml::Element> {
    let mut elements = Vec::new();
    for name in names {
        match provider.lookup(name) {
            PackageLookup::Installed(details) => {
                let text = format!(
                    "{}-{}-{}.{} ",
                    details.name, details.version, details.release, details.arch
                );
                elements.push(
                    crate::xml::Element::new("pkgdetails")
                        .with_attr("sourcerpm", details.sourcerpm)
                        .with_text(text),
                );
            }
            PackageLookup::NotInstalled => {
                if name != "unknown" {
                    elements.push(crate::xml::Element::new("pkgnotinstalled").with_text(name));
                }
            }
        }
    }
    elements
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeProvider;
    impl PackageInfo for FakeProvider {
        fn lookup(&self, name: &str) -> PackageLookup {
            if name == "beakerlib" {
                PackageLookup::Installed(PackageDetails {
                    name: "beakerlib".into(),
                    version: "1.0".into(),
                    release: "1".into(),
                    arch: "noarch".into(),
                    sourcerpm: "beakerlib-1.0-1.src.rpm".into(),
                    buildtime: Some(1000),
                })
            } else {
                PackageLookup::NotInstalled
            }
        }
    }

    #[test]
    fn collect_package_names_preserves_first_seen_order() {
        std::env::set_var("PKGNVR", "foo,bar");
        std::env::set_var("PACKAGES", "bar baz");
        std::env::remove_var("__INTERNAL_RPM_ASSERTED_PACKAGES");

        let names = collect_package_names(vec!["seed".to_string()]);
        assert_eq!(names, vec!["seed", "foo", "bar", "baz"]);

        std::env::remove_var("PKGNVR");
        std::env::remove_var("PACKAGES");
    }

    #[test]
    fn collect_package_details_skips_unknown_when_not_installed() {
        let provider = FakeProvider;
        let names = vec!["unknown".to_string()];
        let elements = collect_package_details(&provider, &names);
        assert!(elements.is_empty());
    }

    #[test]
    fn collect_package_details_installed_renders_nvra() {
        let provider = FakeProvider;
        let names = vec!["beakerlib".to_string()];
        let elements = collect_package_details(&provider, &names);
        assert_eq!(elements.len(), 1);
        assert_eq!(elements[0].name(), "pkgdetails");
        assert_eq!(elements[0].text(), "beakerlib-1.0-1.noarch ");
    }
}
