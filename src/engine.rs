//! In-memory journal state and the operations the dispatcher routes to:
//! init, addPhase, finPhase, addMessage, addTest, addMetric, logRpmVersion,
//! testState, phaseState, dump.

use std::io;
use std::path::{Path, PathBuf};

use chrono::TimeZone;

use crate::error::EngineError;
use crate::facts::{collect_package_details, collect_package_names, HostFacts, PackageInfo};
use crate::persist;
use crate::timefmt;
use crate::types::{DumpMode, FinPhaseOutcome, PackageLookup};
use crate::xml::{parse_document, Element};

pub struct Engine {
    doc: Option<Element>,
    journal_path: PathBuf,
    beakerlib_dir: PathBuf,
    host_facts: Box<dyn HostFacts>,
    package_info: Box<dyn PackageInfo>,
}

impl Engine {
    pub fn new(
        journal_path: PathBuf,
        beakerlib_dir: PathBuf,
        host_facts: Box<dyn HostFacts>,
        package_info: Box<dyn PackageInfo>,
    ) -> Self {
        Engine {
            doc: None,
            journal_path,
            beakerlib_dir,
            host_facts,
            package_info,
        }
    }

    pub fn document(&self) -> Option<&Element> {
        self.doc.as_ref()
    }

    /// Mirrors the original's `createLog` calling `openJournal()` before it
    /// walks the tree: reparse the journal file (or initialise from the
    /// `TEST`/`PACKAGE` environment) if nothing is loaded yet, then hand
    /// back the now-open document.
    pub fn open_document(&mut self) -> Result<&Element, EngineError> {
        self.ensure_open()?;
        self.doc
            .as_ref()
            .ok_or_else(|| EngineError::Corrupt("no journal loaded".into()))
    }

    /// Persist whatever is currently in memory, if anything. Used by the
    /// daemon's shutdown path (`saveAndExit`) where a missing document
    /// (crash before `init`) is not an error.
    pub fn save_now(&self) -> Result<(), EngineError> {
        if self.doc.is_none() {
            return Ok(());
        }
        self.persist()
    }

    fn try_load(&self) -> Option<Element> {
        let contents = std::fs::read_to_string(&self.journal_path).ok()?;
        parse_document(&contents).ok()
    }

    /// Mirrors the original's `openJournal`: if nothing is loaded yet,
    /// reparse the file if it exists, else initialise from the `TEST`/
    /// `PACKAGE` environment.
    fn ensure_open(&mut self) -> Result<(), EngineError> {
        if self.doc.is_some() {
            return Ok(());
        }
        if let Some(existing) = self.try_load() {
            self.doc = Some(existing);
            return Ok(());
        }
        tracing::warn!("journal not initialised, initialising now");
        let test = std::env::var("TEST").ok();
        let package = determine_package(test.as_deref());
        self.init(test.as_deref(), package.as_deref())?;
        Ok(())
    }

    /// §4.4 `init(test, package)`. Idempotent: an existing, parseable
    /// journal file is adopted unchanged.
    pub fn init(&mut self, test: Option<&str>, package: Option<&str>) -> Result<i32, EngineError> {
        if let Some(existing) = self.try_load() {
            self.doc = Some(existing);
            tracing::debug!("init: adopted existing journal");
            return Ok(0);
        }

        let package = package.unwrap_or("unknown");
        let mut root = Element::new("BEAKER_TEST");

        if let Ok(testid) = std::env::var("TESTID") {
            if !testid.is_empty() {
                root.push_child(Element::new("test_id").with_text(testid));
            }
        }

        root.push_child(Element::new("package").with_text(package));

        let pkg_names = collect_package_names(vec![package.to_string()]);
        for el in collect_package_details(self.package_info.as_ref(), &pkg_names) {
            root.push_child(el);
        }

        root.push_child(
            Element::new("beakerlib_rpm").with_text(self.lookup_nvr_or_not_installed("beakerlib")),
        );
        root.push_child(
            Element::new("beakerlib_redhat_rpm")
                .with_text(self.lookup_nvr_or_not_installed("beakerlib-redhat")),
        );

        if let Ok(testversion) = std::env::var("testversion") {
            if !testversion.is_empty() {
                root.push_child(Element::new("testversion").with_text(testversion));
            }
        }

        if let Some(testbuild) = self.lookup_test_build() {
            root.push_child(Element::new("testbuild").with_text(testbuild));
        }

        root.push_child(Element::new("starttime").with_text(timefmt::now()));
        root.push_child(Element::new("endtime").with_text(timefmt::now()));
        root.push_child(Element::new("testname").with_text(test.unwrap_or("unknown")));

        let release = std::fs::read_to_string("/etc/redhat-release")
            .map(|s| s.trim().to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        root.push_child(Element::new("release").with_text(release));

        let facts = self.host_facts.collect();
        root.push_child(Element::new("hostname").with_text(facts.hostname));
        root.push_child(Element::new("arch").with_text(facts.arch));
        root.push_child(Element::new("hw_cpu").with_text(facts.cpu));
        root.push_child(Element::new("hw_ram").with_text(facts.ram));
        root.push_child(Element::new("hw_hdd").with_text(facts.hdd));

        for plugin in self.scan_plugins() {
            root.push_child(Element::new("plugin").with_text(plugin));
        }

        let purpose_text = match std::fs::read("PURPOSE") {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(EngineError::PurposeUnreadable(e)),
        };
        root.push_child(Element::new("purpose").with_text(purpose_text));

        root.push_child(Element::new("log"));

        persist::save(&root, &self.journal_path)?;
        self.doc = Some(root);
        tracing::debug!("init: built fresh journal");
        Ok(0)
    }

    fn lookup_nvr_or_not_installed(&self, name: &str) -> String {
        match self.package_info.lookup(name) {
            PackageLookup::Installed(d) => format!("{}-{}-{}", d.name, d.version, d.release),
            PackageLookup::NotInstalled => "not installed".to_string(),
        }
    }

    fn lookup_test_build(&self) -> Option<String> {
        let packagename = std::env::var("packagename").ok()?;
        let PackageLookup::Installed(details) = self.package_info.lookup(&packagename) else {
            return None;
        };
        let buildtime = details.buildtime?;
        let utc = chrono::Utc.timestamp_opt(buildtime, 0).single()?;
        Some(
            utc.with_timezone(&chrono::Local)
                .format(timefmt::TIME_FORMAT)
                .to_string(),
        )
    }

    fn scan_plugins(&self) -> Vec<String> {
        let pattern = self.beakerlib_dir.join("plugins").join("*.sh");
        let pattern = pattern.to_string_lossy().into_owned();
        let Ok(paths) = glob::glob(&pattern) else {
            return Vec::new();
        };
        paths
            .filter_map(|entry| entry.ok())
            .filter_map(|path| path.file_name().map(|n| n.to_string_lossy().into_owned()))
            .collect()
    }

    fn log_mut(&mut self) -> Result<&mut Element, EngineError> {
        self.doc
            .as_mut()
            .ok_or(EngineError::Corrupt("no journal loaded".into()))?
            .first_child_mut("log")
            .ok_or_else(|| EngineError::Corrupt("journal missing <log>".into()))
    }

    fn persist(&self) -> Result<(), EngineError> {
        let doc = self
            .doc
            .as_ref()
            .ok_or(EngineError::Corrupt("no journal loaded".into()))?;
        match persist::save(doc, &self.journal_path) {
            Ok(()) => Ok(()),
            Err(e) => {
                tracing::warn!(error = %e, path = %self.journal_path.display(), "failed to save journal");
                Err(EngineError::Io(e))
            }
        }
    }

    /// §4.4 `addPhase(name, type)`.
    pub fn add_phase(&mut self, name: &str, phase_type: &str) -> Result<(), EngineError> {
        self.ensure_open()?;

        let pkg_details = collect_package_details(self.package_info.as_ref(), &[]);

        let log = self.log_mut()?;
        let phase = log.push_child(
            Element::new("phase")
                .with_attr("name", name)
                .with_attr("type", phase_type)
                .with_attr("result", "unfinished")
                .with_attr("starttime", timefmt::now())
                .with_attr("endtime", ""),
        );
        for el in pkg_details {
            phase.push_child(el);
        }

        self.persist()?;
        tracing::debug!(name, phase_type, "addPhase");
        Ok(())
    }

    /// §4.4 `finPhase()`.
    pub fn fin_phase(&mut self) -> Result<FinPhaseOutcome, EngineError> {
        self.ensure_open()?;

        let now = timefmt::now();
        let log = self.log_mut()?;
        let idx = last_unfinished_index(log)
            .ok_or_else(|| EngineError::Corrupt("finPhase with no open phase".into()))?;
        let phase = &mut log.children_mut()[idx];

        phase.set_attr("endtime", now.clone());
        let phase_type = phase.get_attr("type").unwrap_or_default().to_string();
        let name = phase.get_attr("name").unwrap_or_default().to_string();
        let (_passed, failed) = phase_counts(phase);

        let result = if failed == 0 {
            "PASS".to_string()
        } else {
            phase_type.clone()
        };
        phase.set_attr("result", result.clone());
        phase.set_attr("score", failed.to_string());

        if let Some(el) = self.doc.as_mut().and_then(|doc| doc.first_child_mut("endtime")) {
            el.set_text(now);
        }

        self.persist()?;
        tracing::debug!(name, result, failed, "finPhase");

        Ok(FinPhaseOutcome {
            result,
            score: failed,
            phase_type,
            name,
        })
    }

    /// §4.4 `addMessage(text, severity)`.
    pub fn add_message(&mut self, text: &str, severity: &str) -> Result<(), EngineError> {
        self.ensure_open()?;
        let log = self.log_mut()?;
        let target = target_for_append(log);
        target.push_child(
            Element::new("message")
                .with_attr("severity", severity)
                .with_text(text),
        );
        self.persist()?;
        tracing::debug!(severity, "addMessage");
        Ok(())
    }

    /// §4.4 `addTest(message, result, command?)`. Returns
    /// `EngineError::NoOpenPhase` if no phase is open; no mutation occurs.
    pub fn add_test(
        &mut self,
        message: &str,
        result: &str,
        command: Option<&str>,
    ) -> Result<(), EngineError> {
        self.ensure_open()?;
        let log = self.log_mut()?;
        if last_unfinished_index(log).is_none() {
            tracing::warn!("addTest with no open phase");
            return Err(EngineError::NoOpenPhase);
        }
        let target = target_for_append(log);
        let mut el = Element::new("test").with_attr("message", message);
        if let Some(command) = command {
            el.set_attr("command", command);
        }
        el.set_text(result);
        target.push_child(el);
        self.persist()?;
        tracing::debug!(result, "addTest");
        Ok(())
    }

    /// §4.4 `addMetric(type, name, value, tolerance)`.
    pub fn add_metric(
        &mut self,
        metric_type: &str,
        name: &str,
        value: f64,
        tolerance: f64,
    ) -> Result<(), EngineError> {
        self.ensure_open()?;
        let log = self.log_mut()?;
        let target = target_for_append(log);

        if target.children_named("metric").any(|m| m.get_attr("name") == Some(name)) {
            tracing::warn!(name, "duplicate metric name");
            return Err(EngineError::DuplicateMetric(name.to_string()));
        }

        target.push_child(
            Element::new("metric")
                .with_attr("type", metric_type)
                .with_attr("name", name)
                .with_attr("tolerance", tolerance.to_string())
                .with_text(value.to_string()),
        );
        self.persist()?;
        tracing::debug!(name, value, "addMetric");
        Ok(())
    }

    /// §4.4 `logRpmVersion(pkg)`.
    pub fn log_rpm_version(&mut self, package: &str) -> Result<(), EngineError> {
        self.ensure_open()?;
        let elements = collect_package_details(self.package_info.as_ref(), &[package.to_string()]);
        let log = self.log_mut()?;
        let target = target_for_append(log);
        for el in elements {
            target.push_child(el);
        }
        self.persist()?;
        tracing::debug!(package, "logRpmVersion");
        Ok(())
    }

    /// §4.4 `testState()`: sum of failed assertions across all phases,
    /// capped at 255.
    pub fn test_state(&mut self) -> Result<u8, EngineError> {
        self.ensure_open()?;
        let log = self.log_mut()?;
        let total: u32 = log
            .children_named("phase")
            .map(|phase| phase_counts(phase).1)
            .sum();
        Ok(total.min(255) as u8)
    }

    /// §4.4 `phaseState()`: failed count of the last unfinished phase,
    /// capped at 255.
    pub fn phase_state(&mut self) -> Result<u8, EngineError> {
        self.ensure_open()?;
        let log = self.log_mut()?;
        let failed = match last_unfinished_index(log) {
            Some(idx) => phase_counts(&log.children()[idx]).1,
            None => 0,
        };
        Ok(failed.min(255) as u8)
    }

    /// §4.4 `dump(mode)`.
    pub fn dump(&mut self, mode: DumpMode) -> Result<String, EngineError> {
        self.ensure_open()?;
        let doc = self
            .doc
            .as_ref()
            .ok_or(EngineError::Corrupt("no journal loaded".into()))?;
        Ok(match mode {
            DumpMode::Raw => doc.to_xml_string(false),
            DumpMode::Pretty => doc.to_xml_string(true),
        })
    }
}

/// Third slash-segment of the test name (`a/b/<pkg>/...`), else `None`.
pub fn determine_package(test: Option<&str>) -> Option<String> {
    if let Ok(env_package) = std::env::var("PACKAGE") {
        if !env_package.is_empty() {
            return Some(env_package);
        }
    }
    test.and_then(|t| t.split('/').filter(|s| !s.is_empty()).nth(2))
        .map(str::to_string)
}

fn last_unfinished_index(log: &Element) -> Option<usize> {
    let mut candidate = None;
    for (i, child) in log.children().iter().enumerate() {
        if child.name() == "phase" && child.get_attr("result") == Some("unfinished") {
            candidate = Some(i);
        }
    }
    candidate
}

fn target_for_append(log: &mut Element) -> &mut Element {
    match last_unfinished_index(log) {
        Some(i) => &mut log.children_mut()[i],
        None => log,
    }
}

/// `(passed, failed)` assertion counts among a phase's direct `test` children.
fn phase_counts(phase: &Element) -> (u32, u32) {
    let mut passed = 0;
    let mut failed = 0;
    for test in phase.children_named("test") {
        if test.text() == "FAIL" {
            failed += 1;
        } else {
            passed += 1;
        }
    }
    (passed, failed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{HostFactsSnapshot, PackageDetails};

    struct FakeHostFacts;
    impl HostFacts for FakeHostFacts {
        fn collect(&self) -> HostFactsSnapshot {
            HostFactsSnapshot {
                hostname: "test-host".into(),
                arch: "x86_64".into(),
                cpu: "1 x Fake CPU".into(),
                ram: "1024 MB".into(),
                hdd: "10.0 GB".into(),
                release: "Fake Linux".into(),
            }
        }
    }

    struct FakePackageInfo;
    impl PackageInfo for FakePackageInfo {
        fn lookup(&self, name: &str) -> PackageLookup {
            if name == "foo" {
                PackageLookup::Installed(PackageDetails {
                    name: "foo".into(),
                    version: "1.0".into(),
                    release: "1".into(),
                    arch: "x86_64".into(),
                    sourcerpm: "foo-1.0-1.src.rpm".into(),
                    buildtime: Some(0),
                })
            } else {
                PackageLookup::NotInstalled
            }
        }
    }

    fn test_engine(dir: &Path) -> Engine {
        Engine::new(
            dir.join("j.xml"),
            dir.join("bl"),
            Box::new(FakeHostFacts),
            Box::new(FakePackageInfo),
        )
    }

    #[test]
    fn init_builds_fresh_journal_and_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = test_engine(dir.path());

        let status = engine.init(Some("/a/b/foo/bar"), Some("foo")).unwrap();
        assert_eq!(status, 0);
        let doc = engine.document().unwrap();
        assert_eq!(doc.first_child("package").unwrap().text(), "foo");
        assert_eq!(doc.first_child("testname").unwrap().text(), "/a/b/foo/bar");
        assert!(doc.first_child("log").unwrap().children().is_empty());

        // idempotent: second init adopts the file unchanged
        let mut engine2 = test_engine(dir.path());
        let status2 = engine2.init(Some("different"), Some("different")).unwrap();
        assert_eq!(status2, 0);
        assert_eq!(
            engine2.document().unwrap().first_child("testname").unwrap().text(),
            "/a/b/foo/bar"
        );
    }

    #[test]
    fn phase_pass_and_fail_scenarios() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = test_engine(dir.path());
        engine.init(Some("/a/b/foo/bar"), Some("foo")).unwrap();

        engine.add_phase("check", "FAIL").unwrap();
        engine.add_test("eq", "PASS", None).unwrap();
        let outcome = engine.fin_phase().unwrap();
        assert_eq!(outcome.result, "PASS");
        assert_eq!(outcome.score, 0);
        assert_eq!(outcome.name, "check");

        engine.add_phase("check2", "FAIL").unwrap();
        engine.add_test("ne", "FAIL", None).unwrap();
        let outcome2 = engine.fin_phase().unwrap();
        assert_eq!(outcome2.result, "FAIL");
        assert_eq!(outcome2.score, 1);
    }

    #[test]
    fn add_test_without_open_phase_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = test_engine(dir.path());
        engine.init(Some("/a/b/foo/bar"), Some("foo")).unwrap();

        let result = engine.add_test("orphan", "FAIL", None);
        assert!(matches!(result, Err(EngineError::NoOpenPhase)));
        let log = engine.document().unwrap().first_child("log").unwrap();
        assert!(log.children_named("test").next().is_none());
    }

    #[test]
    fn duplicate_metric_name_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = test_engine(dir.path());
        engine.init(Some("/a/b/foo/bar"), Some("foo")).unwrap();
        engine.add_phase("check", "FAIL").unwrap();

        engine.add_metric("LINEAR", "t", 1.5, 0.1).unwrap();
        let result = engine.add_metric("LINEAR", "t", 2.0, 0.1);
        assert!(matches!(result, Err(EngineError::DuplicateMetric(_))));

        let log = engine.document().unwrap().first_child("log").unwrap();
        let phase = log.children_named("phase").next().unwrap();
        assert_eq!(phase.children_named("metric").count(), 1);
    }

    #[test]
    fn test_state_and_phase_state_are_capped_at_255() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = test_engine(dir.path());
        engine.init(Some("/a/b/foo/bar"), Some("foo")).unwrap();
        engine.add_phase("check", "FAIL").unwrap();
        for _ in 0..300 {
            engine.add_test("x", "FAIL", None).unwrap();
        }
        assert_eq!(engine.phase_state().unwrap(), 255);
        engine.fin_phase().unwrap();
        assert_eq!(engine.test_state().unwrap(), 255);
    }

    #[test]
    fn determine_package_takes_third_slash_segment() {
        std::env::remove_var("PACKAGE");
        assert_eq!(
            determine_package(Some("/a/b/foo/bar")),
            Some("foo".to_string())
        );
        assert_eq!(determine_package(Some("a/b")), None);
        assert_eq!(determine_package(None), None);
    }

    #[test]
    fn determine_package_prefers_env_var() {
        std::env::set_var("PACKAGE", "from-env");
        assert_eq!(
            determine_package(Some("/a/b/foo/bar")),
            Some("from-env".to_string())
        );
        std::env::remove_var("PACKAGE");
    }

    #[test]
    fn last_unfinished_phase_resolves_to_log_after_finphase() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = test_engine(dir.path());
        engine.init(Some("/a/b/foo/bar"), Some("foo")).unwrap();
        engine.add_phase("check", "FAIL").unwrap();
        engine.fin_phase().unwrap();

        // a message after finPhase goes to log, not the closed phase
        engine.add_message("stray", "INFO").unwrap();
        let log = engine.document().unwrap().first_child("log").unwrap();
        assert!(log.children_named("message").next().is_some());
    }
}
