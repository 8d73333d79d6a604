//! Parses one pipe-delivered command line, routes it to the Journal
//! Engine or Renderer, and formats the `"message:<text>-code:<status>\n"`
//! reply (§4.6).

use crate::engine::Engine;
use crate::error::{EngineError, ProtocolError};
use crate::renderer;
use crate::types::{DumpMode, Severity};

#[derive(Debug, Default)]
struct Options {
    package: Option<String>,
    test: Option<String>,
    name: Option<String>,
    severity: Option<String>,
    full_journal: bool,
    message: Option<String>,
    result: Option<String>,
    value: Option<String>,
    tolerance: Option<String>,
    type_opt: Option<String>,
    command: Option<String>,
}

/// Tokenise `line` with shell-style quoting, split the verb from its
/// options, and return the literal pipe reply.
pub fn dispatch(line: &str, engine: &mut Engine) -> String {
    let (message, code) = match run(line, engine) {
        Ok(pair) => pair,
        Err(e) => {
            tracing::warn!(error = %e, "command rejected");
            (String::new(), 1)
        }
    };
    format!("message:{message}-code:{code}\n")
}

fn run(line: &str, engine: &mut Engine) -> Result<(String, i32), ProtocolError> {
    let tokens = shell_words::split(line).map_err(|e| ProtocolError::Tokenize(e.to_string()))?;

    let Some((verb, rest)) = tokens.split_first() else {
        return Ok((String::new(), 1));
    };
    let options = parse_options(rest);

    route(verb, &options, engine)
}

fn parse_options(args: &[String]) -> Options {
    let mut options = Options::default();
    let mut i = 0;
    while i < args.len() {
        let arg = args[i].as_str();
        let mut take_value = |i: &mut usize| -> Option<String> {
            *i += 1;
            args.get(*i).cloned()
        };
        match arg {
            "-p" | "--package" => options.package = take_value(&mut i),
            "-t" | "--test" => options.test = take_value(&mut i),
            "-n" | "--name" => options.name = take_value(&mut i),
            "-s" | "--severity" => options.severity = take_value(&mut i),
            "-f" | "--full-journal" => options.full_journal = true,
            "-m" | "--message" => options.message = take_value(&mut i),
            "-r" | "--result" => options.result = take_value(&mut i),
            "-v" | "--value" => options.value = take_value(&mut i),
            "--tolerance" => options.tolerance = take_value(&mut i),
            "--type" => options.type_opt = take_value(&mut i),
            "-c" | "--command" => options.command = take_value(&mut i),
            _ => {}
        }
        i += 1;
    }
    options
}

fn route(
    verb: &str,
    options: &Options,
    engine: &mut Engine,
) -> Result<(String, i32), ProtocolError> {
    match verb {
        "init" => route_init(options, engine),
        "dump" => route_dump(options, engine),
        "printlog" => route_printlog(options, engine),
        "addphase" => route_addphase(options, engine),
        "log" => route_log(options, engine),
        "test" => route_test(options, engine),
        "metric" => route_metric(options, engine),
        "finphase" => route_finphase(engine),
        "teststate" => route_teststate(engine),
        "phasestate" => route_phasestate(engine),
        "rpm" => route_rpm(options, engine),
        other => Err(ProtocolError::UnknownVerb(other.to_string())),
    }
}

fn route_init(options: &Options, engine: &mut Engine) -> Result<(String, i32), ProtocolError> {
    let test = options
        .test
        .as_deref()
        .ok_or(ProtocolError::MissingOption("test"))?;
    let package = crate::engine::determine_package(Some(test));
    let status = engine.init(Some(test), package.as_deref())?;
    Ok((String::new(), status))
}

fn route_dump(options: &Options, engine: &mut Engine) -> Result<(String, i32), ProtocolError> {
    let mode_str = options
        .type_opt
        .as_deref()
        .ok_or(ProtocolError::MissingOption("type"))?;
    let mode: DumpMode = mode_str
        .parse()
        .map_err(|_| EngineError::BadDumpMode(mode_str.to_string()))?;
    let text = engine.dump(mode)?;
    if options.message.as_deref() == Some("toVar") {
        Ok((text, 0))
    } else {
        eprintln!("{text}");
        Ok((String::new(), 0))
    }
}

fn route_printlog(options: &Options, engine: &mut Engine) -> Result<(String, i32), ProtocolError> {
    let severity_str = options
        .severity
        .as_deref()
        .ok_or(ProtocolError::MissingOption("severity"))?;
    let Ok(severity) = severity_str.parse::<Severity>() else {
        return Ok((String::new(), 1));
    };
    let full_journal = options.full_journal;

    let buffered = options.message.as_deref() == Some("toVar");
    let doc = engine.open_document()?.clone();
    let rendered = renderer::create_log(&doc, severity, full_journal, buffered);
    if buffered {
        Ok((rendered, 0))
    } else {
        println!("{rendered}");
        Ok((String::new(), 0))
    }
}

fn route_addphase(options: &Options, engine: &mut Engine) -> Result<(String, i32), ProtocolError> {
    let name = options
        .name
        .as_deref()
        .ok_or(ProtocolError::MissingOption("name"))?;
    let phase_type = options
        .type_opt
        .as_deref()
        .ok_or(ProtocolError::MissingOption("type"))?;
    engine.add_phase(name, phase_type)?;
    print!("{}", renderer::head_log(name, is_tty_unbuffered()));
    Ok((String::new(), 0))
}

fn route_log(options: &Options, engine: &mut Engine) -> Result<(String, i32), ProtocolError> {
    let message = options
        .message
        .as_deref()
        .ok_or(ProtocolError::MissingOption("message"))?;
    let severity = options.severity.as_deref().unwrap_or("LOG");
    engine.add_message(message, severity)?;
    Ok((String::new(), 0))
}

fn route_test(options: &Options, engine: &mut Engine) -> Result<(String, i32), ProtocolError> {
    let message = options
        .message
        .as_deref()
        .ok_or(ProtocolError::MissingOption("message"))?;
    let result = options.result.as_deref().unwrap_or("FAIL");
    match engine.add_test(message, result, options.command.as_deref()) {
        Ok(()) => {
            let label = if result == "FAIL" { "FAIL" } else { "PASS" };
            print!("{}", renderer::log_line(message, label, is_tty_unbuffered()));
            Ok((String::new(), 0))
        }
        Err(EngineError::NoOpenPhase) => Ok((String::new(), 1)),
        Err(e) => Err(e.into()),
    }
}

/// Colour is only ever appropriate for the daemon's own direct stdout
/// writes (addphase/test verbs), never for pipe replies.
fn is_tty_unbuffered() -> bool {
    std::io::IsTerminal::is_terminal(&std::io::stdout())
}

fn route_metric(options: &Options, engine: &mut Engine) -> Result<(String, i32), ProtocolError> {
    let name = options
        .name
        .as_deref()
        .ok_or(ProtocolError::MissingOption("name"))?;
    let type_opt = options
        .type_opt
        .as_deref()
        .ok_or(ProtocolError::MissingOption("type"))?;
    let value_str = options
        .value
        .as_deref()
        .ok_or(ProtocolError::MissingOption("value"))?;
    let tolerance_str = options
        .tolerance
        .as_deref()
        .ok_or(ProtocolError::MissingOption("tolerance"))?;
    let value: f64 = value_str
        .parse()
        .map_err(|_| ProtocolError::BadNumber(value_str.to_string()))?;
    let tolerance: f64 = tolerance_str
        .parse()
        .map_err(|_| ProtocolError::BadNumber(tolerance_str.to_string()))?;
    match engine.add_metric(type_opt, name, value, tolerance) {
        Ok(()) => Ok((String::new(), 0)),
        Err(_) => Ok((String::new(), 1)),
    }
}

fn route_finphase(engine: &mut Engine) -> Result<(String, i32), ProtocolError> {
    match engine.fin_phase() {
        Ok(outcome) => {
            let message = format!("{}:{}:{}", outcome.phase_type, outcome.result, outcome.name);
            let code = outcome.score.min(i32::MAX as u32) as i32;
            Ok((message, code))
        }
        Err(_) => Ok((String::new(), 1)),
    }
}

fn route_teststate(engine: &mut Engine) -> Result<(String, i32), ProtocolError> {
    match engine.test_state() {
        Ok(failed) => Ok((String::new(), failed as i32)),
        Err(_) => Ok((String::new(), 1)),
    }
}

fn route_phasestate(engine: &mut Engine) -> Result<(String, i32), ProtocolError> {
    match engine.phase_state() {
        Ok(failed) => Ok((String::new(), failed as i32)),
        Err(_) => Ok((String::new(), 1)),
    }
}

fn route_rpm(options: &Options, engine: &mut Engine) -> Result<(String, i32), ProtocolError> {
    let package = options
        .package
        .as_deref()
        .ok_or(ProtocolError::MissingOption("package"))?;
    engine.log_rpm_version(package)?;
    Ok((String::new(), 0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facts::{HostFacts, PackageInfo};
    use crate::types::{HostFactsSnapshot, PackageLookup};

    struct FakeHostFacts;
    impl HostFacts for FakeHostFacts {
        fn collect(&self) -> HostFactsSnapshot {
            HostFactsSnapshot {
                hostname: "h".into(),
                arch: "x86_64".into(),
                cpu: "1 x Fake".into(),
                ram: "1 MB".into(),
                hdd: "1 GB".into(),
                release: "Fake".into(),
            }
        }
    }

    struct FakePackageInfo;
    impl PackageInfo for FakePackageInfo {
        fn lookup(&self, _name: &str) -> PackageLookup {
            PackageLookup::NotInstalled
        }
    }

    fn test_engine(dir: &std::path::Path) -> Engine {
        Engine::new(
            dir.join("j.xml"),
            dir.join("bl"),
            Box::new(FakeHostFacts),
            Box::new(FakePackageInfo),
        )
    }

    #[test]
    fn full_scenario_pass_and_fail_phases() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = test_engine(dir.path());

        let reply = dispatch("init -t /a/b/foo/bar", &mut engine);
        assert_eq!(reply, "message:-code:0\n");

        dispatch("addphase -n check --type FAIL", &mut engine);
        dispatch("test -m eq -r PASS", &mut engine);
        let fin = dispatch("finphase", &mut engine);
        assert_eq!(fin, "message:FAIL:PASS:check-code:0\n");

        dispatch("addphase -n check2 --type FAIL", &mut engine);
        dispatch("test -m ne -r FAIL", &mut engine);
        let fin2 = dispatch("finphase", &mut engine);
        assert_eq!(fin2, "message:FAIL:FAIL:check2-code:1\n");
    }

    #[test]
    fn orphan_test_is_rejected_without_mutation() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = test_engine(dir.path());
        dispatch("init -t /a/b/foo/bar", &mut engine);

        let reply = dispatch("test -m orphan -r FAIL", &mut engine);
        assert_eq!(reply, "message:-code:1\n");
        let log = engine.document().unwrap().first_child("log").unwrap();
        assert!(log.children_named("test").next().is_none());
    }

    #[test]
    fn duplicate_metric_returns_nonzero() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = test_engine(dir.path());
        dispatch("init -t /a/b/foo/bar", &mut engine);
        dispatch("addphase -n check --type FAIL", &mut engine);

        let first = dispatch("metric --type LINEAR -n t -v 1.5 --tolerance 0.1", &mut engine);
        assert_eq!(first, "message:-code:0\n");
        let second = dispatch("metric --type LINEAR -n t -v 2.0 --tolerance 0.1", &mut engine);
        assert_eq!(second, "message:-code:1\n");
    }

    #[test]
    fn unknown_verb_returns_status_one() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = test_engine(dir.path());
        let reply = dispatch("bogus", &mut engine);
        assert_eq!(reply, "message:-code:1\n");
    }
}
