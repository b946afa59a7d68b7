use std::env;
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::pki_types::{ServerName, UnixTime};
use serde::Serialize;
use tracing::debug;
use tracing_subscriber::EnvFilter;
use trust_store::{
    load_certificate, Certificate, ConfirmationGateway, InteractionMode, TrustDecision,
    TrustEvaluator, TrustOrigin, TrustRequest, TrustStoreConfig, ENV_NON_INTERACTIVE,
};

const ENV_CONFIG: &str = "TRUSTCTL_CONFIG";
const ENV_STORE_PATH: &str = "TRUSTCTL_STORE_PATH";
const ENV_STORE_PASSWORD: &str = "TRUSTCTL_STORE_PASSWORD";
const ENV_LOG: &str = "TRUSTCTL_LOG";

const STATUS_PREFIX: &str = "TRUSTCTL_STATUS\t";
const USAGE: &str =
    "usage: trustctl <list | show ALIAS | add FILE | remove ALIAS | issuers | check HOST FILE>";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExitClass {
    Ok,
    Usage,
    ConfigInvalid,
    StoreBroken,
    OperationFailed,
    Untrusted,
}

impl ExitClass {
    fn code(self) -> i32 {
        match self {
            Self::Ok => 0,
            Self::Usage => 2,
            Self::ConfigInvalid => 20,
            Self::StoreBroken => 21,
            Self::OperationFailed => 22,
            Self::Untrusted => 23,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Usage => "usage",
            Self::ConfigInvalid => "config_invalid",
            Self::StoreBroken => "store_broken",
            Self::OperationFailed => "operation_failed",
            Self::Untrusted => "untrusted",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct RunOutcome {
    class: ExitClass,
    detail: Option<String>,
}

impl RunOutcome {
    fn ok() -> Self {
        Self {
            class: ExitClass::Ok,
            detail: None,
        }
    }

    fn error(class: ExitClass, detail: impl Into<String>) -> Self {
        Self {
            class,
            detail: Some(detail.into()),
        }
    }

    fn status_record(&self) -> StatusRecord {
        StatusRecord {
            outcome: if self.class == ExitClass::Ok { "ok" } else { "error" },
            exit_code: self.class.code(),
            exit_class: self.class.label(),
            detail: self.detail.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
struct StatusRecord {
    outcome: &'static str,
    exit_code: i32,
    exit_class: &'static str,
    detail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    List,
    Show(String),
    Add(PathBuf),
    Remove(String),
    Issuers,
    Check { host: String, certificate: PathBuf },
}

#[derive(Debug, Serialize)]
struct CertificateRecord<'a> {
    alias: String,
    subject: &'a str,
    issuer: &'a str,
    serial: &'a str,
    not_before: i64,
    not_after: i64,
}

impl<'a> CertificateRecord<'a> {
    fn new(certificate: &'a Certificate) -> Self {
        Self {
            alias: certificate.alias(),
            subject: certificate.subject(),
            issuer: certificate.issuer(),
            serial: certificate.serial(),
            not_before: certificate.not_before(),
            not_after: certificate.not_after(),
        }
    }
}

#[derive(Debug, Serialize)]
struct IssuersRecord {
    system: usize,
    custom: usize,
    total: usize,
}

#[derive(Debug, Serialize)]
struct CheckRecord {
    host: String,
    alias: String,
    trusted: bool,
    origin: Option<&'static str>,
    persisted: Option<bool>,
    cause: Option<String>,
}

/// Prompts on the controlling terminal: details go to stderr, the answer
/// is read from stdin.
struct TerminalGateway;

impl ConfirmationGateway for TerminalGateway {
    fn confirm(&self, certificate: &Certificate) -> bool {
        {
            let mut stderr = io::stderr().lock();
            let _ = writeln!(stderr, "Server certificate is not trusted:");
            let _ = writeln!(stderr, "  subject:    {}", certificate.subject());
            let _ = writeln!(stderr, "  issuer:     {}", certificate.issuer());
            let _ = writeln!(stderr, "  serial:     {}", certificate.serial());
            let _ = writeln!(
                stderr,
                "  valid:      {} .. {} (unix seconds)",
                certificate.not_before(),
                certificate.not_after()
            );
            let _ = write!(stderr, "Trust this certificate from now on? [y/N] ");
            let _ = stderr.flush();
        }

        let mut answer = String::new();
        match io::stdin().lock().read_line(&mut answer) {
            Ok(_) => is_affirmative(&answer),
            Err(error) => {
                debug!(%error, "cannot read confirmation answer");
                false
            }
        }
    }
}

fn main() {
    init_tracing();

    let args: Vec<String> = env::args().skip(1).collect();
    let outcome = run(&args);
    if outcome.class != ExitClass::Ok {
        emit_status(&outcome.status_record());
    }
    std::process::exit(outcome.class.code());
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(ENV_LOG).unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

fn emit_status(record: &StatusRecord) {
    match serde_json::to_string(record) {
        Ok(json) => eprintln!("{STATUS_PREFIX}{json}"),
        Err(error) => eprintln!("failed to serialize status record: {error}"),
    }
}

fn run(args: &[String]) -> RunOutcome {
    let command = match parse_command(args) {
        Ok(command) => command,
        Err(detail) => return RunOutcome::error(ExitClass::Usage, detail),
    };
    let config = match load_config(|name| env::var(name).ok()) {
        Ok(config) => config,
        Err(detail) => return RunOutcome::error(ExitClass::ConfigInvalid, detail),
    };
    let evaluator = match open_evaluator(&config) {
        Ok(evaluator) => evaluator,
        Err(outcome) => return outcome,
    };

    let mut stdout = io::stdout().lock();
    execute(&evaluator, command, &mut stdout)
}

fn parse_command(args: &[String]) -> Result<Command, String> {
    let args: Vec<&str> = args.iter().map(String::as_str).collect();
    match args.as_slice() {
        ["list"] => Ok(Command::List),
        ["show", alias] => Ok(Command::Show((*alias).to_string())),
        ["add", path] => Ok(Command::Add(PathBuf::from(path))),
        ["remove", alias] => Ok(Command::Remove((*alias).to_string())),
        ["issuers"] => Ok(Command::Issuers),
        ["check", host, path] => Ok(Command::Check {
            host: (*host).to_string(),
            certificate: PathBuf::from(path),
        }),
        _ => Err(USAGE.to_string()),
    }
}

/// `TRUSTCTL_CONFIG` names a JSON config file and wins over the individual
/// variables.
fn load_config(lookup: impl Fn(&str) -> Option<String>) -> Result<TrustStoreConfig, String> {
    let non_empty = |name: &str| {
        lookup(name)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    };

    if let Some(path) = non_empty(ENV_CONFIG) {
        let raw = fs::read_to_string(&path)
            .map_err(|error| format!("cannot read {ENV_CONFIG} file {path}: {error}"))?;
        return serde_json::from_str(&raw)
            .map_err(|error| format!("invalid trust store config in {path}: {error}"));
    }

    let store_path = non_empty(ENV_STORE_PATH)
        .ok_or_else(|| format!("set {ENV_CONFIG} or {ENV_STORE_PATH}"))?;
    Ok(TrustStoreConfig {
        interaction_mode: InteractionMode::from_flag(lookup(ENV_NON_INTERACTIVE).as_deref()),
        ..TrustStoreConfig::new(store_path, lookup(ENV_STORE_PASSWORD).unwrap_or_default())
    })
}

fn open_evaluator(config: &TrustStoreConfig) -> Result<TrustEvaluator, RunOutcome> {
    let gateway: Arc<dyn ConfirmationGateway> = Arc::new(TerminalGateway);
    let evaluator = TrustEvaluator::from_config(config, Some(gateway))
        .map_err(|error| RunOutcome::error(ExitClass::ConfigInvalid, error.to_string()))?;
    if evaluator.custom_store().is_broken() {
        return Err(RunOutcome::error(
            ExitClass::StoreBroken,
            format!(
                "trust store at {} cannot be opened",
                config.store_path.display()
            ),
        ));
    }
    Ok(evaluator)
}

fn execute(evaluator: &TrustEvaluator, command: Command, out: &mut impl Write) -> RunOutcome {
    match command {
        Command::List => {
            let certificates = evaluator.get_certificates();
            let records: Vec<CertificateRecord<'_>> =
                certificates.iter().map(CertificateRecord::new).collect();
            print_json(out, &records)
        }
        Command::Show(alias) => match evaluator.get_certificate(&alias) {
            Some(certificate) => print_json(out, &CertificateRecord::new(&certificate)),
            None => RunOutcome::error(
                ExitClass::OperationFailed,
                format!("no certificate stored under alias {alias:?}"),
            ),
        },
        Command::Add(path) => {
            if evaluator.add_certificate_from_path(&path) {
                RunOutcome::ok()
            } else {
                RunOutcome::error(
                    ExitClass::OperationFailed,
                    format!("cannot add certificate from {}", path.display()),
                )
            }
        }
        Command::Remove(alias) => {
            if evaluator.remove_certificate_by_alias(&alias) {
                RunOutcome::ok()
            } else {
                RunOutcome::error(
                    ExitClass::OperationFailed,
                    format!("cannot remove alias {alias:?}"),
                )
            }
        }
        Command::Issuers => {
            let record = IssuersRecord {
                system: evaluator.system_source().accepted_issuers().len(),
                custom: evaluator.custom_store().accepted_issuers().len(),
                total: evaluator.accepted_issuers().len(),
            };
            print_json(out, &record)
        }
        Command::Check { host, certificate } => check(evaluator, &host, &certificate, out),
    }
}

fn check(
    evaluator: &TrustEvaluator,
    host: &str,
    certificate_path: &Path,
    out: &mut impl Write,
) -> RunOutcome {
    let certificate = match load_certificate(certificate_path) {
        Ok(certificate) => certificate,
        Err(error) => return RunOutcome::error(ExitClass::OperationFailed, error.to_string()),
    };
    let server_name = match ServerName::try_from(host.to_string()) {
        Ok(name) => name,
        Err(error) => {
            return RunOutcome::error(
                ExitClass::Usage,
                format!("invalid server name {host:?}: {error}"),
            )
        }
    };

    let decision = evaluator.evaluate(&TrustRequest::new(
        certificate.der(),
        &[],
        &server_name,
        UnixTime::now(),
    ));
    let (origin, persisted) = match &decision {
        TrustDecision::Trusted(TrustOrigin::System) => (Some("system"), None),
        TrustDecision::Trusted(TrustOrigin::Custom) => (Some("custom"), None),
        TrustDecision::Trusted(TrustOrigin::Confirmed { persisted }) => {
            (Some("confirmed"), Some(*persisted))
        }
        TrustDecision::Trusted(TrustOrigin::AutoAccepted { persisted }) => {
            (Some("auto_accepted"), Some(*persisted))
        }
        TrustDecision::Untrusted(_) => (None, None),
    };
    let cause = match &decision {
        TrustDecision::Untrusted(cause) => Some(cause.to_string()),
        TrustDecision::Trusted(_) => None,
    };
    let record = CheckRecord {
        host: host.to_string(),
        alias: certificate.alias(),
        trusted: decision.is_trusted(),
        origin,
        persisted,
        cause,
    };

    let printed = print_json(out, &record);
    if printed.class != ExitClass::Ok || decision.is_trusted() {
        return printed;
    }
    RunOutcome::error(
        ExitClass::Untrusted,
        format!("certificate for {host} is not trusted"),
    )
}

fn print_json(out: &mut impl Write, value: &impl Serialize) -> RunOutcome {
    let written = serde_json::to_writer_pretty(&mut *out, value)
        .map_err(io::Error::from)
        .and_then(|()| writeln!(out));
    match written {
        Ok(()) => RunOutcome::ok(),
        Err(error) => RunOutcome::error(
            ExitClass::OperationFailed,
            format!("cannot write output: {error}"),
        ),
    }
}

fn is_affirmative(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}
