//! CLI argument parsing and validation module
//!
//! Handles command-line interface using clap, including:
//! - `files` and `requests` subcommands
//! - Include filters on relative paths
//! - Rule and limit overrides layered over the config file
//! - Output format selection (human/JSON) and output file
//! - Verbosity and quiet modes

use anyhow::{anyhow, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use std::ffi::OsString;
use std::path::PathBuf;

use crate::config::ConfigOverrides;
use crate::rules::pattern_matcher::{validate_path_filters, validate_smart_patterns};

/// What the user asked to compare
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    Files {
        dir_a: PathBuf,
        dir_b: PathBuf,
    },
    Requests {
        dir: PathBuf,
        endpoint_a: Option<String>,
        endpoint_b: Option<String>,
        headers_a: Vec<(String, String)>,
        headers_b: Vec<(String, String)>,
        content_type: Option<String>,
    },
}

/// Parsed command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliConfig {
    pub mode: Mode,
    pub include: Vec<String>,
    pub config_path: Option<PathBuf>,
    pub json_output: bool,
    pub quiet_mode: bool,
    pub verbose: bool,
    pub output: Option<PathBuf>,
    pub overrides: ConfigOverrides,
}

fn global_args() -> Vec<Arg> {
    vec![
        Arg::new("config")
            .short('c')
            .long("config")
            .value_name("PATH")
            .help("Configuration file (TOML)")
            .value_parser(value_parser!(PathBuf))
            .global(true),
        Arg::new("include")
            .long("include")
            .value_name("GLOB")
            .help("Only compare relative paths matching this filter (exact or glob)")
            .action(ArgAction::Append)
            .global(true),
        Arg::new("ignore")
            .short('i')
            .long("ignore")
            .value_name("PATH")
            .help("Ignore a property path (and everything beneath it)")
            .action(ArgAction::Append)
            .global(true),
        Arg::new("smart-ignore")
            .long("smart-ignore")
            .value_name("REGEX")
            .help("Drop differences whose property name or path matches")
            .action(ArgAction::Append)
            .global(true),
        Arg::new("ignore-order")
            .long("ignore-order")
            .help("Compare collections without regard to order")
            .action(ArgAction::SetTrue)
            .global(true),
        Arg::new("case-insensitive")
            .long("case-insensitive")
            .help("Compare text case-insensitively")
            .action(ArgAction::SetTrue)
            .global(true),
        Arg::new("max-differences")
            .long("max-differences")
            .value_name("N")
            .help("Stop collecting differences for a pair after N")
            .value_parser(value_parser!(usize))
            .global(true),
        Arg::new("max-depth")
            .long("max-depth")
            .value_name("N")
            .help("Maximum nesting depth compared")
            .value_parser(value_parser!(usize))
            .global(true),
        Arg::new("model")
            .long("model")
            .value_name("NAME")
            .help("Document model name passed to the decoder")
            .global(true),
        Arg::new("json")
            .short('j')
            .long("json")
            .help("Output in JSON format")
            .action(ArgAction::SetTrue)
            .global(true),
        Arg::new("output")
            .short('o')
            .long("output")
            .value_name("FILE")
            .help("Write the report to FILE instead of stdout")
            .value_parser(value_parser!(PathBuf))
            .global(true),
        Arg::new("quiet")
            .short('q')
            .long("quiet")
            .help("Suppress progress and warnings")
            .action(ArgAction::SetTrue)
            .conflicts_with("verbose")
            .global(true),
        Arg::new("verbose")
            .short('v')
            .long("verbose")
            .help("Log debug detail to stderr")
            .action(ArgAction::SetTrue)
            .global(true),
    ]
}

/// Command definition, shared by the binary and the help tests
pub fn build_command() -> Command {
    Command::new("divergent")
        .version(env!("CARGO_PKG_VERSION"))
        .author(env!("CARGO_PKG_AUTHORS"))
        .long_version(concat!(env!("DIVERGENT_VERSION"), " (", env!("GIT_HASH"), ")"))
        .about("Diff two corpora of structured documents or two HTTP endpoints")
        .long_about(
            "A regression-testing differ: compares file pairs from two directories, or replays \
             request bodies against two endpoints, and reports exactly what changed.",
        )
        .subcommand_required(true)
        .arg_required_else_help(true)
        .args(global_args())
        .subcommand(
            Command::new("files")
                .about("Compare files with the same relative path under two directories")
                .arg(
                    Arg::new("dir_a")
                        .value_name("DIR_A")
                        .help("Baseline directory")
                        .required(true)
                        .value_parser(value_parser!(PathBuf)),
                )
                .arg(
                    Arg::new("dir_b")
                        .value_name("DIR_B")
                        .help("Candidate directory")
                        .required(true)
                        .value_parser(value_parser!(PathBuf)),
                ),
        )
        .subcommand(
            Command::new("requests")
                .about("Replay every request body under a directory against two endpoints")
                .arg(
                    Arg::new("dir")
                        .value_name("REQUEST_DIR")
                        .help("Directory of request bodies")
                        .required(true)
                        .value_parser(value_parser!(PathBuf)),
                )
                .arg(
                    Arg::new("endpoint-a")
                        .long("endpoint-a")
                        .value_name("URL")
                        .help("Baseline endpoint (overrides dispatch.endpoint_a)"),
                )
                .arg(
                    Arg::new("endpoint-b")
                        .long("endpoint-b")
                        .value_name("URL")
                        .help("Candidate endpoint (overrides dispatch.endpoint_b)"),
                )
                .arg(
                    Arg::new("header")
                        .short('H')
                        .long("header")
                        .value_name("'NAME: VALUE'")
                        .help("Header sent to both endpoints")
                        .action(ArgAction::Append),
                )
                .arg(
                    Arg::new("header-a")
                        .long("header-a")
                        .value_name("'NAME: VALUE'")
                        .help("Header sent to endpoint A only")
                        .action(ArgAction::Append),
                )
                .arg(
                    Arg::new("header-b")
                        .long("header-b")
                        .value_name("'NAME: VALUE'")
                        .help("Header sent to endpoint B only")
                        .action(ArgAction::Append),
                )
                .arg(
                    Arg::new("content-type")
                        .long("content-type")
                        .value_name("TYPE")
                        .help("Content type of the request bodies"),
                )
                .arg(
                    Arg::new("concurrency")
                        .long("concurrency")
                        .value_name("N")
                        .help("Maximum units in flight")
                        .value_parser(value_parser!(usize)),
                )
                .arg(
                    Arg::new("timeout-ms")
                        .long("timeout-ms")
                        .value_name("MS")
                        .help("Per-call timeout in milliseconds")
                        .value_parser(value_parser!(u64)),
                ),
        )
}

/// Parse command line arguments and return configuration
pub fn parse_args() -> Result<CliConfig> {
    let matches = build_command().get_matches();
    from_matches(&matches)
}

pub fn parse_from<I, T>(args: I) -> Result<CliConfig>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let matches = build_command().try_get_matches_from(args)?;
    from_matches(&matches)
}

fn strings(matches: &ArgMatches, id: &str) -> Vec<String> {
    matches
        .get_many::<String>(id)
        .map(|values| values.cloned().collect())
        .unwrap_or_default()
}

/// Split `Name: value`
pub fn parse_header(raw: &str) -> Result<(String, String)> {
    let (name, value) = raw
        .split_once(':')
        .ok_or_else(|| anyhow!("Invalid header '{}': expected 'NAME: VALUE'", raw))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(anyhow!("Invalid header '{}': empty name", raw));
    }
    Ok((name.to_string(), value.trim().to_string()))
}

fn headers(matches: &ArgMatches, id: &str) -> Result<Vec<(String, String)>> {
    strings(matches, id).iter().map(|h| parse_header(h)).collect()
}

fn from_matches(matches: &ArgMatches) -> Result<CliConfig> {
    let include = strings(matches, "include");
    validate_path_filters(&include)?;
    let smart_patterns = strings(matches, "smart-ignore");
    validate_smart_patterns(&smart_patterns)?;

    let mut overrides = ConfigOverrides {
        max_differences: matches.get_one::<usize>("max-differences").copied(),
        max_depth: matches.get_one::<usize>("max-depth").copied(),
        ignore_collection_order: matches.get_flag("ignore-order"),
        case_insensitive: matches.get_flag("case-insensitive"),
        model: matches.get_one::<String>("model").cloned(),
        ignore_paths: strings(matches, "ignore"),
        smart_patterns,
        ..ConfigOverrides::default()
    };

    let mode = match matches.subcommand() {
        Some(("files", sub)) => {
            let dir_a = sub
                .get_one::<PathBuf>("dir_a")
                .cloned()
                .ok_or_else(|| anyhow!("DIR_A is required"))?;
            let dir_b = sub
                .get_one::<PathBuf>("dir_b")
                .cloned()
                .ok_or_else(|| anyhow!("DIR_B is required"))?;
            for dir in [&dir_a, &dir_b] {
                if !dir.exists() {
                    return Err(anyhow!("Path does not exist: {}", dir.display()));
                }
            }
            Mode::Files { dir_a, dir_b }
        }
        Some(("requests", sub)) => {
            let dir = sub
                .get_one::<PathBuf>("dir")
                .cloned()
                .ok_or_else(|| anyhow!("REQUEST_DIR is required"))?;
            if !dir.exists() {
                return Err(anyhow!("Path does not exist: {}", dir.display()));
            }
            overrides.max_in_flight = sub.get_one::<usize>("concurrency").copied();
            overrides.timeout_ms = sub.get_one::<u64>("timeout-ms").copied();

            let shared = headers(sub, "header")?;
            let mut headers_a = shared.clone();
            headers_a.extend(headers(sub, "header-a")?);
            let mut headers_b = shared;
            headers_b.extend(headers(sub, "header-b")?);

            Mode::Requests {
                dir,
                endpoint_a: sub.get_one::<String>("endpoint-a").cloned(),
                endpoint_b: sub.get_one::<String>("endpoint-b").cloned(),
                headers_a,
                headers_b,
                content_type: sub.get_one::<String>("content-type").cloned(),
            }
        }
        _ => return Err(anyhow!("A subcommand is required (files or requests)")),
    };

    Ok(CliConfig {
        mode,
        include,
        config_path: matches.get_one::<PathBuf>("config").cloned(),
        json_output: matches.get_flag("json"),
        quiet_mode: matches.get_flag("quiet"),
        verbose: matches.get_flag("verbose"),
        output: matches.get_one::<PathBuf>("output").cloned(),
        overrides,
    })
}
