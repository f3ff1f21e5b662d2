//! CLI entry point for the `ppc-dbg` scripted debugger.

use std::env;
use std::ffi::OsString;
use std::fs;
use std::io::{self, Read, Write};
use std::path::PathBuf;

use crossbeam_channel as _;
use log::{error, info};
use ppc_core::{CoreConfig, Cpu, ExecutionMode, SymbolDb, DEFAULT_TICKS_PER_SECOND};
use ppc_debugger::{
    parse_address, parse_script, run_script, CoreThread, DebugSession, HostConfig,
};
#[cfg(test)]
use proptest as _;
#[cfg(test)]
use rstest as _;
#[cfg(test)]
use tempfile as _;
use thiserror as _;

const USAGE_TEXT: &str = "\
Usage: ppc-dbg <image> [options]

Loads a raw big-endian PowerPC image, boots it paused and runs a debugger
script against it.

Options:
  --base <addr>    Load address and start of RAM (default: 80000000)
  --entry <addr>   Initial PC (default: load address)
  --map <file>     Symbol map to load
  --script <file>  Script to run (default: standard input)
  --jit            Start in compiled mode
  --budget <n>     Step-out budget in single steps (default: 486000000)
  -h, --help       Show this help message

Script commands:
  step | over | out | skip | setpc | gotopc
  break [addr] | select <addr> | goto <text>
  continue | pause | wait [ms]
  mode interp|jit | clearcache
  regs | stack | callers | calls | controls
  search <name> [start end] | disasm [n]

Examples:
  ppc-dbg game.bin --map game.map --script trace.dbg
  echo step | ppc-dbg game.bin --base 80003100
";

/// Distance below the top of RAM where the initial stack frame sits.
const STACK_TOP_OFFSET: u32 = 0x10;

#[derive(Debug, PartialEq, Eq)]
struct Options {
    image: PathBuf,
    base: u32,
    entry: Option<u32>,
    map: Option<PathBuf>,
    script: Option<PathBuf>,
    mode: ExecutionMode,
    budget: u64,
}

#[derive(Debug)]
enum ParseResult {
    Run(Options),
    Help,
}

#[allow(clippy::while_let_on_iterator)]
fn parse_args(mut args: impl Iterator<Item = OsString>) -> Result<ParseResult, String> {
    let mut image: Option<PathBuf> = None;
    let mut base = CoreConfig::default().ram_base;
    let mut entry = None;
    let mut map = None;
    let mut script = None;
    let mut mode = ExecutionMode::Interpreted;
    let mut budget = DEFAULT_TICKS_PER_SECOND;

    while let Some(arg) = args.next() {
        if arg == "--help" || arg == "-h" {
            return Ok(ParseResult::Help);
        }

        if arg == "--jit" {
            mode = ExecutionMode::Compiled;
            continue;
        }

        if arg == "--base" || arg == "--entry" || arg == "--map" || arg == "--script"
            || arg == "--budget"
        {
            let name = arg.to_string_lossy().to_string();
            let value = args
                .next()
                .ok_or_else(|| format!("missing value for {name}"))?;
            let text = value.to_string_lossy();
            match name.as_str() {
                "--base" => base = address_value(&text)?,
                "--entry" => entry = Some(address_value(&text)?),
                "--map" => map = Some(PathBuf::from(value)),
                "--script" => script = Some(PathBuf::from(value)),
                _ => {
                    budget = text
                        .parse()
                        .map_err(|_| format!("invalid budget: {text}"))?;
                }
            }
            continue;
        }

        if arg.to_string_lossy().starts_with('-') {
            return Err(format!("unknown option: {}", arg.to_string_lossy()));
        }

        if image.is_some() {
            return Err("multiple image paths provided".to_string());
        }
        image = Some(PathBuf::from(arg));
    }

    let image = image.ok_or_else(|| "missing image path".to_string())?;
    Ok(ParseResult::Run(Options {
        image,
        base,
        entry,
        map,
        script,
        mode,
        budget,
    }))
}

fn address_value(text: &str) -> Result<u32, String> {
    parse_address(text).map_err(|err| err.to_string())
}

fn boot(options: &Options) -> Result<(Cpu, SymbolDb), String> {
    let image = fs::read(&options.image)
        .map_err(|e| format!("failed to read {}: {e}", options.image.display()))?;

    let mut cpu = Cpu::new(CoreConfig {
        ram_base: options.base,
        ticks_per_second: options.budget,
        initial_mode: options.mode,
        boot_to_pause: true,
        ..CoreConfig::default()
    });
    cpu.memory_mut()
        .load_image(options.base, &image)
        .map_err(|e| format!("failed to load image: {e}"))?;
    cpu.set_pc(options.entry.unwrap_or(options.base));
    let stack_top = options
        .base
        .wrapping_add(cpu.memory().size())
        .wrapping_sub(STACK_TOP_OFFSET);
    cpu.regs_mut().set_gpr(1, stack_top);

    let mut symbols = match &options.map {
        Some(path) => {
            let text = fs::read_to_string(path)
                .map_err(|e| format!("failed to read {}: {e}", path.display()))?;
            SymbolDb::parse_map(&text).map_err(|e| format!("{}: {e}", path.display()))?
        }
        None => SymbolDb::new(),
    };
    symbols.analyze_calls(cpu.memory());
    info!(
        "loaded {} bytes at {:08x}, {} symbols",
        image.len(),
        options.base,
        symbols.len()
    );
    Ok((cpu, symbols))
}

fn read_script(options: &Options) -> Result<String, String> {
    match &options.script {
        Some(path) => fs::read_to_string(path)
            .map_err(|e| format!("failed to read {}: {e}", path.display())),
        None => {
            let mut text = String::new();
            io::stdin()
                .read_to_string(&mut text)
                .map_err(|e| format!("failed to read standard input: {e}"))?;
            Ok(text)
        }
    }
}

fn run(options: &Options) -> Result<(), i32> {
    let report = |message: String| {
        eprintln!("error: {message}");
        1
    };

    let script = read_script(options).map_err(report)?;
    let script = parse_script(&script).map_err(|e| report(e.to_string()))?;
    let (cpu, symbols) = boot(options).map_err(report)?;

    let core = CoreThread::spawn(cpu, HostConfig::default()).map_err(|e| report(e.to_string()))?;
    let mut session = DebugSession::attach(&core, symbols).map_err(|e| report(e.to_string()))?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let result = run_script(&mut session, &script, &mut out);
    let _ = out.flush();
    drop(session);
    if let Err(e) = core.shutdown() {
        error!("core thread did not shut down cleanly: {e}");
    }
    result.map_err(|e| report(e.to_string()))
}

fn main() {
    pretty_env_logger::init();

    let exit_code = match parse_args(env::args_os().skip(1)) {
        Ok(ParseResult::Help) => {
            println!("{USAGE_TEXT}");
            0
        }
        Ok(ParseResult::Run(options)) => match run(&options) {
            Ok(()) => 0,
            Err(code) => code,
        },
        Err(error) => {
            eprintln!("error: {error}");
            eprintln!("{USAGE_TEXT}");
            1
        }
    };

    std::process::exit(exit_code);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsString;
    use std::path::PathBuf;

    fn args(list: &[&str]) -> impl Iterator<Item = OsString> {
        list.iter().map(OsString::from).collect::<Vec<_>>().into_iter()
    }

    #[test]
    fn parses_full_option_set() {
        let result = parse_args(args(&[
            "game.bin",
            "--base",
            "0x1000",
            "--entry",
            "1010",
            "--map",
            "game.map",
            "--script",
            "trace.dbg",
            "--jit",
            "--budget",
            "500",
        ]))
        .expect("valid args should parse");

        let ParseResult::Run(options) = result else {
            panic!("expected run options");
        };
        assert_eq!(
            options,
            Options {
                image: PathBuf::from("game.bin"),
                base: 0x1000,
                entry: Some(0x1010),
                map: Some(PathBuf::from("game.map")),
                script: Some(PathBuf::from("trace.dbg")),
                mode: ExecutionMode::Compiled,
                budget: 500,
            }
        );
    }

    #[test]
    fn defaults_match_core_config() {
        let ParseResult::Run(options) = parse_args(args(&["game.bin"])).expect("parses") else {
            panic!("expected run options");
        };
        assert_eq!(options.base, CoreConfig::default().ram_base);
        assert_eq!(options.budget, DEFAULT_TICKS_PER_SECOND);
        assert_eq!(options.mode, ExecutionMode::Interpreted);
        assert!(options.entry.is_none() && options.script.is_none());
    }

    #[test]
    fn parses_help_flag() {
        let result = parse_args(args(&["--help"])).expect("help should parse without error");
        assert!(matches!(result, ParseResult::Help));
    }

    #[test]
    fn rejects_bad_address() {
        let error = parse_args(args(&["game.bin", "--base", "main"]))
            .expect_err("non-hex base should fail");
        assert!(error.contains("invalid address"));
    }

    #[test]
    fn rejects_missing_value() {
        let error = parse_args(args(&["game.bin", "--map"])).expect_err("missing value");
        assert!(error.contains("missing value for --map"));
    }

    #[test]
    fn rejects_missing_image() {
        let error = parse_args(std::iter::empty()).expect_err("missing image should fail");
        assert!(error.contains("missing image"));
    }

    #[test]
    fn rejects_unknown_option() {
        let error = parse_args(args(&["game.bin", "--fast"])).expect_err("unknown option");
        assert!(error.contains("unknown option"));
    }
}
