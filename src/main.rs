//! Thin CLI layer: parse args, validate the URL scheme, and stream the
//! payload to stdout. Diagnostics go to stderr; exit 0 only on success.

use clap::{Arg, Command};
use colored::Colorize;
use std::env;
use std::io::{self, IsTerminal, Write};

use htcat_core::{config, utils, Downloader};

// ---- UI helpers (no-op when stderr isn't a TTY) ----

fn use_color() -> bool {
    io::stderr().is_terminal() && env::var("NO_COLOR").unwrap_or_default().is_empty()
}

fn error(msg: &str) {
    if use_color() {
        eprintln!("{}", msg.red());
    } else {
        eprintln!("{}", msg);
    }
}

fn print_usage() {
    // Bare words like "help" look like URLs to a naive parse, which makes
    // a scheme error baffling on its own. Show usage alongside it.
    eprintln!("usage: htcat <url>");
}

fn run() -> Result<(), String> {
    let matches = Command::new("htcat")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Parallel HTTP(S) cat: fetch one URL with concurrent range GETs, stream it in order to stdout")
        .after_help(
            "Examples:\n  htcat https://example.com/big.iso > big.iso\n  HTCAT_PARALLELISM=8 htcat https://example.com/big.iso | sha256sum",
        )
        .arg(
            Arg::new("url")
                .required(true)
                .help("http:// or https:// URL to fetch"),
        )
        .get_matches();

    let url = matches.get_one::<String>("url").unwrap().clone();
    if !url.starts_with("http://") && !url.starts_with("https://") {
        print_usage();
        return Err(format!("unsupported URL scheme in {:?}", url));
    }

    let cwd = env::current_dir().unwrap_or_else(|_| std::path::PathBuf::from("."));
    let cfg = config::load_config(&cwd);
    let parallelism = config::effective_parallelism(&cfg);
    utils::log_debug(&format!("fetching {} with parallelism {}", url, parallelism));

    let mut downloader = Downloader::new(htcat_core::default_agent(), url, parallelism);

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let (written, err) = downloader.write_to(&mut out);
    if let Some(e) = err {
        return Err(format!("download failed: {}", e));
    }
    out.flush()
        .map_err(|e| format!("flushing stdout failed: {}", e))?;
    utils::log_debug(&format!("wrote {} bytes", written));
    Ok(())
}

fn main() {
    if !use_color() {
        colored::control::set_override(false);
    }

    let code = match std::panic::catch_unwind(run) {
        Ok(Ok(())) => 0,
        Ok(Err(e)) => {
            error(&e);
            1
        }
        Err(_) => {
            error("An unexpected error occurred. Please report this issue.");
            1
        }
    };
    std::process::exit(code);
}
