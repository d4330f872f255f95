//! Integration tests: run the htcat binary and check exit codes, stderr,
//! and payload fidelity on stdout.

use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;
use std::process::Command;
use std::thread;

fn htcat() -> Command {
    Command::new(env!("CARGO_BIN_EXE_htcat"))
}

/// Minimal one-shot origin: accepts connections and answers every request
/// with the full payload and a Content-Length.
fn serve(payload: Vec<u8>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(mut stream) = stream else { break };
            let payload = payload.clone();
            thread::spawn(move || {
                let mut reader = BufReader::new(match stream.try_clone() {
                    Ok(s) => s,
                    Err(_) => return,
                });
                loop {
                    let mut line = String::new();
                    match reader.read_line(&mut line) {
                        Ok(0) | Err(_) => return,
                        Ok(_) if line.trim_end().is_empty() => break,
                        Ok(_) => {}
                    }
                }
                let head = format!(
                    "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    payload.len()
                );
                let _ = stream.write_all(head.as_bytes());
                let _ = stream.write_all(&payload);
                let _ = stream.flush();
            });
        }
    });
    format!("http://{}", addr)
}

#[test]
fn test_help() {
    let out = htcat().arg("--help").output().unwrap();
    assert!(out.status.success(), "htcat --help should succeed");
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("url"));
    assert!(stdout.contains("Parallel HTTP(S) cat"));
}

#[test]
fn test_version() {
    let out = htcat().arg("--version").output().unwrap();
    assert!(out.status.success());
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("htcat"));
}

#[test]
fn test_no_arguments_fails() {
    let out = htcat().output().unwrap();
    assert!(!out.status.success(), "htcat without a URL should fail");
}

#[test]
fn test_unsupported_scheme_fails_with_usage() {
    let out = htcat().arg("ftp://example.com/file").output().unwrap();
    assert!(!out.status.success());
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("usage: htcat"));
    assert!(stderr.contains("unsupported URL scheme"));
}

#[test]
fn test_bare_word_url_fails_with_usage() {
    let out = htcat().arg("help").output().unwrap();
    assert!(!out.status.success());
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("usage: htcat"));
}

#[test]
fn test_payload_reaches_stdout_exactly() {
    let payload: Vec<u8> = (0..50_000).map(|i| (i * 13 + 5) as u8).collect();
    let url = serve(payload.clone());

    let out = htcat().arg(&url).output().unwrap();
    assert!(
        out.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&out.stderr)
    );
    assert_eq!(out.stdout, payload);
}

#[test]
fn test_unreachable_origin_exits_nonzero() {
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };
    let out = htcat().arg(format!("http://{}", addr)).output().unwrap();
    assert!(!out.status.success());
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("download failed"));
}
