//! Integration tests for `run_script` against the shell responder.

use std::time::Duration;

use scpi_stdio::script::{run_script, script_commands, Exchange};
use scpi_stdio::ProcessSession;

use super::test_helpers::responder_config;

const SETTLE: Duration = Duration::from_millis(250);

async fn started() -> ProcessSession {
    let session = ProcessSession::spawn(responder_config()).expect("spawn responder");
    assert_eq!(session.recv().await.expect("ready"), "READY");
    session
}

#[tokio::test]
async fn collects_responses_and_diagnostics_per_command() {
    let mut session = started().await;

    let exchanges = run_script(&mut session, ["PING", "BOGUS", "MULTI"], SETTLE)
        .await
        .expect("script runs");

    assert_eq!(
        exchanges,
        vec![
            Exchange {
                command: "PING".into(),
                responses: vec!["PONG".into()],
                diagnostics: vec![],
            },
            Exchange {
                command: "BOGUS".into(),
                responses: vec![],
                diagnostics: vec!["ERR 113".into()],
            },
            Exchange {
                command: "MULTI".into(),
                responses: vec!["one".into(), "two".into(), "three".into()],
                diagnostics: vec![],
            },
        ]
    );
    session.close().await;
}

#[tokio::test]
async fn stops_once_the_child_ends_its_output() {
    let mut session = started().await;

    let exchanges = run_script(&mut session, ["PING", "QUIT", "PING"], SETTLE)
        .await
        .expect("script runs");

    let commands: Vec<&str> = exchanges.iter().map(|e| e.command.as_str()).collect();
    assert_eq!(commands, ["PING", "QUIT"]);
    assert!(exchanges[1].responses.is_empty());

    let status = session.close().await.expect("exit status");
    assert_eq!(status.code(), Some(3));
}

#[tokio::test]
async fn runs_a_parsed_script_text() {
    let mut session = started().await;
    let text = "# query the version\nSYST:VERS?\n\n   \nPING  \n";

    let exchanges = run_script(&mut session, script_commands(text), SETTLE)
        .await
        .expect("script runs");

    let responses: Vec<&str> = exchanges
        .iter()
        .flat_map(|e| e.responses.iter().map(String::as_str))
        .collect();
    assert_eq!(responses, ["1999.0", "PONG"]);
    session.close().await;
}

#[tokio::test]
async fn send_failure_after_close_is_propagated() {
    let mut session = started().await;
    session.close().await;

    let err = run_script(&mut session, ["PING"], SETTLE)
        .await
        .expect_err("closed session");

    assert!(matches!(err, scpi_stdio::AppError::Closed), "got {err:?}");
}
