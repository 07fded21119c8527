//! Configuration, startup-script capture and restart.

use std::io::Write;
use std::time::Duration;

use bcs_core::ScriptStatus;
use bcs_server::ServerConfig;
use bcs_server::fixtures::{TestRig, fast_config, rig, rig_with_config, wait_until};
use tempfile::NamedTempFile;

/// Rig configured with `script` as its startup script. The file must stay
/// alive as long as restarts may re-read it.
fn startup_rig(script: &str) -> (TestRig, NamedTempFile) {
    let mut file = NamedTempFile::new().expect("create startup script");
    file.write_all(script.as_bytes()).expect("write startup script");
    let config = ServerConfig {
        startup_script: Some(file.path().to_path_buf()),
        ..fast_config()
    };
    (rig_with_config(config), file)
}

#[test]
fn the_startup_script_runs_during_configure_and_is_captured() {
    let (rig, _file) = startup_rig("set:beamline=i22\nprint 'beamline ready'\n");

    assert_eq!(
        rig.interpreter.executed(),
        vec!["set:beamline=i22", "print 'beamline ready'"]
    );
    // Kept for clients that attach later.
    assert_eq!(rig.server.startup_output(), "beamline ready\n");
    assert_eq!(rig.observer.terminal_text(), "beamline ready\n");
    // The status went through running while the script executed.
    assert_eq!(
        rig.observer.script_statuses(),
        vec![ScriptStatus::Running, ScriptStatus::Idle]
    );
}

#[test]
fn startup_failures_leave_the_server_usable() {
    let (rig, _file) = startup_rig("set:a=1\nfail:misconfigured\nset:b=2\n");

    // Execution stopped at the failure, the server configured anyway.
    assert_eq!(rig.interpreter.executed(), vec!["set:a=1", "fail:misconfigured"]);
    assert!(rig.server.is_configured());
    assert_eq!(rig.server.evaluate_command("1+1", "console"), "2");
}

#[test]
fn a_missing_startup_script_is_not_fatal() {
    let config = ServerConfig {
        startup_script: Some("/nonexistent/startup-script".into()),
        ..fast_config()
    };
    let rig = rig_with_config(config);
    assert!(rig.server.is_configured());
    assert_eq!(rig.server.startup_output(), "");
}

#[test]
fn configure_is_idempotent() {
    let (rig, _file) = startup_rig("set:count=1\n");
    assert_eq!(rig.interpreter.executed().len(), 1);

    rig.server.configure().expect("second configure");
    assert_eq!(rig.interpreter.executed().len(), 1, "startup script ran once");
}

#[test]
fn restart_resets_the_interpreter_and_reruns_startup() {
    let (rig, _file) = startup_rig("print 'fresh session'\n");
    rig.server
        .set_variable("leftover", "1")
        .expect("set variable");
    rig.server.run_command("set:junk=9", "console");
    assert!(wait_until(
        || rig.interpreter.executed().len() >= 2,
        Duration::from_secs(5),
    ));

    rig.server.restart().expect("restart");

    // Teardown wiped the namespace and the startup script ran afresh.
    assert_eq!(rig.server.variable("leftover").expect("variable"), None);
    assert_eq!(rig.interpreter.executed(), vec!["print 'fresh session'"]);
    assert_eq!(rig.server.startup_output(), "fresh session\n");
}

#[test]
fn restart_clears_a_pending_pause() {
    let rig = rig();
    rig.server.pause_script();
    assert_eq!(rig.server.script_status(), ScriptStatus::Paused);

    rig.server.restart().expect("restart");
    assert_eq!(rig.server.script_status(), ScriptStatus::Idle);
}
