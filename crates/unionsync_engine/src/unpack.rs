//! Extraction of the compute archive inside the project.

use crate::config::RetryConfig;
use crate::error::{SyncError, SyncResult};
use crate::extract::ExtractOutcome;
use crate::retry::retry_with_backoff;
use crate::transport::ProjectTransport;
use std::time::Duration;
use tracing::{debug, warn};
use unionsync_protocol::{ExecOutput, ExecRequest};

/// Diagnostic GNU tar prints at exit after per-entry errors.
///
/// Compatibility shim: the exec channel only returns text, so "finished with
/// per-entry collisions" is recognised by this substring. Replace with a
/// structured outcome once the project side reports one.
pub const CONFLICT_CASCADE_DIAGNOSTIC: &str = "failure status due to previous errors";

/// Classifies the output of a remote extraction.
pub fn classify_remote_extract(output: &ExecOutput) -> ExtractOutcome {
    if output.is_success() {
        ExtractOutcome::Success
    } else if output.stderr.contains(CONFLICT_CASCADE_DIAGNOSTIC) {
        ExtractOutcome::ConflictsOnly
    } else {
        ExtractOutcome::Fatal
    }
}

/// Builds the command that extracts `archive` (project-relative) in the project root.
pub fn extract_command(archive: &str, timeout: Duration) -> ExecRequest {
    ExecRequest::new(
        "tar",
        vec![
            "--keep-newer-files".to_string(),
            "-xf".to_string(),
            archive.to_string(),
        ],
        timeout.as_secs(),
    )
    .allow_nonzero_exit()
}

/// Extracts `archive` in the project, keeping project files that are newer.
///
/// Fatal outcomes are retried per `retry`; collisions between a file and a
/// directory at the same path count as success.
pub fn extract_in_project<T: ProjectTransport + ?Sized>(
    transport: &T,
    archive: &str,
    retry: &RetryConfig,
    timeout: Duration,
) -> SyncResult<ExtractOutcome> {
    let request = extract_command(archive, timeout);
    retry_with_backoff(retry, "project extraction", |attempt| {
        debug!(attempt, command = %request.display(), "extracting in project");
        let output = transport.exec(&request)?;
        match classify_remote_extract(&output) {
            ExtractOutcome::Fatal => Err(SyncError::Extract {
                archive: archive.to_string(),
                exit_code: output.exit_code,
                stderr: output.stderr,
            }),
            ExtractOutcome::ConflictsOnly => {
                warn!(archive, stderr = %output.stderr.trim(), "project extraction left conflicts");
                Ok(ExtractOutcome::ConflictsOnly)
            }
            ExtractOutcome::Success => Ok(ExtractOutcome::Success),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;
    use unionsync_protocol::RemoteFunction;

    const ARCHIVE: &str = ".compute-servers/1/compute-edited-files.tar.gz";

    fn quick(attempts: u32) -> RetryConfig {
        RetryConfig::fixed(attempts, Duration::from_millis(1))
    }

    #[test]
    fn classification() {
        assert_eq!(classify_remote_extract(&ExecOutput::success()), ExtractOutcome::Success);
        assert_eq!(
            classify_remote_extract(&ExecOutput::failure(
                2,
                "tar: a: Cannot open: File exists\ntar: Exiting with failure status due to previous errors\n"
            )),
            ExtractOutcome::ConflictsOnly
        );
        assert_eq!(
            classify_remote_extract(&ExecOutput::failure(2, "tar: Unexpected EOF in archive")),
            ExtractOutcome::Fatal
        );
    }

    #[test]
    fn command_keeps_newer_files() {
        let request = extract_command(ARCHIVE, Duration::from_secs(1800));
        assert_eq!(request.command, "tar");
        assert_eq!(request.args, ["--keep-newer-files", "-xf", ARCHIVE]);
        assert_eq!(request.timeout_secs, 1800);
        assert!(!request.error_on_nonzero_exit);
    }

    #[test]
    fn conflicts_count_as_success() {
        let transport = MockTransport::new();
        transport.push_exec_output(ExecOutput::failure(
            2,
            "tar: Exiting with failure status due to previous errors",
        ));

        let outcome =
            extract_in_project(&transport, ARCHIVE, &quick(5), Duration::from_secs(5)).unwrap();
        assert_eq!(outcome, ExtractOutcome::ConflictsOnly);
        assert_eq!(transport.exec_requests().len(), 1);
    }

    #[test]
    fn transient_failure_is_retried() {
        let transport = MockTransport::new();
        transport.push_exec_output(ExecOutput::failure(2, "tar: short read"));
        transport.push_exec_output(ExecOutput::failure(2, "tar: short read"));

        let outcome =
            extract_in_project(&transport, ARCHIVE, &quick(5), Duration::from_secs(5)).unwrap();
        assert_eq!(outcome, ExtractOutcome::Success);
        assert_eq!(transport.exec_requests().len(), 3);
    }

    #[test]
    fn exhaustion_is_fatal() {
        let transport = MockTransport::new();
        for _ in 0..5 {
            transport.push_exec_output(ExecOutput::failure(2, "tar: broken"));
        }

        let err = extract_in_project(&transport, ARCHIVE, &quick(5), Duration::from_secs(5))
            .unwrap_err();
        assert!(matches!(err, SyncError::RetriesExhausted { attempts: 5, .. }));
        assert_eq!(transport.exec_requests().len(), 5);
    }

    #[test]
    fn channel_failure_is_not_retried() {
        let transport = MockTransport::new();
        transport.fail(RemoteFunction::Exec, "session expired");

        let err = extract_in_project(&transport, ARCHIVE, &quick(5), Duration::from_secs(5))
            .unwrap_err();
        assert!(matches!(err, SyncError::Remote { .. }));
        assert_eq!(transport.exec_requests().len(), 1);
    }
}
