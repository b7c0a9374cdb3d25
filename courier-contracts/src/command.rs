use serde::{Deserialize, Serialize};

/// Requests the presentation layer may send to the shell.
///
/// Encoded as `{"command": "<name>"}` on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum ShellCommand {
    /// Install a downloaded update and relaunch.
    RestartApp,
    /// Start downloading an update that has been reported as available.
    DownloadUpdate,
}

impl ShellCommand {
    /// Wire name of the command.
    pub const fn name(self) -> &'static str {
        match self {
            ShellCommand::RestartApp => "restart_app",
            ShellCommand::DownloadUpdate => "download_update",
        }
    }
}

impl std::fmt::Display for ShellCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_encode_with_snake_case_names() {
        let encoded = serde_json::to_string(&ShellCommand::RestartApp)
            .expect("command encodes");
        assert_eq!(encoded, r#"{"command":"restart_app"}"#);

        let decoded: ShellCommand =
            serde_json::from_str(r#"{"command":"download_update"}"#)
                .expect("command decodes");
        assert_eq!(decoded, ShellCommand::DownloadUpdate);
    }

    #[test]
    fn names_match_the_wire_encoding() {
        for command in [ShellCommand::RestartApp, ShellCommand::DownloadUpdate]
        {
            let encoded = serde_json::to_value(command).expect("encodes");
            assert_eq!(encoded["command"], command.name());
            assert_eq!(command.to_string(), command.name());
        }
    }

    #[test]
    fn commands_outside_the_catalogue_are_rejected() {
        for raw in [
            r#"{"command":"open_devtools"}"#,
            r#"{"command":"RestartApp"}"#,
            r#"{"cmd":"restart_app"}"#,
            r#""restart_app""#,
        ] {
            assert!(
                serde_json::from_str::<ShellCommand>(raw).is_err(),
                "{raw} should not decode"
            );
        }
    }
}
