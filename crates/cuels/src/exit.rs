use std::process::ExitCode;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ExitStatus {
    Success,
    Error,
}

/// How a command finished, plus an optional closing line for the user.
#[derive(Debug)]
pub struct Exit {
    status: ExitStatus,
    message: Option<String>,
}

impl Exit {
    #[must_use]
    pub fn success() -> Self {
        Self {
            status: ExitStatus::Success,
            message: None,
        }
    }

    #[must_use]
    pub fn error() -> Self {
        Self {
            status: ExitStatus::Error,
            message: None,
        }
    }

    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Print the message, to stderr for errors, and turn the status into a
    /// process exit code.
    pub fn process(self) -> ExitCode {
        match self.status {
            ExitStatus::Success => {
                if let Some(message) = self.message {
                    println!("{message}");
                }
                ExitCode::SUCCESS
            }
            ExitStatus::Error => {
                if let Some(message) = self.message {
                    eprintln!("{message}");
                }
                ExitCode::FAILURE
            }
        }
    }
}
