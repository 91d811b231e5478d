use std::fmt;

#[derive(Debug)]
pub struct Error {
    msg: String,
    // Exit status the process should terminate with when this error reaches main.
    code: Option<i32>,
}

impl Error {
    pub fn msg<M: Into<String>>(msg: M) -> Self {
        Self {
            msg: msg.into(),
            code: None,
        }
    }

    /// An error that terminates the run with a specific exit status,
    /// typically the one reported by a failing child process.
    pub fn exit<M: Into<String>>(code: i32, msg: M) -> Self {
        Self {
            msg: msg.into(),
            code: Some(code),
        }
    }

    pub fn exit_code(&self) -> i32 {
        self.code.unwrap_or(1)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.msg)
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::msg(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_errors_exit_with_one() {
        assert_eq!(Error::msg("boom").exit_code(), 1);
    }

    #[test]
    fn exit_errors_keep_child_status() {
        let err = Error::exit(2, "build exited with 2");
        assert_eq!(err.exit_code(), 2);
        assert_eq!(err.to_string(), "build exited with 2");
    }
}
