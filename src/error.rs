/// Extension for errors that should be logged and swallowed rather than
/// propagated, for work where failure only degrades the result.
pub trait ResultOkLogExt<T, E> {
    fn ok_log(self) -> Option<T>;
}

impl<T, E> ResultOkLogExt<T, E> for std::result::Result<T, E>
where
    E: std::error::Error,
{
    fn ok_log(self) -> Option<T> {
        match self {
            Ok(ok) => Some(ok),
            Err(err) => {
                log::error!("{err}");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ok_log() {
        let ok: Result<u32, std::num::ParseIntError> = "42".parse();
        assert_eq!(ok.ok_log(), Some(42));

        let err: Result<u32, std::num::ParseIntError> = "nope".parse();
        assert_eq!(err.ok_log(), None);
    }
}
